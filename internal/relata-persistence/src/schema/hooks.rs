use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use anyhow::Context;

use crate::StdResult;
use crate::mapper::FieldValues;

/// Moment of an entity lifecycle at which hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    /// Before the insert statement, values can still be changed
    BeforeCreate,
    /// After the insert statement, with the stored values
    AfterCreate,
    /// Before an update statement, values can still be changed
    BeforeUpdate,
    /// After an update statement
    AfterUpdate,
    /// Before a delete statement
    BeforeDelete,
    /// After a delete statement
    AfterDelete,
}

/// A step of an entity lifecycle.
///
/// Closures with the same signature are hooks too.
#[cfg_attr(test, mockall::automock)]
pub trait LifecycleHook: Send + Sync {
    /// Run the step on the values of the entity, an error aborts the operation.
    fn run(&self, values: &mut FieldValues) -> StdResult<()>;
}

impl<F> LifecycleHook for F
where
    F: Fn(&mut FieldValues) -> StdResult<()> + Send + Sync,
{
    fn run(&self, values: &mut FieldValues) -> StdResult<()> {
        self(values)
    }
}

#[derive(Clone)]
struct HookStep {
    stage: HookStage,
    name: String,
    hook: Arc<dyn LifecycleHook>,
}

/// Named lifecycle steps of an entity, run in registration order.
#[derive(Clone, Default)]
pub struct HookPipeline {
    steps: Vec<HookStep>,
}

impl HookPipeline {
    /// Append a named step for the given stage.
    pub fn register<H: LifecycleHook + 'static>(&mut self, stage: HookStage, name: &str, hook: H) {
        self.steps.push(HookStep {
            stage,
            name: name.to_string(),
            hook: Arc::new(hook),
        });
    }

    /// Run the steps of the stage, stopping at the first failure.
    pub fn run(&self, stage: HookStage, values: &mut FieldValues) -> StdResult<()> {
        for step in self.steps.iter().filter(|step| step.stage == stage) {
            step.hook
                .run(values)
                .with_context(|| format!("Hook '{}' failed at stage {stage:?}", step.name))?;
        }

        Ok(())
    }

    /// Names of the steps of the stage, in run order.
    pub fn names(&self, stage: HookStage) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|step| step.stage == stage)
            .map(|step| step.name.as_str())
            .collect()
    }

    /// Return true if no step is registered.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Debug for HookPipeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.steps
                    .iter()
                    .map(|step| format!("{:?}:{}", step.stage, step.name)),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use mockall::predicate::always;
    use sqlite::Value;

    use crate::mapper::ValueReader;

    use super::*;

    #[test]
    fn run_only_the_steps_of_the_stage_in_registration_order() {
        let mut pipeline = HookPipeline::default();
        pipeline.register(HookStage::BeforeCreate, "first", |values: &mut FieldValues| -> StdResult<()> {
            values.set("trail", Value::String("first".to_string()));
            Ok(())
        });
        pipeline.register(HookStage::AfterCreate, "other stage", |_: &mut FieldValues| -> StdResult<()> {
            Err(anyhow!("must not run"))
        });
        pipeline.register(HookStage::BeforeCreate, "second", |values: &mut FieldValues| -> StdResult<()> {
            let trail = values.string("trail")?;
            values.set("trail", Value::String(format!("{trail},second")));
            Ok(())
        });

        let mut values = FieldValues::default();
        pipeline.run(HookStage::BeforeCreate, &mut values).unwrap();

        assert_eq!(
            Some(&Value::String("first,second".to_string())),
            values.get("trail")
        );
        assert_eq!(vec!["first", "second"], pipeline.names(HookStage::BeforeCreate));
    }

    #[test]
    fn a_failing_step_stops_the_pipeline() {
        let mut failing_hook = MockLifecycleHook::new();
        failing_hook
            .expect_run()
            .with(always())
            .times(1)
            .returning(|_| Err(anyhow!("refused")));
        let mut never_called_hook = MockLifecycleHook::new();
        never_called_hook.expect_run().never();

        let mut pipeline = HookPipeline::default();
        pipeline.register(HookStage::BeforeDelete, "guard", failing_hook);
        pipeline.register(HookStage::BeforeDelete, "audit", never_called_hook);

        let error = pipeline
            .run(HookStage::BeforeDelete, &mut FieldValues::default())
            .expect_err("pipeline should fail");

        assert!(
            format!("{error:?}").contains("Hook 'guard' failed at stage BeforeDelete"),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn empty_pipeline_succeeds() {
        let pipeline = HookPipeline::default();

        assert!(pipeline.is_empty());
        pipeline
            .run(HookStage::AfterUpdate, &mut FieldValues::default())
            .unwrap();
    }
}
