use std::sync::Arc;

use sqlite::Value;

use crate::database::{Executor, WriteMode};
use crate::mapper::{Entity, FieldValues, Record};
use crate::query::QueryBuilder;
use crate::schema::{EntityDescriptor, RelationshipDescriptor, RelationshipKind};
use crate::sqlite::{SqlStatement, WhereCondition};
use crate::{DataAccessError, StdResult};

/// Alias of the join table when reading many-to-many targets
const LINK_ALIAS: &str = "association_link";

/// Relationship of one owner record, to read and change its targets.
///
/// Every change runs atomically: on failure the owner and its targets are left
/// as they were.
pub struct Association<'a> {
    executor: Executor<'a>,
    owner_descriptor: Arc<EntityDescriptor>,
    relationship: RelationshipDescriptor,
    target: Arc<EntityDescriptor>,
    owner: Record,
}

impl<'a> Association<'a> {
    pub(crate) fn new(
        executor: Executor<'a>,
        kind: &str,
        owner: Record,
        name: &str,
    ) -> StdResult<Self> {
        let owner_descriptor = executor.registry().lookup(kind)?;
        let (relationship, target) = executor.registry().relationship(kind, name)?;

        Ok(Self {
            executor,
            owner_descriptor,
            relationship,
            target,
            owner,
        })
    }

    /// Relationship
    pub fn relationship(&self) -> &RelationshipDescriptor {
        &self.relationship
    }

    /// Owner record, its foreign key follows belongs-to changes
    pub fn owner(&self) -> &Record {
        &self.owner
    }

    /// Targets currently associated to the owner.
    pub fn find_records(&self) -> StdResult<Vec<Record>> {
        self.executor.find_records(&self.targets_query()?)
    }

    /// Targets currently associated to the owner, as typed entities.
    pub fn find<E: Entity>(&self) -> StdResult<Vec<E>> {
        self.executor.find(&self.targets_query()?)
    }

    /// Targets currently associated to the owner, the query refined by the caller.
    pub fn find_with(&self, refine: impl FnOnce(QueryBuilder) -> QueryBuilder) -> StdResult<Vec<Record>> {
        self.executor.find_records(&refine(self.targets_query()?))
    }

    /// Number of targets associated to the owner.
    pub fn count(&self) -> StdResult<i64> {
        self.executor.count(&self.targets_query()?)
    }

    /// Associate the targets to the owner, saving them first.
    ///
    /// A has-one association drops its previous target, a belongs-to
    /// association accepts exactly one target.
    pub fn append(&mut self, targets: Vec<Record>) -> StdResult<Vec<Record>> {
        let executor = self.executor.clone();
        executor.atomically(|| self.append_targets(targets))
    }

    /// Replace every associated target by the given ones.
    pub fn replace(&mut self, targets: Vec<Record>) -> StdResult<Vec<Record>> {
        let executor = self.executor.clone();
        executor.atomically(|| {
            self.clear_targets()?;
            self.append_targets(targets)
        })
    }

    /// Dissociate the given targets from the owner, targets are kept.
    pub fn delete(&mut self, targets: &[Record]) -> StdResult<usize> {
        if targets.is_empty() {
            return Ok(0);
        }

        let executor = self.executor.clone();
        executor.atomically(|| self.delete_targets(targets))
    }

    /// Dissociate every target from the owner, targets are kept.
    pub fn clear(&mut self) -> StdResult<usize> {
        let executor = self.executor.clone();
        executor.atomically(|| self.clear_targets())
    }

    /// Typed version of [append][Self::append].
    pub fn append_entities<E: Entity>(&mut self, targets: &[E]) -> StdResult<Vec<E>> {
        let saved = self.append(targets.iter().map(Entity::to_record).collect())?;
        Self::to_entities(&saved)
    }

    /// Typed version of [replace][Self::replace].
    pub fn replace_entities<E: Entity>(&mut self, targets: &[E]) -> StdResult<Vec<E>> {
        let saved = self.replace(targets.iter().map(Entity::to_record).collect())?;
        Self::to_entities(&saved)
    }

    /// Typed version of [delete][Self::delete].
    pub fn delete_entities<E: Entity>(&mut self, targets: &[E]) -> StdResult<usize> {
        let targets: Vec<Record> = targets.iter().map(Entity::to_record).collect();
        self.delete(&targets)
    }

    fn to_entities<E: Entity>(records: &[Record]) -> StdResult<Vec<E>> {
        Ok(records
            .iter()
            .map(E::from_record)
            .collect::<Result<_, _>>()
            .map_err(DataAccessError::from)?)
    }

    fn stale(&self) -> DataAccessError {
        DataAccessError::StaleAssociation {
            kind: self.owner_descriptor.kind().to_string(),
            relationship: self.relationship.name().to_string(),
        }
    }

    /// Owner side key, `NULL` only for a belongs-to association without target.
    fn owner_key(&self) -> StdResult<Value> {
        if Executor::key_condition(&self.owner_descriptor, self.owner.values()).is_err() {
            return Err(self.stale().into());
        }
        let key = Executor::column_value(
            &self.owner_descriptor,
            self.owner.values(),
            self.relationship.owner_key(),
        )?;
        if matches!(key, Value::Null) && self.relationship.kind() != RelationshipKind::BelongsTo {
            return Err(self.stale().into());
        }

        Ok(key)
    }

    fn target_column(&self, column: &str) -> String {
        format!("{}.{column}", self.target.table())
    }

    /// Path of the field mapped to `column`.
    fn field_path(descriptor: &EntityDescriptor, column: &str) -> StdResult<String> {
        descriptor
            .field_by_column(column)
            .map(|field| field.path().to_string())
            .ok_or_else(|| {
                DataAccessError::InvalidDescriptor {
                    kind: descriptor.kind().to_string(),
                    reason: format!("key column '{column}' is not mapped"),
                }
                .into()
            })
    }

    fn targets_query(&self) -> StdResult<QueryBuilder> {
        let key = self.owner_key()?;
        let query = QueryBuilder::new(self.target.kind());
        let target_key = self.target_column(self.relationship.target_key());

        Ok(match self.relationship.join_table() {
            Some(join_table) => query
                .join_raw(
                    &format!(
                        "inner join {} as {LINK_ALIAS} on {LINK_ALIAS}.{} = {target_key}",
                        join_table.table(),
                        join_table.target_column()
                    ),
                    Vec::new(),
                )
                .filter(
                    &format!("{LINK_ALIAS}.{} = ?*", join_table.owner_column()),
                    vec![key],
                ),
            None if matches!(key, Value::Null) => {
                query.where_condition(WhereCondition::where_in(&target_key, Vec::new()))
            }
            None => query.filter(&format!("{target_key} = ?*"), vec![key]),
        })
    }

    /// Condition selecting the targets holding the owner key in their foreign key.
    fn dependents_query(&self, key: Value) -> QueryBuilder {
        QueryBuilder::new(self.target.kind()).filter(
            &format!("{} = ?*", self.target_column(self.relationship.target_key())),
            vec![key],
        )
    }

    fn append_targets(&mut self, targets: Vec<Record>) -> StdResult<Vec<Record>> {
        let key = self.owner_key()?;

        match self.relationship.kind() {
            RelationshipKind::HasOne | RelationshipKind::HasMany => {
                if self.relationship.kind() == RelationshipKind::HasOne {
                    if targets.len() != 1 {
                        return Err(self.single_target_expected(targets.len()));
                    }
                    self.nullify_dependents(self.dependents_query(key.clone()))?;
                }
                let foreign_key = Self::field_path(&self.target, self.relationship.target_key())?;
                targets
                    .into_iter()
                    .map(|mut target| {
                        target.values_mut().set(&foreign_key, key.clone());
                        self.executor
                            .write_record(&self.target, target, WriteMode::Upsert)
                    })
                    .collect()
            }
            RelationshipKind::BelongsTo => {
                let target = match <[Record; 1]>::try_from(targets) {
                    Ok([target]) => target,
                    Err(targets) => return Err(self.single_target_expected(targets.len())),
                };
                let saved = self
                    .executor
                    .write_record(&self.target, target, WriteMode::Upsert)?;
                let target_key = Executor::column_value(
                    &self.target,
                    saved.values(),
                    self.relationship.target_key(),
                )?;
                self.set_owner_foreign_key(target_key)?;

                Ok(vec![saved])
            }
            RelationshipKind::ManyToMany => targets
                .into_iter()
                .map(|target| {
                    let saved = self
                        .executor
                        .write_record(&self.target, target, WriteMode::Upsert)?;
                    let target_key = Executor::column_value(
                        &self.target,
                        saved.values(),
                        self.relationship.target_key(),
                    )?;
                    self.executor
                        .link(&self.relationship, key.clone(), target_key, false)?;
                    Ok(saved)
                })
                .collect(),
        }
    }

    fn delete_targets(&mut self, targets: &[Record]) -> StdResult<usize> {
        let key = self.owner_key()?;

        match self.relationship.kind() {
            RelationshipKind::HasOne | RelationshipKind::HasMany => {
                let identities = targets.iter().try_fold(WhereCondition::default(), |identities, target| {
                    Executor::key_condition(&self.target, target.values())
                        .map(|identity| identities.or_where(identity))
                })?;
                self.nullify_dependents(self.dependents_query(key).where_condition(identities))
            }
            RelationshipKind::BelongsTo => {
                let mut dissociated = 0;
                for target in targets {
                    let target_key = Executor::column_value(
                        &self.target,
                        target.values(),
                        self.relationship.target_key(),
                    )?;
                    if !matches!(key, Value::Null) && target_key == key {
                        dissociated += self.set_owner_foreign_key(Value::Null)?;
                    }
                }

                Ok(dissociated)
            }
            RelationshipKind::ManyToMany => {
                let target_keys = targets
                    .iter()
                    .map(|target| {
                        Executor::column_value(
                            &self.target,
                            target.values(),
                            self.relationship.target_key(),
                        )
                    })
                    .collect::<StdResult<Vec<_>>>()?;
                self.unlink(key, Some(target_keys))
            }
        }
    }

    fn clear_targets(&mut self) -> StdResult<usize> {
        let key = self.owner_key()?;

        match self.relationship.kind() {
            RelationshipKind::HasOne | RelationshipKind::HasMany => {
                self.nullify_dependents(self.dependents_query(key))
            }
            RelationshipKind::BelongsTo if matches!(key, Value::Null) => Ok(0),
            RelationshipKind::BelongsTo => self.set_owner_foreign_key(Value::Null),
            RelationshipKind::ManyToMany => self.unlink(key, None),
        }
    }

    fn nullify_dependents(&self, query: QueryBuilder) -> StdResult<usize> {
        let foreign_key = Self::field_path(&self.target, self.relationship.target_key())?;

        self.executor
            .update_columns(&query, &FieldValues::new().with(&foreign_key, Value::Null))
    }

    fn set_owner_foreign_key(&mut self, value: Value) -> StdResult<usize> {
        let foreign_key = Self::field_path(&self.owner_descriptor, self.relationship.owner_key())?;
        let query = Executor::primary_key_query(&self.owner_descriptor, self.owner.values())?;
        let updated = self.executor.update_columns(
            &query,
            &FieldValues::new().with(&foreign_key, value.clone()),
        )?;
        self.owner.values_mut().set(&foreign_key, value);

        Ok(updated)
    }

    /// Delete the join table rows of the owner, restricted to the target keys when given.
    fn unlink(&self, owner_key: Value, target_keys: Option<Vec<Value>>) -> StdResult<usize> {
        let Some(join_table) = self.relationship.join_table() else {
            return Ok(0);
        };
        let condition = WhereCondition::new(
            &format!("{} = ?*", join_table.owner_column()),
            vec![owner_key],
        );
        let condition = match target_keys {
            Some(keys) => condition.and_where(WhereCondition::where_in(join_table.target_column(), keys)),
            None => condition,
        };
        let (condition, parameters) = condition.into_raw();

        self.executor.apply(&SqlStatement::from_raw(
            &format!("delete from {} where {condition}", join_table.table()),
            parameters,
            self.executor.dialect(),
        ))
    }

    fn single_target_expected(&self, found: usize) -> anyhow::Error {
        DataAccessError::InvalidQuery(format!(
            "association '{}' takes exactly one target, {found} given",
            self.relationship.name()
        ))
        .into()
    }
}
