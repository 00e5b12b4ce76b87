//! Entity descriptors, relationships, lifecycle hooks and their registry.

mod descriptor;
mod hooks;
mod registry;
mod relationship;

pub use descriptor::{
    ColumnType, EntityDescriptor, EntityDescriptorBuilder, FieldDescriptor, TimestampFormat,
};
#[cfg(test)]
pub use hooks::MockLifecycleHook;
pub use hooks::{HookPipeline, HookStage, LifecycleHook};
pub use registry::SchemaRegistry;
pub use relationship::{JoinTable, RelationshipDescriptor, RelationshipKind};
