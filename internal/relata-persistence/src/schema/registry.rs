use std::collections::BTreeMap;
use std::sync::Arc;

use crate::schema::{EntityDescriptor, RelationshipDescriptor, RelationshipKind};
use crate::{DataAccessError, StdResult};

/// Entity descriptors known by the data-access layer, keyed by entity kind.
///
/// Populated once at startup then shared read-only.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    descriptors: BTreeMap<String, Arc<EntityDescriptor>>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, its kind must not be registered yet.
    pub fn register(&mut self, descriptor: EntityDescriptor) -> StdResult<()> {
        if self.descriptors.contains_key(descriptor.kind()) {
            return Err(DataAccessError::DuplicateEntity(descriptor.kind().to_string()).into());
        }
        self.descriptors
            .insert(descriptor.kind().to_string(), Arc::new(descriptor));

        Ok(())
    }

    /// Descriptor of the entity kind
    pub fn lookup(&self, kind: &str) -> StdResult<Arc<EntityDescriptor>> {
        self.descriptors
            .get(kind)
            .cloned()
            .ok_or_else(|| DataAccessError::UnknownEntity(kind.to_string()).into())
    }

    /// Relationship `name` of the entity kind, with the descriptor of its targets
    pub fn relationship(
        &self,
        kind: &str,
        name: &str,
    ) -> StdResult<(RelationshipDescriptor, Arc<EntityDescriptor>)> {
        let owner = self.lookup(kind)?;
        let relationship = owner.relationship(name).cloned().ok_or_else(|| {
            DataAccessError::RelationshipNotDeclared {
                kind: kind.to_string(),
                relationship: name.to_string(),
            }
        })?;
        let target = self.lookup(relationship.target_kind())?;

        Ok((relationship, target))
    }

    /// Registered entity kinds
    pub fn kinds(&self) -> Vec<&str> {
        self.descriptors.keys().map(|kind| kind.as_str()).collect()
    }

    /// Check that every relationship points to a registered entity through mapped columns.
    pub fn validate(&self) -> StdResult<()> {
        for owner in self.descriptors.values() {
            for relationship in owner.relationships() {
                let invalid = |reason: String| DataAccessError::InvalidDescriptor {
                    kind: owner.kind().to_string(),
                    reason: format!("relationship '{}': {reason}", relationship.name()),
                };
                let target = self
                    .descriptors
                    .get(relationship.target_kind())
                    .ok_or_else(|| {
                        invalid(format!(
                            "target entity '{}' is not registered",
                            relationship.target_kind()
                        ))
                    })?;

                if owner.field_by_column(relationship.owner_key()).is_none() {
                    return Err(invalid(format!(
                        "owner key '{}' is not a column of '{}'",
                        relationship.owner_key(),
                        owner.table()
                    ))
                    .into());
                }
                if target.field_by_column(relationship.target_key()).is_none() {
                    return Err(invalid(format!(
                        "target key '{}' is not a column of '{}'",
                        relationship.target_key(),
                        target.table()
                    ))
                    .into());
                }
                if relationship.kind() == RelationshipKind::ManyToMany
                    && relationship.join_table().is_none()
                {
                    return Err(invalid("many-to-many without join table".to_string()).into());
                }
            }
        }

        Ok(())
    }
}
