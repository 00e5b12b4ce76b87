use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use crate::schema::{HookPipeline, HookStage, LifecycleHook, RelationshipDescriptor};
use crate::{DataAccessError, StdResult};

/// Storage format of a timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// RFC 3339 text, UTC
    Rfc3339,
    /// Milliseconds since the Unix epoch, integer
    UnixMillis,
}

/// SQL type of a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Text
    Text,
    /// 64 bits integer
    Integer,
    /// Floating point number, integers are widened
    Real,
    /// Binary data
    Blob,
    /// Integer restricted to 0 and 1
    Boolean,
    /// Date and time
    Timestamp(TimestampFormat),
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Integer => write!(f, "integer"),
            Self::Real => write!(f, "real"),
            Self::Blob => write!(f, "blob"),
            Self::Boolean => write!(f, "boolean"),
            Self::Timestamp(TimestampFormat::Rfc3339) => write!(f, "timestamp (RFC 3339)"),
            Self::Timestamp(TimestampFormat::UnixMillis) => write!(f, "timestamp (unix ms)"),
        }
    }
}

/// Mapping of one entity field to one column.
///
/// Field paths of embedded structures are dotted (`name.first_name`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    path: String,
    column: String,
    column_type: ColumnType,
    nullable: bool,
    create_only: bool,
}

impl FieldDescriptor {
    /// Non nullable field mapped to `column`.
    pub fn new(path: &str, column: &str, column_type: ColumnType) -> Self {
        Self {
            path: path.to_string(),
            column: column.to_string(),
            column_type,
            nullable: false,
            create_only: false,
        }
    }

    /// The column accepts `NULL`.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// The column is written on insert and never updated.
    pub fn create_only(mut self) -> Self {
        self.create_only = true;
        self
    }

    /// Field path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Column name
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Column type
    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    /// Return true if the column accepts `NULL`.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Return true if the column is never updated.
    pub fn is_create_only(&self) -> bool {
        self.create_only
    }

    fn prefixed(mut self, prefix: &str) -> Self {
        self.path = format!("{prefix}.{}", self.path);
        self
    }
}

/// Immutable description of an entity: its table, columns, keys, managed
/// timestamps, soft-delete marker, relationships and lifecycle hooks.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    kind: String,
    table: String,
    fields: Vec<FieldDescriptor>,
    primary_key: Vec<String>,
    auto_increment: bool,
    created_at: Option<String>,
    updated_at: Option<String>,
    soft_delete: Option<String>,
    relationships: Vec<RelationshipDescriptor>,
    hooks: HookPipeline,
}

impl EntityDescriptor {
    /// Start the description of the entity `kind` stored in `table`.
    pub fn builder(kind: &str, table: &str) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            descriptor: Self {
                kind: kind.to_string(),
                table: table.to_string(),
                fields: Vec::new(),
                primary_key: Vec::new(),
                auto_increment: false,
                created_at: None,
                updated_at: None,
                soft_delete: None,
                relationships: Vec::new(),
                hooks: HookPipeline::default(),
            },
        }
    }

    /// Entity kind
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Mapped fields, in declaration order
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Field mapped at the given path
    pub fn field(&self, path: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.path == path)
    }

    /// Field mapped to the given column
    pub fn field_by_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.column == column)
    }

    /// Primary key fields
    pub fn primary_key_fields(&self) -> Vec<&FieldDescriptor> {
        self.primary_key
            .iter()
            .filter_map(|path| self.field(path))
            .collect()
    }

    /// Primary key columns
    pub fn primary_key_columns(&self) -> Vec<String> {
        self.primary_key_fields()
            .iter()
            .map(|field| field.column.clone())
            .collect()
    }

    /// Return true if the field is part of the primary key.
    pub fn is_primary_key(&self, path: &str) -> bool {
        self.primary_key.iter().any(|key| key == path)
    }

    /// Return true if the engine generates the primary key.
    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    /// Field holding the creation timestamp
    pub fn created_at_field(&self) -> Option<&FieldDescriptor> {
        self.created_at.as_deref().and_then(|path| self.field(path))
    }

    /// Field holding the last update timestamp
    pub fn updated_at_field(&self) -> Option<&FieldDescriptor> {
        self.updated_at.as_deref().and_then(|path| self.field(path))
    }

    /// Field holding the soft-delete marker
    pub fn soft_delete_field(&self) -> Option<&FieldDescriptor> {
        self.soft_delete.as_deref().and_then(|path| self.field(path))
    }

    /// Declared relationships
    pub fn relationships(&self) -> &[RelationshipDescriptor] {
        &self.relationships
    }

    /// Relationship declared with the given name
    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships
            .iter()
            .find(|relationship| relationship.name() == name)
    }

    /// Lifecycle hooks
    pub fn hooks(&self) -> &HookPipeline {
        &self.hooks
    }

    fn invalid(&self, reason: String) -> DataAccessError {
        DataAccessError::InvalidDescriptor {
            kind: self.kind.clone(),
            reason,
        }
    }
}

/// Builder of [EntityDescriptor].
pub struct EntityDescriptorBuilder {
    descriptor: EntityDescriptor,
}

impl EntityDescriptorBuilder {
    /// Add a primary key field, call it again for composite keys.
    pub fn primary_key(mut self, field: FieldDescriptor) -> Self {
        self.descriptor.primary_key.push(field.path.clone());
        self.descriptor.fields.push(field.create_only());
        self
    }

    /// Add an integer primary key generated by the engine.
    pub fn auto_increment_key(mut self, path: &str, column: &str) -> Self {
        self.descriptor.auto_increment = true;
        self.primary_key(FieldDescriptor::new(path, column, ColumnType::Integer))
    }

    /// Add a field.
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.descriptor.fields.push(field);
        self
    }

    /// Add the fields of an embedded structure, their paths are prefixed with `prefix.`.
    pub fn embedded(mut self, prefix: &str, fields: Vec<FieldDescriptor>) -> Self {
        self.descriptor
            .fields
            .extend(fields.into_iter().map(|field| field.prefixed(prefix)));
        self
    }

    /// Add the creation timestamp, filled on insert when unset.
    pub fn created_at(mut self, path: &str, column: &str, format: TimestampFormat) -> Self {
        self.descriptor.created_at = Some(path.to_string());
        self.field(FieldDescriptor::new(path, column, ColumnType::Timestamp(format)).create_only())
    }

    /// Add the update timestamp, refreshed by every write.
    pub fn updated_at(mut self, path: &str, column: &str, format: TimestampFormat) -> Self {
        self.descriptor.updated_at = Some(path.to_string());
        self.field(FieldDescriptor::new(path, column, ColumnType::Timestamp(format)))
    }

    /// Add the soft-delete marker, a nullable RFC 3339 timestamp.
    pub fn soft_delete(mut self, path: &str, column: &str) -> Self {
        self.descriptor.soft_delete = Some(path.to_string());
        self.field(
            FieldDescriptor::new(path, column, ColumnType::Timestamp(TimestampFormat::Rfc3339))
                .nullable(),
        )
    }

    /// Declare a relationship.
    pub fn relationship(mut self, relationship: RelationshipDescriptor) -> Self {
        self.descriptor.relationships.push(relationship);
        self
    }

    /// Append a named lifecycle step.
    pub fn hook<H: LifecycleHook + 'static>(
        mut self,
        stage: HookStage,
        name: &str,
        hook: H,
    ) -> Self {
        self.descriptor.hooks.register(stage, name, hook);
        self
    }

    /// Check the description and freeze it.
    pub fn build(self) -> StdResult<EntityDescriptor> {
        let descriptor = self.descriptor;

        if descriptor.primary_key.is_empty() {
            return Err(descriptor.invalid("no primary key declared".to_string()).into());
        }

        let mut paths = BTreeSet::new();
        let mut columns = BTreeSet::new();
        for field in &descriptor.fields {
            if !paths.insert(field.path.as_str()) {
                return Err(descriptor
                    .invalid(format!("field '{}' is mapped twice", field.path))
                    .into());
            }
            if !columns.insert(field.column.as_str()) {
                return Err(descriptor
                    .invalid(format!("column '{}' is mapped twice", field.column))
                    .into());
            }
        }

        if let Some(field) = descriptor
            .primary_key_fields()
            .into_iter()
            .find(|field| field.nullable)
        {
            return Err(descriptor
                .invalid(format!("primary key field '{}' is nullable", field.path))
                .into());
        }

        let mut names = BTreeSet::new();
        for relationship in &descriptor.relationships {
            if !names.insert(relationship.name()) {
                return Err(descriptor
                    .invalid(format!(
                        "relationship '{}' is declared twice",
                        relationship.name()
                    ))
                    .into());
            }
            if descriptor.field(relationship.name()).is_some() {
                return Err(descriptor
                    .invalid(format!(
                        "relationship '{}' shadows a field",
                        relationship.name()
                    ))
                    .into());
            }
        }

        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::JoinTable;

    use super::*;

    fn user_builder() -> EntityDescriptorBuilder {
        EntityDescriptor::builder("User", "users")
            .primary_key(FieldDescriptor::new("id", "id", ColumnType::Text))
            .field(FieldDescriptor::new("password", "password", ColumnType::Text))
            .embedded(
                "name",
                vec![
                    FieldDescriptor::new("first_name", "first_name", ColumnType::Text),
                    FieldDescriptor::new("middle_name", "middle_name", ColumnType::Text)
                        .nullable(),
                ],
            )
            .created_at("created_at", "created_at", TimestampFormat::Rfc3339)
            .updated_at("updated_at", "updated_at", TimestampFormat::Rfc3339)
    }

    #[test]
    fn build_flattens_embedded_fields() {
        let descriptor = user_builder().build().unwrap();

        let field = descriptor.field_by_column("first_name").unwrap();
        assert_eq!("name.first_name", field.path());
        assert!(descriptor.field("name.middle_name").unwrap().is_nullable());
        assert_eq!(vec!["id".to_string()], descriptor.primary_key_columns());
        assert!(descriptor.field("id").unwrap().is_create_only());
        assert!(descriptor.created_at_field().unwrap().is_create_only());
        assert!(!descriptor.updated_at_field().unwrap().is_create_only());
        assert!(descriptor.soft_delete_field().is_none());
    }

    #[test]
    fn auto_increment_key_is_an_integer_primary_key() {
        let descriptor = EntityDescriptor::builder("UserLog", "user_logs")
            .auto_increment_key("id", "id")
            .field(FieldDescriptor::new("action", "action", ColumnType::Text))
            .build()
            .unwrap();

        assert!(descriptor.is_auto_increment());
        assert!(descriptor.is_primary_key("id"));
        assert_eq!(
            ColumnType::Integer,
            descriptor.field("id").unwrap().column_type()
        );
    }

    #[test]
    fn soft_delete_marker_is_a_nullable_timestamp() {
        let descriptor = EntityDescriptor::builder("Todo", "todos")
            .auto_increment_key("id", "id")
            .soft_delete("deleted_at", "deleted_at")
            .build()
            .unwrap();

        let marker = descriptor.soft_delete_field().unwrap();
        assert!(marker.is_nullable());
        assert_eq!(
            ColumnType::Timestamp(TimestampFormat::Rfc3339),
            marker.column_type()
        );
    }

    #[test]
    fn build_fails_without_primary_key() {
        let error = EntityDescriptor::builder("Orphan", "orphans")
            .field(FieldDescriptor::new("name", "name", ColumnType::Text))
            .build()
            .expect_err("a descriptor without key should be rejected");

        assert!(matches!(
            error.downcast_ref::<DataAccessError>(),
            Some(DataAccessError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn build_fails_on_duplicate_columns() {
        let error = user_builder()
            .field(FieldDescriptor::new("secret", "password", ColumnType::Text))
            .build()
            .expect_err("a column mapped twice should be rejected");

        assert!(error.to_string().contains("column 'password' is mapped twice"));
    }

    #[test]
    fn build_fails_on_duplicate_relationships() {
        let error = user_builder()
            .relationship(RelationshipDescriptor::has_one("Wallet", "Wallet", "user_id"))
            .relationship(RelationshipDescriptor::many_to_many(
                "Wallet",
                "Wallet",
                JoinTable::new("user_wallets", "user_id", "wallet_id"),
            ))
            .build()
            .expect_err("a relationship declared twice should be rejected");

        assert!(error.to_string().contains("relationship 'Wallet' is declared twice"));
    }
}
