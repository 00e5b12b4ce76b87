use crate::schema::{ColumnType, EntityDescriptor};

use super::SourceAlias;

/// Placeholder of the main source in entity projections, resolved with a
/// [SourceAlias] when the projection is expanded.
pub const SOURCE_PLACEHOLDER: &str = "{:source:}";

/// Projected column: `definition as name`.
///
/// With `users.first_name as first_name`, `users.first_name` is the definition
/// and `first_name` the output name read back by the row mapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionField {
    /// Output name of the column.
    pub name: String,

    /// Column expression, may hold source placeholders.
    pub definition: String,

    /// Declared type of the column.
    pub column_type: ColumnType,
}

/// Ordered list of projected columns of a select statement.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    fields: Vec<ProjectionField>,
}

impl Projection {
    /// Every mapped column of the entity read from its main source, each
    /// column keeps its name.
    pub fn for_entity(descriptor: &EntityDescriptor) -> Self {
        Self::from_descriptor(descriptor, |column| {
            (column.to_string(), format!("{SOURCE_PLACEHOLDER}.{column}"))
        })
    }

    /// Every mapped column of an entity joined as `alias`, each column is
    /// renamed `<alias>__<column>`.
    pub fn for_joined_entity(descriptor: &EntityDescriptor, alias: &str) -> Self {
        Self::from_descriptor(descriptor, |column| {
            (format!("{alias}__{column}"), format!("{alias}.{column}"))
        })
    }

    fn from_descriptor<F>(descriptor: &EntityDescriptor, name_and_definition: F) -> Self
    where
        F: Fn(&str) -> (String, String),
    {
        let fields = descriptor
            .fields()
            .iter()
            .map(|field| {
                let (name, definition) = name_and_definition(field.column());
                ProjectionField {
                    name,
                    definition,
                    column_type: field.column_type(),
                }
            })
            .collect();

        Self { fields }
    }

    /// Append the fields of another projection.
    pub fn extend(&mut self, other: Projection) {
        self.fields.extend(other.fields);
    }

    /// Projected fields, in select order.
    pub fn fields(&self) -> &[ProjectionField] {
        &self.fields
    }

    /// Render the projection, replacing source placeholders with their alias.
    pub fn expand(&self, aliases: &SourceAlias) -> String {
        let fields = self
            .fields
            .iter()
            .map(|field| format!("{} as {}", field.definition, field.name))
            .collect::<Vec<_>>()
            .join(", ");

        aliases.apply(&fields)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_helper;

    use super::*;

    #[test]
    fn entity_columns_are_read_from_the_aliased_source() {
        let projection = Projection::for_entity(&test_helper::tag_descriptor());

        assert_eq!(
            "t.label as label, t.colour as colour",
            projection.expand(&SourceAlias::new(&[(SOURCE_PLACEHOLDER, "t")]))
        );
    }

    #[test]
    fn joined_columns_are_prefixed_with_the_join_name() {
        let descriptor = test_helper::profile_descriptor();
        let mut projection = Projection::for_entity(&descriptor);
        projection.extend(Projection::for_joined_entity(&descriptor, "Profile"));

        assert_eq!(
            "profiles.id as id, profiles.author_id as author_id, profiles.bio as bio, \
            Profile.id as Profile__id, Profile.author_id as Profile__author_id, Profile.bio as Profile__bio",
            projection.expand(&SourceAlias::new(&[(SOURCE_PLACEHOLDER, "profiles")]))
        );
    }

    #[test]
    fn fields_keep_their_declared_type() {
        let projection = Projection::for_entity(&test_helper::profile_descriptor());

        assert_eq!(
            vec![ColumnType::Integer, ColumnType::Integer, ColumnType::Text],
            projection
                .fields()
                .iter()
                .map(|field| field.column_type)
                .collect::<Vec<_>>()
        );
    }
}
