use chrono::{DateTime, Utc};
use relata_persistence::mapper::{Entity, FieldValues, Record, ValueReader, value};
use relata_persistence::schema::{ColumnType, EntityDescriptor, FieldDescriptor, TimestampFormat};
use relata_persistence::{MappingError, StdResult};

/// Todo record is a task of a user, deleting it only marks it as deleted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Todo {
    /// Todo id, generated by the database.
    pub id: i64,

    /// Id of the user.
    pub user_id: String,

    /// Title.
    pub title: String,

    /// Optional description.
    pub description: Option<String>,

    /// Date and time when the todo was created.
    pub created_at: Option<DateTime<Utc>>,

    /// Date and time when the todo was updated.
    pub updated_at: Option<DateTime<Utc>>,

    /// Date and time when the todo was deleted.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Todo {
    /// Kind of the todo descriptor
    pub const KIND: &'static str = "Todo";

    /// Create a todo not stored yet
    pub fn new(user_id: &str, title: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            title: title.to_string(),
            ..Self::default()
        }
    }

    /// Descriptor of the `todos` table
    pub fn descriptor() -> StdResult<EntityDescriptor> {
        EntityDescriptor::builder(Self::KIND, "todos")
            .auto_increment_key("id", "id")
            .field(FieldDescriptor::new("user_id", "user_id", ColumnType::Text))
            .field(FieldDescriptor::new("title", "title", ColumnType::Text))
            .field(FieldDescriptor::new("description", "description", ColumnType::Text).nullable())
            .created_at("created_at", "created_at", TimestampFormat::Rfc3339)
            .updated_at("updated_at", "updated_at", TimestampFormat::Rfc3339)
            .soft_delete("deleted_at", "deleted_at")
            .build()
    }
}

impl Entity for Todo {
    const KIND: &'static str = Todo::KIND;

    fn to_record(&self) -> Record {
        Record::new(
            FieldValues::new()
                .with("id", value::integer(self.id))
                .with("user_id", value::text(&self.user_id))
                .with("title", value::text(&self.title))
                .with("description", value::optional_text(self.description.clone()))
                .with("deleted_at", value::optional_timestamp(self.deleted_at)),
        )
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let values = record.values();

        Ok(Self {
            id: values.integer("id")?,
            user_id: values.string_or_default("user_id")?,
            title: values.string_or_default("title")?,
            description: values.optional_string("description")?,
            created_at: values.optional_timestamp("created_at")?,
            updated_at: values.optional_timestamp("updated_at")?,
            deleted_at: values.optional_timestamp("deleted_at")?,
        })
    }
}
