use chrono::{DateTime, Utc};
use relata_persistence::mapper::{Entity, FieldValues, Record, ValueReader, value};
use relata_persistence::schema::{ColumnType, EntityDescriptor, FieldDescriptor, TimestampFormat};
use relata_persistence::{MappingError, StdResult};

/// Guest book record is a message left by a visitor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuestBook {
    /// Entry id, generated by the database.
    pub id: i64,

    /// Visitor name.
    pub name: String,

    /// Visitor email.
    pub email: String,

    /// Message.
    pub message: String,

    /// Date and time when the entry was created.
    pub created_at: Option<DateTime<Utc>>,

    /// Date and time when the entry was updated.
    pub updated_at: Option<DateTime<Utc>>,
}

impl GuestBook {
    /// Kind of the guest book descriptor
    pub const KIND: &'static str = "GuestBook";

    /// Create an entry not stored yet
    pub fn new(name: &str, email: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            message: message.to_string(),
            ..Self::default()
        }
    }

    /// Descriptor of the `guest_books` table
    pub fn descriptor() -> StdResult<EntityDescriptor> {
        EntityDescriptor::builder(Self::KIND, "guest_books")
            .auto_increment_key("id", "id")
            .field(FieldDescriptor::new("name", "name", ColumnType::Text))
            .field(FieldDescriptor::new("email", "email", ColumnType::Text))
            .field(FieldDescriptor::new("message", "message", ColumnType::Text))
            .created_at("created_at", "created_at", TimestampFormat::Rfc3339)
            .updated_at("updated_at", "updated_at", TimestampFormat::Rfc3339)
            .build()
    }
}

impl Entity for GuestBook {
    const KIND: &'static str = GuestBook::KIND;

    fn to_record(&self) -> Record {
        Record::new(
            FieldValues::new()
                .with("id", value::integer(self.id))
                .with("name", value::text(&self.name))
                .with("email", value::text(&self.email))
                .with("message", value::text(&self.message)),
        )
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let values = record.values();

        Ok(Self {
            id: values.integer("id")?,
            name: values.string_or_default("name")?,
            email: values.string_or_default("email")?,
            message: values.string_or_default("message")?,
            created_at: values.optional_timestamp("created_at")?,
            updated_at: values.optional_timestamp("updated_at")?,
        })
    }
}
