use chrono::{DateTime, Utc};
use relata_persistence::mapper::{Entity, FieldValues, Record, ValueReader, value};
use relata_persistence::schema::{ColumnType, EntityDescriptor, FieldDescriptor, TimestampFormat};
use relata_persistence::{MappingError, StdResult};

/// User log record is an action performed by a user, its timestamps are
/// stored as Unix milliseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserLog {
    /// Log id, generated by the database.
    pub id: i64,

    /// Id of the user.
    pub user_id: String,

    /// Performed action.
    pub action: String,

    /// Date and time when the log was created.
    pub created_at: Option<DateTime<Utc>>,

    /// Date and time when the log was updated.
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserLog {
    /// Kind of the user log descriptor
    pub const KIND: &'static str = "UserLog";

    /// Create a log not stored yet
    pub fn new(user_id: &str, action: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            action: action.to_string(),
            ..Self::default()
        }
    }

    /// Descriptor of the `user_logs` table
    pub fn descriptor() -> StdResult<EntityDescriptor> {
        EntityDescriptor::builder(Self::KIND, "user_logs")
            .auto_increment_key("id", "id")
            .field(FieldDescriptor::new("user_id", "user_id", ColumnType::Text))
            .field(FieldDescriptor::new("action", "action", ColumnType::Text))
            .created_at("created_at", "created_at", TimestampFormat::UnixMillis)
            .updated_at("updated_at", "updated_at", TimestampFormat::UnixMillis)
            .build()
    }
}

impl Entity for UserLog {
    const KIND: &'static str = UserLog::KIND;

    fn to_record(&self) -> Record {
        Record::new(
            FieldValues::new()
                .with("id", value::integer(self.id))
                .with("user_id", value::text(&self.user_id))
                .with("action", value::text(&self.action)),
        )
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let values = record.values();

        Ok(Self {
            id: values.integer("id")?,
            user_id: values.string_or_default("user_id")?,
            action: values.string_or_default("action")?,
            created_at: values.optional_timestamp("created_at")?,
            updated_at: values.optional_timestamp("updated_at")?,
        })
    }
}
