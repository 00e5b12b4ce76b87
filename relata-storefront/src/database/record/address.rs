use chrono::{DateTime, Utc};
use relata_persistence::mapper::{Entity, FieldValues, Record, Related, ValueReader, value};
use relata_persistence::schema::{
    ColumnType, EntityDescriptor, FieldDescriptor, RelationshipDescriptor, TimestampFormat,
};
use relata_persistence::{MappingError, StdResult};

use crate::database::record::User;

/// Address record is a postal address of a user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Address {
    /// Address id, generated by the database.
    pub id: i64,

    /// Id of the owning user.
    pub user_id: String,

    /// Postal address.
    pub address: String,

    /// Date and time when the address was created.
    pub created_at: Option<DateTime<Utc>>,

    /// Date and time when the address was updated.
    pub updated_at: Option<DateTime<Utc>>,

    /// Owning user, when loaded.
    pub user: Option<Box<User>>,
}

impl Address {
    /// Kind of the address descriptor
    pub const KIND: &'static str = "Address";

    /// Create an address not stored yet
    pub fn new(user_id: &str, address: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            address: address.to_string(),
            ..Self::default()
        }
    }

    /// Descriptor of the `addresses` table
    pub fn descriptor() -> StdResult<EntityDescriptor> {
        EntityDescriptor::builder(Self::KIND, "addresses")
            .auto_increment_key("id", "id")
            .field(FieldDescriptor::new("user_id", "user_id", ColumnType::Text).nullable())
            .field(FieldDescriptor::new("address", "address", ColumnType::Text))
            .created_at("created_at", "created_at", TimestampFormat::Rfc3339)
            .updated_at("updated_at", "updated_at", TimestampFormat::Rfc3339)
            .relationship(RelationshipDescriptor::belongs_to("User", User::KIND, "user_id"))
            .build()
    }
}

impl Entity for Address {
    const KIND: &'static str = Address::KIND;

    fn to_record(&self) -> Record {
        let record = Record::new(
            FieldValues::new()
                .with("id", value::integer(self.id))
                .with("user_id", value::optional_text(Some(&self.user_id).filter(|id| !id.is_empty())))
                .with("address", value::text(&self.address)),
        );
        match &self.user {
            Some(user) => record.with_relation("User", Related::One(Some(Box::new(user.to_record())))),
            None => record,
        }
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let values = record.values();

        Ok(Self {
            id: values.integer("id")?,
            user_id: values.string_or_default("user_id")?,
            address: values.string_or_default("address")?,
            created_at: values.optional_timestamp("created_at")?,
            updated_at: values.optional_timestamp("updated_at")?,
            user: record
                .one("User")
                .map(User::from_record)
                .transpose()?
                .map(Box::new),
        })
    }
}
