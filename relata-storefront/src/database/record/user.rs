use chrono::{DateTime, Utc};
use relata_persistence::mapper::{
    ColumnValues, Entity, FieldValues, FromColumns, Record, Related, ValueReader, value,
};
use relata_persistence::schema::{
    ColumnType, EntityDescriptor, FieldDescriptor, HookStage, JoinTable, RelationshipDescriptor,
    TimestampFormat,
};
use relata_persistence::{MappingError, StdResult};

use crate::database::hook;
use crate::database::record::{Address, Product, Wallet};

/// Full name of a user, stored in the `users` table columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Name {
    /// First name.
    pub first_name: String,

    /// Middle name, empty when the user has none.
    pub middle_name: String,

    /// Last name, empty when the user has none.
    pub last_name: String,
}

impl Name {
    /// Name made of a first name only
    pub fn first(first_name: &str) -> Self {
        Self {
            first_name: first_name.to_string(),
            ..Self::default()
        }
    }
}

/// User record is the representation of a stored storefront user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    /// User id, generated on creation when empty.
    pub id: String,

    /// Password.
    pub password: String,

    /// Full name.
    pub name: Name,

    /// Date and time when the user was created.
    pub created_at: Option<DateTime<Utc>>,

    /// Date and time when the user was updated.
    pub updated_at: Option<DateTime<Utc>>,

    /// Free text kept in memory only.
    pub information: String,

    /// Wallet, when loaded.
    pub wallet: Option<Wallet>,

    /// Addresses, when loaded.
    pub addresses: Vec<Address>,

    /// Liked products, when loaded.
    pub like_products: Vec<Product>,
}

impl User {
    /// Kind of the user descriptor
    pub const KIND: &'static str = "User";

    /// Create a user with a first name only
    pub fn new(id: &str, password: &str, first_name: &str) -> Self {
        Self {
            id: id.to_string(),
            password: password.to_string(),
            name: Name::first(first_name),
            ..Self::default()
        }
    }

    /// Descriptor of the `users` table
    pub fn descriptor() -> StdResult<EntityDescriptor> {
        EntityDescriptor::builder(Self::KIND, "users")
            .primary_key(FieldDescriptor::new("id", "id", ColumnType::Text))
            .field(FieldDescriptor::new("password", "password", ColumnType::Text))
            .embedded(
                "name",
                vec![
                    FieldDescriptor::new("first_name", "first_name", ColumnType::Text),
                    FieldDescriptor::new("middle_name", "middle_name", ColumnType::Text),
                    FieldDescriptor::new("last_name", "last_name", ColumnType::Text),
                ],
            )
            .created_at("created_at", "created_at", TimestampFormat::Rfc3339)
            .updated_at("updated_at", "updated_at", TimestampFormat::Rfc3339)
            .relationship(RelationshipDescriptor::has_one("Wallet", Wallet::KIND, "user_id"))
            .relationship(RelationshipDescriptor::has_many(
                "Addresses",
                Address::KIND,
                "user_id",
            ))
            .relationship(RelationshipDescriptor::many_to_many(
                "LikeProducts",
                Product::KIND,
                JoinTable::new("user_like_product", "user_id", "product_id"),
            ))
            .hook(HookStage::BeforeCreate, "assign user id", hook::assign_user_id)
            .build()
    }
}

impl Entity for User {
    const KIND: &'static str = User::KIND;

    fn to_record(&self) -> Record {
        let mut values = FieldValues::new()
            .with("id", value::text(&self.id))
            .with("password", value::text(&self.password))
            .with("name.first_name", value::text(&self.name.first_name))
            .with("name.middle_name", value::text(&self.name.middle_name))
            .with("name.last_name", value::text(&self.name.last_name));
        if let Some(created_at) = self.created_at {
            values.set("created_at", value::timestamp(created_at));
        }

        let mut record = Record::new(values);
        if let Some(wallet) = &self.wallet {
            record.set_relation("Wallet", Related::One(Some(Box::new(wallet.to_record()))));
        }
        if !self.addresses.is_empty() {
            record.set_relation(
                "Addresses",
                Related::Many(self.addresses.iter().map(Entity::to_record).collect()),
            );
        }
        if !self.like_products.is_empty() {
            record.set_relation(
                "LikeProducts",
                Related::Many(self.like_products.iter().map(Entity::to_record).collect()),
            );
        }

        record
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let values = record.values();

        Ok(Self {
            id: values.string_or_default("id")?,
            password: values.string_or_default("password")?,
            name: Name {
                first_name: values.string_or_default("name.first_name")?,
                middle_name: values.string_or_default("name.middle_name")?,
                last_name: values.string_or_default("name.last_name")?,
            },
            created_at: values.optional_timestamp("created_at")?,
            updated_at: values.optional_timestamp("updated_at")?,
            information: String::new(),
            wallet: record.one("Wallet").map(Wallet::from_record).transpose()?,
            addresses: record
                .many("Addresses")
                .iter()
                .map(Address::from_record)
                .collect::<Result<_, _>>()?,
            like_products: record
                .many("LikeProducts")
                .iter()
                .map(Product::from_record)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Projection of a user on its identifier and names, read from
/// `select users.id, users.first_name, users.last_name`.
#[derive(Debug, Clone, PartialEq)]
pub struct UserResponse {
    /// User id.
    pub id: String,

    /// First name.
    pub first_name: String,

    /// Last name.
    pub last_name: String,
}

impl FromColumns for UserResponse {
    fn from_columns(row: &ColumnValues) -> Result<Self, MappingError> {
        Ok(Self {
            id: row.string("id")?,
            first_name: row.string("first_name")?,
            last_name: row.string_or_default("last_name")?,
        })
    }
}
