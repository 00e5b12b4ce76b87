use chrono::{DateTime, Utc};
use relata_persistence::mapper::{Entity, FieldValues, Record, Related, ValueReader, value};
use relata_persistence::schema::{
    ColumnType, EntityDescriptor, FieldDescriptor, JoinTable, RelationshipDescriptor,
    TimestampFormat,
};
use relata_persistence::{MappingError, StdResult};

use crate::database::record::User;

/// Product record is an article of the storefront catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Product {
    /// Product id.
    pub id: String,

    /// Name.
    pub name: String,

    /// Price.
    pub price: i64,

    /// Date and time when the product was created.
    pub created_at: Option<DateTime<Utc>>,

    /// Date and time when the product was updated.
    pub updated_at: Option<DateTime<Utc>>,

    /// Users liking the product, when loaded.
    pub like_by_users: Vec<User>,
}

impl Product {
    /// Kind of the product descriptor
    pub const KIND: &'static str = "Product";

    /// Create a product
    pub fn new(id: &str, name: &str, price: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            price,
            ..Self::default()
        }
    }

    /// Descriptor of the `products` table
    pub fn descriptor() -> StdResult<EntityDescriptor> {
        EntityDescriptor::builder(Self::KIND, "products")
            .primary_key(FieldDescriptor::new("id", "id", ColumnType::Text))
            .field(FieldDescriptor::new("name", "name", ColumnType::Text))
            .field(FieldDescriptor::new("price", "price", ColumnType::Integer))
            .created_at("created_at", "created_at", TimestampFormat::Rfc3339)
            .updated_at("updated_at", "updated_at", TimestampFormat::Rfc3339)
            .relationship(RelationshipDescriptor::many_to_many(
                "LikeByUsers",
                User::KIND,
                JoinTable::new("user_like_product", "product_id", "user_id"),
            ))
            .build()
    }
}

impl Entity for Product {
    const KIND: &'static str = Product::KIND;

    fn to_record(&self) -> Record {
        let record = Record::new(
            FieldValues::new()
                .with("id", value::text(&self.id))
                .with("name", value::text(&self.name))
                .with("price", value::integer(self.price)),
        );
        if self.like_by_users.is_empty() {
            return record;
        }

        record.with_relation(
            "LikeByUsers",
            Related::Many(self.like_by_users.iter().map(User::to_record).collect()),
        )
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let values = record.values();

        Ok(Self {
            id: values.string("id")?,
            name: values.string_or_default("name")?,
            price: values.integer_or_default("price")?,
            created_at: values.optional_timestamp("created_at")?,
            updated_at: values.optional_timestamp("updated_at")?,
            like_by_users: record
                .many("LikeByUsers")
                .iter()
                .map(User::from_record)
                .collect::<Result<_, _>>()?,
        })
    }
}
