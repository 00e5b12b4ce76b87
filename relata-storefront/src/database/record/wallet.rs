use chrono::{DateTime, Utc};
use relata_persistence::mapper::{
    ColumnValues, Entity, FieldValues, FromColumns, Record, Related, ValueReader, value,
};
use relata_persistence::schema::{
    ColumnType, EntityDescriptor, FieldDescriptor, RelationshipDescriptor, TimestampFormat,
};
use relata_persistence::{MappingError, StdResult};

use crate::database::record::User;

/// Wallet record is the representation of the balance owned by a user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Wallet {
    /// Wallet id.
    pub id: String,

    /// Id of the owning user.
    pub user_id: String,

    /// Balance.
    pub balance: i64,

    /// Date and time when the wallet was created.
    pub created_at: Option<DateTime<Utc>>,

    /// Date and time when the wallet was updated.
    pub updated_at: Option<DateTime<Utc>>,

    /// Owning user, when loaded.
    pub user: Option<Box<User>>,
}

impl Wallet {
    /// Kind of the wallet descriptor
    pub const KIND: &'static str = "Wallet";

    /// Create a wallet
    pub fn new(id: &str, user_id: &str, balance: i64) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            balance,
            ..Self::default()
        }
    }

    /// Descriptor of the `wallets` table
    pub fn descriptor() -> StdResult<EntityDescriptor> {
        EntityDescriptor::builder(Self::KIND, "wallets")
            .primary_key(FieldDescriptor::new("id", "id", ColumnType::Text))
            .field(FieldDescriptor::new("user_id", "user_id", ColumnType::Text).nullable())
            .field(FieldDescriptor::new("balance", "balance", ColumnType::Integer))
            .created_at("created_at", "created_at", TimestampFormat::Rfc3339)
            .updated_at("updated_at", "updated_at", TimestampFormat::Rfc3339)
            .relationship(RelationshipDescriptor::belongs_to("User", User::KIND, "user_id"))
            .build()
    }
}

impl Entity for Wallet {
    const KIND: &'static str = Wallet::KIND;

    fn to_record(&self) -> Record {
        let record = Record::new(
            FieldValues::new()
                .with("id", value::text(&self.id))
                .with("user_id", value::optional_text(Some(&self.user_id).filter(|id| !id.is_empty())))
                .with("balance", value::integer(self.balance)),
        );
        match &self.user {
            Some(user) => record.with_relation("User", Related::One(Some(Box::new(user.to_record())))),
            None => record,
        }
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let values = record.values();

        Ok(Self {
            id: values.string("id")?,
            user_id: values.string_or_default("user_id")?,
            balance: values.integer_or_default("balance")?,
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

/// Aggregated balances of a set of wallets.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletBalanceSummary {
    /// Sum of the balances.
    pub total_balance: i64,

    /// Lowest balance.
    pub min_balance: i64,

    /// Highest balance.
    pub max_balance: i64,

    /// Average balance.
    pub avg_balance: f64,
}

impl FromColumns for WalletBalanceSummary {
    fn from_columns(row: &ColumnValues) -> Result<Self, MappingError> {
        Ok(Self {
            total_balance: row.integer_or_default("total_balance")?,
            min_balance: row.integer_or_default("min_balance")?,
            max_balance: row.integer_or_default("max_balance")?,
            avg_balance: row.real_or_default("avg_balance")?,
        })
    }
}
