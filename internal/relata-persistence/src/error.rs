use std::time::Duration;

use thiserror::Error;

/// Errors raised by the data-access layer.
///
/// They are carried inside [StdError][crate::StdError] values, use
/// `downcast_ref::<DataAccessError>()` to inspect them.
#[derive(Error, Debug)]
pub enum DataAccessError {
    /// The entity kind was never registered.
    #[error("Entity '{0}' is not registered")]
    UnknownEntity(String),

    /// The entity kind is registered twice.
    #[error("Entity '{0}' is already registered")]
    DuplicateEntity(String),

    /// The relationship does not exist on the owner entity.
    #[error("Relationship '{relationship}' is not declared on entity '{kind}'")]
    RelationshipNotDeclared {
        /// Owner entity kind
        kind: String,
        /// Requested relationship name
        relationship: String,
    },

    /// The owner of an association has no key yet.
    #[error("Association '{relationship}' of entity '{kind}' has an owner without key")]
    StaleAssociation {
        /// Owner entity kind
        kind: String,
        /// Relationship name
        relationship: String,
    },

    /// A row or a record does not match its descriptor.
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// The engine rejected the statement because of a constraint.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// No connection became available in time.
    #[error("Connection pool exhausted, no connection available after {0:?}")]
    PoolExhausted(Duration),

    /// The engine could not complete the transaction, it must be retried as a whole.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// The descriptor or the registry is inconsistent.
    #[error("Invalid descriptor for entity '{kind}': {reason}")]
    InvalidDescriptor {
        /// Entity kind
        kind: String,
        /// What is wrong
        reason: String,
    },

    /// The query can not be turned into a statement.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Any other engine failure.
    #[error("Statement error: {0}")]
    Statement(String),
}

/// Shape mismatches between rows, records and descriptors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    /// A column of a row is not mapped by the descriptor.
    #[error("Column '{column}' is not mapped on table '{table}'")]
    UnknownColumn {
        /// Table name
        table: String,
        /// Column name
        column: String,
    },

    /// A field of a record is not mapped by the descriptor.
    #[error("Field '{field}' is not mapped on entity '{kind}'")]
    UnknownField {
        /// Entity kind
        kind: String,
        /// Field path
        field: String,
    },

    /// A mandatory field has no value.
    #[error("Field '{0}' has no value")]
    MissingField(String),

    /// The value type does not match the declared column type.
    #[error("Field '{field}' expects a {expected} value, found {found}")]
    TypeMismatch {
        /// Field path or column name
        field: String,
        /// Declared type
        expected: String,
        /// Type of the value found
        found: String,
    },

    /// The value has the right type but can not be decoded.
    #[error("Field '{field}' holds invalid data: {reason}")]
    InvalidData {
        /// Field path or column name
        field: String,
        /// Decoding failure
        reason: String,
    },
}
