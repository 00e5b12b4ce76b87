//! SQLite module.
//! This module provides the statement building blocks (conditions, projections,
//! dialects) and the connection plumbing (builder, pool, transactions).

mod condition;
mod connection_builder;
mod connection_extensions;
mod connection_pool;
mod dialect;
mod projection;
mod source_alias;
mod statement;
mod transaction;

pub use condition::WhereCondition;
pub use connection_builder::{ConnectionBuilder, ConnectionOptions};
pub use connection_extensions::{ConnectionExtensions, classify_error};
pub use connection_pool::{SqliteConnectionPool, SqlitePooledConnection};
pub use dialect::{LockStrength, MySqlDialect, SqlDialect, SqliteDialect};
pub use projection::{Projection, ProjectionField, SOURCE_PLACEHOLDER};
pub use source_alias::SourceAlias;
pub use statement::{SqlStatement, number_placeholders};
pub use transaction::{Savepoint, Transaction, TransactionBehavior};

/// Type of the connection used in relata
pub type SqliteConnection = sqlite::ConnectionThreadSafe;
