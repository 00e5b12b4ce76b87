#![warn(missing_docs)]

//! Relational data-access layer backed by SQLite.
//!
//! Provide:
//! - A [schema] registry describing entities, their columns and relationships.
//! - A [row mapper][mapper] converting rows to and from field-keyed records.
//! - A [query builder][query] producing parameterized statements.
//! - An [association] resolver for preloads, joins and association mutations.
//! - Units of work, sessions and the CRUD [executor][database::Executor] in [database].
//! - The [sqlite] plumbing: conditions, dialects, connections and their pool.

pub mod association;
pub mod configuration;
pub mod database;
mod error;
pub mod logging;
pub mod mapper;
pub mod query;
pub mod schema;
pub mod sqlite;
#[cfg(any(test, feature = "test_tools"))]
pub mod test_tools;

pub use error::{DataAccessError, MappingError};
pub use relata_resource_pool::ResourcePoolError;

/// Generic error type
pub type StdError = anyhow::Error;

/// Generic result type
pub type StdResult<T> = anyhow::Result<T, StdError>;

#[cfg(test)]
pub(crate) mod test_helper;
