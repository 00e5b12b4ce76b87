//! Storefront database: records, descriptors, hooks, scopes and tables.

pub mod hook;
pub mod record;
mod registry;
pub mod scope;
mod tables;

pub use registry::storefront_registry;
pub use tables::{STOREFRONT_DDL, create_tables};
