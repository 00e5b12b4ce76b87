#![warn(missing_docs)]

//! Storefront data model built on the relata data-access layer.
//!
//! Provide:
//! - The storefront [records][database::record]: users, wallets, addresses,
//!   products, guest book entries, user logs and todos.
//! - Their descriptors gathered in a [registry][database::storefront_registry],
//!   with the user identifier hook and the wallet [scopes][database::scope].
//! - The table bootstrap and a [StorefrontStore] opening a ready to use data context.

pub mod database;
mod store;

pub use store::StorefrontStore;
