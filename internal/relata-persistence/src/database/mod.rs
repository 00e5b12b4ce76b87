//! Database module.
//! This module contains the data context, its sessions and units of work, and
//! the executor running the CRUD operations.

mod context;
mod executor;
mod unit_of_work;

pub use context::{DataContext, Session};
pub use executor::{CreatedBatch, Executor};
pub(crate) use executor::WriteMode;
pub use unit_of_work::UnitOfWork;
