//! Records of the storefront tables

mod address;
mod guest_book;
mod product;
mod todo;
mod user;
mod user_log;
mod wallet;

pub use address::*;
pub use guest_book::*;
pub use product::*;
pub use todo::*;
pub use user::*;
pub use user_log::*;
pub use wallet::*;
