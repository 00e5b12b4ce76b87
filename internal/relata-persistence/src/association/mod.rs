//! Association resolver: eager loading of relationships and changes of the
//! targets associated to an owner.

mod mutation;
pub(crate) mod preloader;

pub use mutation::Association;
