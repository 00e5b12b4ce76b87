//! Query descriptions and their rendering to parameterized statements.

mod builder;

pub use builder::{PreloadDirective, QueryBuilder, Scope};
