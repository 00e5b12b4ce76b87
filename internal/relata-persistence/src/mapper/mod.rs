//! Conversions between result rows, field values, records and typed entities.

mod record;
mod row_mapper;
mod values;

pub use record::{Entity, FromColumns, Record, Related};
pub use row_mapper::{RowMapper, RowOperation};
pub use sqlite::Value;
pub use values::{ColumnValues, FieldValues, ValueReader, value, value_kind};
pub(crate) use values::{is_unset_key, key_of};
