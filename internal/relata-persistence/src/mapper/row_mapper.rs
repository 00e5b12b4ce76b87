use chrono::{DateTime, Utc};
use sqlite::Value;

use crate::MappingError;
use crate::mapper::values::{format_timestamp, is_unset_key, parse_timestamp, value_kind};
use crate::mapper::{ColumnValues, FieldValues, Record};
use crate::schema::{ColumnType, EntityDescriptor, FieldDescriptor, TimestampFormat};

/// Statement a row is mapped for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOperation {
    /// Every column is written, managed timestamps are filled.
    Insert,
    /// Primary key and create-only columns are left out.
    Update,
}

/// Conversions between rows and records driven by an [EntityDescriptor].
pub struct RowMapper;

impl RowMapper {
    /// Map a result row to a record.
    ///
    /// Every column must be mapped by the descriptor, fields of columns absent
    /// from the row are left unset.
    pub fn to_entity(row: &ColumnValues, descriptor: &EntityDescriptor) -> Result<Record, MappingError> {
        let mut values = FieldValues::new();
        for (column, value) in row.iter() {
            let field =
                descriptor
                    .field_by_column(column)
                    .ok_or_else(|| MappingError::UnknownColumn {
                        table: descriptor.table().to_string(),
                        column: column.to_string(),
                    })?;
            values.set(field.path(), Self::check_value(field, value.clone())?);
        }

        Ok(Record::new(values))
    }

    /// Map the columns of an outer joined entity, `None` when the join matched no row.
    pub fn to_joined_entity(
        row: &ColumnValues,
        descriptor: &EntityDescriptor,
    ) -> Result<Option<Record>, MappingError> {
        if row.iter().all(|(_, value)| matches!(value, Value::Null)) {
            return Ok(None);
        }

        Self::to_entity(row, descriptor).map(Some)
    }

    /// Map record values to the columns written by an insert or an update.
    ///
    /// The creation timestamp is filled on insert when unset, the update
    /// timestamp is always refreshed, an unset auto-increment key is written as
    /// `NULL` so the engine generates it.
    pub fn to_row(
        values: &FieldValues,
        descriptor: &EntityDescriptor,
        operation: RowOperation,
        now: DateTime<Utc>,
    ) -> Result<ColumnValues, MappingError> {
        Self::check_known_fields(values, descriptor)?;
        let created_at = descriptor.created_at_field().map(FieldDescriptor::path);
        let updated_at = descriptor.updated_at_field().map(FieldDescriptor::path);

        let mut row = ColumnValues::new();
        for field in descriptor.fields() {
            let path = field.path();
            let is_key = descriptor.is_primary_key(path);
            if operation == RowOperation::Update && (is_key || field.is_create_only()) {
                continue;
            }

            let current = values.get(path);
            let value = if updated_at == Some(path) {
                Self::timestamp_for(field, now)
            } else if operation == RowOperation::Insert
                && created_at == Some(path)
                && matches!(current, None | Some(Value::Null))
            {
                Self::timestamp_for(field, now)
            } else if operation == RowOperation::Insert
                && is_key
                && descriptor.is_auto_increment()
                && is_unset_key(current)
            {
                Value::Null
            } else {
                match current {
                    Some(value) => Self::check_value(field, value.clone())?,
                    None if field.is_nullable() => Value::Null,
                    None => return Err(MappingError::MissingField(path.to_string())),
                }
            };
            row.push(field.column(), value);
        }

        Ok(row)
    }

    /// Map a partial set of changes to the columns of an update statement, the
    /// update timestamp is added when the descriptor manages one.
    pub fn to_changes(
        changes: &FieldValues,
        descriptor: &EntityDescriptor,
        now: DateTime<Utc>,
    ) -> Result<ColumnValues, MappingError> {
        Self::check_known_fields(changes, descriptor)?;

        let mut row = ColumnValues::new();
        for (path, value) in changes.iter() {
            let field = descriptor
                .field(path)
                .ok_or_else(|| Self::unknown_field(descriptor, path))?;
            if descriptor.is_primary_key(path) {
                return Err(MappingError::InvalidData {
                    field: path.to_string(),
                    reason: "primary key fields can not be updated".to_string(),
                });
            }
            if field.is_create_only() {
                return Err(MappingError::InvalidData {
                    field: path.to_string(),
                    reason: "field is written on creation only".to_string(),
                });
            }
            row.push(field.column(), Self::check_value(field, value.clone())?);
        }

        if let Some(field) = descriptor
            .updated_at_field()
            .filter(|field| !changes.contains(field.path()))
        {
            row.push(field.column(), Self::timestamp_for(field, now));
        }

        Ok(row)
    }

    /// Check a value against the column type of the field and convert it to
    /// the storage representation of the column.
    pub fn check_value(field: &FieldDescriptor, value: Value) -> Result<Value, MappingError> {
        let path = field.path();
        match (field.column_type(), value) {
            (_, Value::Null) if field.is_nullable() => Ok(Value::Null),
            (ColumnType::Text, value @ Value::String(_)) => Ok(value),
            (ColumnType::Integer, value @ Value::Integer(_)) => Ok(value),
            (ColumnType::Real, value @ Value::Float(_)) => Ok(value),
            (ColumnType::Real, Value::Integer(number)) => Ok(Value::Float(number as f64)),
            (ColumnType::Blob, value @ Value::Binary(_)) => Ok(value),
            (ColumnType::Boolean, Value::Integer(number @ (0 | 1))) => Ok(Value::Integer(number)),
            (ColumnType::Boolean, Value::Integer(number)) => Err(MappingError::InvalidData {
                field: path.to_string(),
                reason: format!("{number} is not a boolean"),
            }),
            (ColumnType::Timestamp(format), value @ (Value::String(_) | Value::Integer(_))) => {
                let at = parse_timestamp(path, &value)?;
                match (format, value) {
                    (TimestampFormat::Rfc3339, value @ Value::String(_)) => Ok(value),
                    (TimestampFormat::UnixMillis, value @ Value::Integer(_)) => Ok(value),
                    (format, _) => Ok(Self::format_timestamp_as(format, at)),
                }
            }
            (column_type, other) => Err(MappingError::TypeMismatch {
                field: path.to_string(),
                expected: column_type.to_string(),
                found: value_kind(&other).to_string(),
            }),
        }
    }

    fn check_known_fields(
        values: &FieldValues,
        descriptor: &EntityDescriptor,
    ) -> Result<(), MappingError> {
        match values.iter().find(|(path, _)| descriptor.field(path).is_none()) {
            Some((path, _)) => Err(Self::unknown_field(descriptor, path)),
            None => Ok(()),
        }
    }

    fn unknown_field(descriptor: &EntityDescriptor, path: &str) -> MappingError {
        MappingError::UnknownField {
            kind: descriptor.kind().to_string(),
            field: path.to_string(),
        }
    }

    fn timestamp_for(field: &FieldDescriptor, now: DateTime<Utc>) -> Value {
        match field.column_type() {
            ColumnType::Timestamp(format) => Self::format_timestamp_as(format, now),
            _ => Value::String(format_timestamp(&now)),
        }
    }

    fn format_timestamp_as(format: TimestampFormat, at: DateTime<Utc>) -> Value {
        match format {
            TimestampFormat::Rfc3339 => Value::String(format_timestamp(&at)),
            TimestampFormat::UnixMillis => Value::Integer(at.timestamp_millis()),
        }
    }
}
