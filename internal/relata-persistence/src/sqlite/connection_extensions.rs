use anyhow::Context;
use sqlite::{ReadableWithIndex, State, Value};

use crate::mapper::ColumnValues;
use crate::sqlite::{SqlStatement, SqliteConnection};
use crate::{DataAccessError, StdError, StdResult};

const SQLITE_BUSY: isize = 5;
const SQLITE_LOCKED: isize = 6;
const SQLITE_CONSTRAINT: isize = 19;

/// Extension trait for the [SqliteConnection] type.
pub trait ConnectionExtensions {
    /// Execute the given sql query and return the value of the first cell read.
    fn query_single_cell<Q: AsRef<str>, T: ReadableWithIndex>(
        &self,
        sql: Q,
        params: &[Value],
    ) -> StdResult<T>;

    /// Run the statement and return every row it yields.
    fn fetch_rows(&self, statement: &SqlStatement) -> StdResult<Vec<ColumnValues>>;

    /// Run the statement and return the number of rows it changed.
    fn apply(&self, statement: &SqlStatement) -> StdResult<usize>;
}

impl ConnectionExtensions for SqliteConnection {
    fn query_single_cell<Q: AsRef<str>, T: ReadableWithIndex>(
        &self,
        sql: Q,
        params: &[Value],
    ) -> StdResult<T> {
        let mut statement = self.prepare(&sql).map_err(|e| {
            classify_error(e).context(format!(
                "Prepare query error: SQL=`{}`",
                sql.as_ref().replace('\n', " ").trim()
            ))
        })?;
        statement.bind(params)?;
        statement.next().map_err(classify_error)?;
        statement
            .read::<T, _>(0)
            .with_context(|| "Read query error")
    }

    fn fetch_rows(&self, statement: &SqlStatement) -> StdResult<Vec<ColumnValues>> {
        let context = || format!("Fetch rows error: SQL=`{statement}`");
        let mut prepared = self
            .prepare(statement.sql())
            .map_err(|e| classify_error(e).context(context()))?;
        prepared
            .bind(statement.parameters())
            .map_err(|e| classify_error(e).context(context()))?;
        let columns: Vec<String> = prepared.column_names().to_vec();

        let mut rows = Vec::new();
        while let State::Row = prepared
            .next()
            .map_err(|e| classify_error(e).context(context()))?
        {
            let mut row = ColumnValues::new();
            for (index, column) in columns.iter().enumerate() {
                row.push(column, prepared.read::<Value, _>(index).with_context(context)?);
            }
            rows.push(row);
        }

        Ok(rows)
    }

    fn apply(&self, statement: &SqlStatement) -> StdResult<usize> {
        let context = || format!("Apply statement error: SQL=`{statement}`");
        let mut prepared = self
            .prepare(statement.sql())
            .map_err(|e| classify_error(e).context(context()))?;
        prepared
            .bind(statement.parameters())
            .map_err(|e| classify_error(e).context(context()))?;
        while let State::Row = prepared
            .next()
            .map_err(|e| classify_error(e).context(context()))?
        {}

        Ok(self.change_count())
    }
}

/// Turn an engine error into the matching [DataAccessError].
///
/// Extended result codes are reduced to their primary code.
pub fn classify_error(error: sqlite::Error) -> StdError {
    let message = error.message.clone().unwrap_or_else(|| error.to_string());
    let classified = match error.code.map(|code| code & 0xff) {
        Some(SQLITE_CONSTRAINT) => DataAccessError::ConstraintViolation(message),
        Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => DataAccessError::TransactionConflict(message),
        _ => DataAccessError::Statement(message),
    };

    classified.into()
}

#[cfg(test)]
mod tests {
    use sqlite::Connection;

    use super::*;

    fn init_database() -> SqliteConnection {
        let connection = Connection::open_thread_safe(":memory:").unwrap();
        connection
            .execute(
                "create table query_test(text_data text not null primary key, integer_data integer);
                insert into query_test(text_data, integer_data) values ('row 1', 1), ('row 2', null);",
            )
            .unwrap();

        connection
    }

    #[test]
    fn test_query_string() {
        let connection = Connection::open_thread_safe(":memory:").unwrap();
        let value: String = connection.query_single_cell("select 'test'", &[]).unwrap();

        assert_eq!(value, "test");
    }

    #[test]
    fn test_query_with_params() {
        let connection = Connection::open_thread_safe(":memory:").unwrap();
        let value: i64 = connection
            .query_single_cell(
                "select max(a) from (select 10 a union select 45 a union select 90 a) \
                where a > ? and a < ?",
                &[Value::Integer(10), Value::Integer(90)],
            )
            .unwrap();

        assert_eq!(value, 45);
    }

    #[test]
    fn fetch_rows_keeps_column_names_and_nulls() {
        let connection = init_database();

        let rows = connection
            .fetch_rows(&SqlStatement::new(
                "select text_data, integer_data as number from query_test order by text_data",
                Vec::new(),
            ))
            .unwrap();

        assert_eq!(
            vec![
                ColumnValues::new()
                    .with("text_data", Value::String("row 1".to_string()))
                    .with("number", Value::Integer(1)),
                ColumnValues::new()
                    .with("text_data", Value::String("row 2".to_string()))
                    .with("number", Value::Null),
            ],
            rows
        );
    }

    #[test]
    fn apply_returns_changed_rows() {
        let connection = init_database();

        let changed = connection
            .apply(&SqlStatement::new(
                "update query_test set integer_data = ?1",
                vec![Value::Integer(3)],
            ))
            .unwrap();

        assert_eq!(2, changed);
    }

    #[test]
    fn constraint_failures_are_classified() {
        let connection = init_database();

        let error = connection
            .apply(&SqlStatement::new(
                "insert into query_test(text_data) values (?1)",
                vec![Value::String("row 1".to_string())],
            ))
            .expect_err("duplicate primary key should fail");

        assert!(
            matches!(
                error.downcast_ref::<DataAccessError>(),
                Some(DataAccessError::ConstraintViolation(_))
            ),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn other_failures_are_statement_errors() {
        let connection = init_database();

        let error = connection
            .fetch_rows(&SqlStatement::new("select * from missing_table", Vec::new()))
            .expect_err("unknown table should fail");

        assert!(matches!(
            error.downcast_ref::<DataAccessError>(),
            Some(DataAccessError::Statement(_))
        ));
    }
}
