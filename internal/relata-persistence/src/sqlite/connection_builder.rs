use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use slog::{Logger, debug};
use sqlite::Connection;

use crate::StdResult;
use crate::configuration::{ConnectionString, DatabaseLocation};
use crate::logging::LoggerExtensions;
use crate::sqlite::SqliteConnection;

/// Builder of SQLite connection
#[derive(Debug, Clone)]
pub struct ConnectionBuilder {
    connection_path: PathBuf,
    options: HashSet<ConnectionOptions>,
    busy_timeout_ms: Option<u32>,
    base_logger: Logger,
}

/// Options to apply to the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionOptions {
    /// Enable Write Ahead Log journal mode
    ///
    /// The journal mode is stored in the database file, it does not apply to
    /// in-memory databases.
    EnableWriteAheadLog,

    /// Enable foreign key support
    EnableForeignKeys,

    /// Disable foreign key support, takes precedence over
    /// [EnableForeignKeys][ConnectionOptions::EnableForeignKeys].
    ForceDisableForeignKeys,
}

impl ConnectionBuilder {
    /// Builder of file SQLite connection
    pub fn open_file(path: &Path) -> Self {
        Self {
            connection_path: path.to_path_buf(),
            options: HashSet::new(),
            busy_timeout_ms: None,
            base_logger: Logger::root(slog::Discard, slog::o!()),
        }
    }

    /// Builder of in memory SQLite connection
    pub fn open_memory() -> Self {
        Self::open_file(Path::new(":memory:"))
    }

    /// Builder configured from a parsed connection string.
    pub fn from_connection_string(connection_string: &ConnectionString) -> Self {
        let mut builder = match &connection_string.location {
            DatabaseLocation::Memory => Self::open_memory(),
            DatabaseLocation::File(path) => Self::open_file(path),
        };
        if connection_string.write_ahead_log {
            builder.options.insert(ConnectionOptions::EnableWriteAheadLog);
        }
        match connection_string.foreign_keys {
            Some(true) => {
                builder.options.insert(ConnectionOptions::EnableForeignKeys);
            }
            Some(false) => {
                builder.options.insert(ConnectionOptions::ForceDisableForeignKeys);
            }
            None => {}
        }
        builder.busy_timeout_ms = connection_string.busy_timeout_ms;

        builder
    }

    /// Set options to apply when the connection is created
    pub fn with_options(mut self, options: &[ConnectionOptions]) -> Self {
        for option in options {
            self.options.insert(*option);
        }
        self
    }

    /// Wait up to `timeout_ms` for a lock held by another connection.
    pub fn with_busy_timeout(mut self, timeout_ms: u32) -> Self {
        self.busy_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the logger to use
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.base_logger = logger;
        self
    }

    /// Return true if the built connections are private in-memory databases.
    pub fn is_memory(&self) -> bool {
        self.connection_path == Path::new(":memory:")
    }

    /// Build a connection based on the builder configuration
    pub fn build(self) -> StdResult<SqliteConnection> {
        let logger = self.base_logger.new_with_component_name::<Self>();

        debug!(logger, "Opening SQLite connection"; "path" => %self.connection_path.display(), "options" => ?self.options);
        let connection = Connection::open_thread_safe(&self.connection_path).with_context(|| {
            format!(
                "SQLite initialization: could not open connection with string '{}'.",
                self.connection_path.display()
            )
        })?;

        if self.options.contains(&ConnectionOptions::EnableWriteAheadLog) {
            connection
                .execute("pragma journal_mode = wal; pragma synchronous = normal;")
                .with_context(|| "SQLite initialization: could not enable WAL.")?;
        }

        if let Some(timeout_ms) = self.busy_timeout_ms {
            connection
                .execute(format!("pragma busy_timeout = {timeout_ms};"))
                .with_context(|| "SQLite initialization: could not set the busy timeout.")?;
        }

        if self.options.contains(&ConnectionOptions::ForceDisableForeignKeys) {
            connection
                .execute("pragma foreign_keys = false;")
                .with_context(|| "SQLite initialization: could not disable FOREIGN KEY support.")?;
        } else if self.options.contains(&ConnectionOptions::EnableForeignKeys) {
            connection
                .execute("pragma foreign_keys = true;")
                .with_context(|| "SQLite initialization: could not enable FOREIGN KEY support.")?;
        }

        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use sqlite::Value;

    use crate::sqlite::ConnectionExtensions;
    use crate::test_tools::{TestLogger, temp_dir};

    use super::*;

    fn pragma_value(connection: &SqliteConnection, pragma: &str) -> Value {
        connection
            .query_single_cell(format!("pragma {pragma}"), &[])
            .unwrap()
    }

    #[test]
    fn test_open_in_memory_without_foreign_key() {
        let connection = ConnectionBuilder::open_memory().build().unwrap();

        assert_eq!(Value::Integer(0), pragma_value(&connection, "foreign_keys"));
    }

    #[test]
    fn test_open_with_foreign_key() {
        let connection = ConnectionBuilder::open_memory()
            .with_options(&[ConnectionOptions::EnableForeignKeys])
            .build()
            .unwrap();

        assert_eq!(Value::Integer(1), pragma_value(&connection, "foreign_keys"));
    }

    #[test]
    fn test_force_disable_foreign_keys_wins() {
        let connection = ConnectionBuilder::open_memory()
            .with_options(&[
                ConnectionOptions::EnableForeignKeys,
                ConnectionOptions::ForceDisableForeignKeys,
            ])
            .build()
            .unwrap();

        assert_eq!(Value::Integer(0), pragma_value(&connection, "foreign_keys"));
    }

    #[test]
    fn test_open_file_with_wal_and_busy_timeout() {
        let dir = temp_dir("connection_builder", "test_open_file_with_wal_and_busy_timeout");
        let connection = ConnectionBuilder::open_file(&dir.join("test.sqlite3"))
            .with_options(&[ConnectionOptions::EnableWriteAheadLog])
            .with_busy_timeout(1500)
            .with_logger(TestLogger::stdout())
            .build()
            .unwrap();

        assert_eq!(
            Value::String("wal".to_string()),
            pragma_value(&connection, "journal_mode")
        );
        assert_eq!(Value::Integer(1500), pragma_value(&connection, "busy_timeout"));
    }

    #[test]
    fn test_builder_from_connection_string() {
        let connection_string =
            ConnectionString::parse("sqlite://:memory:?foreign_keys=true&busy_timeout=10")
                .unwrap();

        let builder = ConnectionBuilder::from_connection_string(&connection_string);
        assert!(builder.is_memory());

        let connection = builder.build().unwrap();
        assert_eq!(Value::Integer(1), pragma_value(&connection, "foreign_keys"));
        assert_eq!(Value::Integer(10), pragma_value(&connection, "busy_timeout"));
    }

    #[test]
    fn test_build_logs_the_opened_path() {
        let (logger, logs) = TestLogger::memory();

        ConnectionBuilder::open_memory().with_logger(logger).build().unwrap();

        assert!(logs.contains("path=:memory:"));
        assert!(logs.contains("src=ConnectionBuilder"));
    }
}
