use std::cell::Cell;

use slog::{Logger, debug};

use crate::StdResult;
use crate::logging::LoggerExtensions;
use crate::schema::SchemaRegistry;
use crate::sqlite::{Savepoint, SqlDialect, SqliteConnection, Transaction, TransactionBehavior};

use super::Executor;

/// A transaction and the executor running inside it.
///
/// Nothing is visible to other connections before [commit][Self::commit],
/// dropping the unit of work rolls it back.
pub struct UnitOfWork<'a> {
    transaction: Transaction<'a>,
    executor: Executor<'a>,
    depth: Cell<usize>,
    logger: Logger,
}

impl<'a> UnitOfWork<'a> {
    /// Begin a unit of work on the connection.
    pub fn begin(
        connection: &'a SqliteConnection,
        registry: &'a SchemaRegistry,
        dialect: &'a dyn SqlDialect,
        behavior: TransactionBehavior,
        logger: &Logger,
    ) -> StdResult<Self> {
        let logger = logger.new_with_component_name::<Self>();
        let transaction = Transaction::begin(connection, behavior, &logger)?;

        Ok(Self {
            transaction,
            executor: Executor::new(connection, registry, dialect, &logger),
            depth: Cell::new(0),
            logger,
        })
    }

    /// Executor bound to this unit of work
    pub fn executor(&self) -> &Executor<'a> {
        &self.executor
    }

    /// Number of nested transactions currently open
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Run the operation in a nested transaction.
    ///
    /// A failure rolls back the changes of the operation only, the unit of work
    /// stays usable. Without savepoint support the operation runs directly in
    /// the unit of work and its failure can not be undone alone.
    pub fn with_transaction<T>(&self, operation: impl FnOnce(&Self) -> StdResult<T>) -> StdResult<T> {
        if !self.executor.dialect().supports_savepoints() {
            debug!(self.logger, "Savepoints unsupported, nested transaction flattened"; "depth" => self.depth());
            return operation(self);
        }

        let savepoint = Savepoint::open(self.executor.connection(), &self.logger)?;
        self.depth.set(self.depth.get() + 1);
        let result = operation(self);
        self.depth.set(self.depth.get() - 1);

        match result {
            Ok(value) => {
                savepoint.release()?;
                Ok(value)
            }
            Err(error) => match savepoint.rollback() {
                Ok(()) => Err(error),
                Err(rollback_error) => {
                    Err(error.context(format!("Savepoint rollback failed: {rollback_error:?}")))
                }
            },
        }
    }

    /// Make the changes of the unit of work durable.
    pub fn commit(self) -> StdResult<()> {
        self.transaction.commit()
    }

    /// Discard the changes of the unit of work.
    pub fn rollback(self) -> StdResult<()> {
        self.transaction.rollback()
    }
}
