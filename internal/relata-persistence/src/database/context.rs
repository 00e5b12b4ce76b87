use std::sync::Arc;

use relata_resource_pool::ResourcePoolItem;
use slog::{Logger, debug, info};

use crate::StdResult;
use crate::configuration::DataAccessConfiguration;
use crate::logging::LoggerExtensions;
use crate::schema::SchemaRegistry;
use crate::sqlite::{
    SqlDialect, SqliteConnectionPool, SqliteDialect, SqlitePooledConnection, TransactionBehavior,
    classify_error,
};

use super::{Executor, UnitOfWork};

/// Entry point of the data-access layer: the schema registry, the connection
/// pool and the dialect statements are rendered for.
///
/// Cloning is cheap, clones share the registry and the pool.
#[derive(Clone)]
pub struct DataContext {
    registry: Arc<SchemaRegistry>,
    pool: Arc<SqliteConnectionPool>,
    dialect: Arc<dyn SqlDialect>,
    logger: Logger,
}

impl DataContext {
    /// Create a context, the registry must be consistent.
    pub fn new(
        registry: Arc<SchemaRegistry>,
        pool: SqliteConnectionPool,
        logger: Logger,
    ) -> StdResult<Self> {
        registry.validate()?;
        let logger = logger.new_with_component_name::<Self>();
        info!(
            logger, "Data context ready";
            "entities" => registry.kinds().len(), "pool_size" => pool.size()
        );

        Ok(Self {
            registry,
            pool: Arc::new(pool),
            dialect: Arc::new(SqliteDialect),
            logger,
        })
    }

    /// Create a context and its connection pool from the configuration.
    pub fn from_configuration(
        registry: Arc<SchemaRegistry>,
        configuration: &DataAccessConfiguration,
        logger: Logger,
    ) -> StdResult<Self> {
        let pool = SqliteConnectionPool::from_configuration(configuration, &logger)?;

        Self::new(registry, pool, logger)
    }

    /// Replace the dialect statements are rendered for.
    pub fn with_dialect(mut self, dialect: Arc<dyn SqlDialect>) -> Self {
        self.dialect = dialect;
        self
    }

    /// Schema registry
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Connection pool
    pub fn pool(&self) -> &SqliteConnectionPool {
        &self.pool
    }

    /// Dialect
    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    /// Acquire a connection for a session.
    ///
    /// Fails with [DataAccessError::PoolExhausted][crate::DataAccessError::PoolExhausted]
    /// when no connection frees up in time.
    pub fn session(&self) -> StdResult<Session<'_>> {
        Ok(Session {
            connection: self.pool.connection()?,
            context: self,
        })
    }

    /// Run the operation with an executor working outside of any unit of work.
    pub fn run<T>(&self, operation: impl FnOnce(&Executor<'_>) -> StdResult<T>) -> StdResult<T> {
        let session = self.session()?;

        operation(&session.executor())
    }

    /// Run the operation in a unit of work committed on success, rolled back on failure.
    pub fn with_transaction<T>(
        &self,
        operation: impl FnOnce(&UnitOfWork<'_>) -> StdResult<T>,
    ) -> StdResult<T> {
        self.session()?.with_transaction(operation)
    }

    /// Optimize the database and close the idle connections.
    pub fn shutdown(self) -> StdResult<()> {
        {
            let session = self.session()?;
            session
                .connection
                .execute("pragma analysis_limit=400; pragma optimize;")
                .map_err(classify_error)?;
        }
        self.pool.clear()?;
        debug!(self.logger, "Data context shut down");

        Ok(())
    }
}

/// A connection taken from the pool, given back when the session is dropped.
pub struct Session<'a> {
    connection: ResourcePoolItem<'a, SqlitePooledConnection>,
    context: &'a DataContext,
}

impl Session<'_> {
    /// Executor working on the session connection, outside of any unit of work.
    pub fn executor(&self) -> Executor<'_> {
        Executor::new(
            &self.connection,
            &self.context.registry,
            self.context.dialect.as_ref(),
            &self.context.logger,
        )
    }

    /// Begin a unit of work taking the write lock on its first write.
    pub fn begin(&self) -> StdResult<UnitOfWork<'_>> {
        self.begin_with(TransactionBehavior::Deferred)
    }

    /// Begin a unit of work taking the write lock immediately.
    pub fn begin_immediate(&self) -> StdResult<UnitOfWork<'_>> {
        self.begin_with(TransactionBehavior::Immediate)
    }

    /// Run the operation in a unit of work committed on success, rolled back on failure.
    pub fn with_transaction<T>(
        &self,
        operation: impl FnOnce(&UnitOfWork<'_>) -> StdResult<T>,
    ) -> StdResult<T> {
        Self::complete(self.begin()?, operation)
    }

    /// Same as [with_transaction][Self::with_transaction], with the write lock taken at once.
    pub fn with_immediate_transaction<T>(
        &self,
        operation: impl FnOnce(&UnitOfWork<'_>) -> StdResult<T>,
    ) -> StdResult<T> {
        Self::complete(self.begin_immediate()?, operation)
    }

    fn begin_with(&self, behavior: TransactionBehavior) -> StdResult<UnitOfWork<'_>> {
        UnitOfWork::begin(
            &self.connection,
            &self.context.registry,
            self.context.dialect.as_ref(),
            behavior,
            &self.context.logger,
        )
    }

    fn complete<'u, T>(
        unit_of_work: UnitOfWork<'u>,
        operation: impl FnOnce(&UnitOfWork<'u>) -> StdResult<T>,
    ) -> StdResult<T> {
        match operation(&unit_of_work) {
            Ok(value) => {
                unit_of_work.commit()?;
                Ok(value)
            }
            Err(error) => match unit_of_work.rollback() {
                Ok(()) => Err(error),
                Err(rollback_error) => {
                    Err(error.context(format!("Transaction rollback failed: {rollback_error:?}")))
                }
            },
        }
    }
}
