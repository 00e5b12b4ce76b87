use std::ops::Deref;
use std::time::Duration;

use relata_resource_pool::{
    Reset, ResourcePool, ResourcePoolConfig, ResourcePoolError, ResourcePoolItem,
};
use slog::{Logger, debug};

use crate::configuration::DataAccessConfiguration;
use crate::sqlite::{ConnectionBuilder, ConnectionOptions, SqliteConnection};
use crate::{DataAccessError, StdResult};

/// SqliteConnection wrapper for a pooled connection
pub struct SqlitePooledConnection(SqliteConnection);

impl SqlitePooledConnection {
    /// Create a new SqlitePooledConnection
    pub fn new(connection: SqliteConnection) -> Self {
        Self(connection)
    }
}

impl Deref for SqlitePooledConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Reset for SqlitePooledConnection {}

/// Pool of Sqlite connections
pub struct SqliteConnectionPool {
    connection_pool: ResourcePool<SqlitePooledConnection>,
    acquire_timeout: Duration,
}

impl SqliteConnectionPool {
    /// Time waited for a connection when none is configured.
    pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(1000);

    /// Create a new pool with the given size by calling the given builder function
    pub fn build(
        size: usize,
        builder: impl Fn() -> StdResult<SqliteConnection>,
    ) -> StdResult<Self> {
        let mut connections: Vec<SqlitePooledConnection> = Vec::with_capacity(size);
        for _count in 0..size {
            connections.push(SqlitePooledConnection::new(builder()?));
        }

        Ok(Self {
            connection_pool: ResourcePool::new(connections.len(), connections),
            acquire_timeout: Self::DEFAULT_ACQUIRE_TIMEOUT,
        })
    }

    /// Create an empty pool opening connections on demand, within the limits of `config`
    pub fn with_factory(
        config: ResourcePoolConfig,
        acquire_timeout: Duration,
        builder: impl Fn() -> StdResult<SqliteConnection> + Send + Sync + 'static,
    ) -> Self {
        Self {
            connection_pool: ResourcePool::with_factory(config, move || {
                builder().map(SqlitePooledConnection::new)
            }),
            acquire_timeout,
        }
    }

    /// Returns a single resource pool connection
    pub fn build_from_connection(connection: SqliteConnection) -> Self {
        let connection_pool = ResourcePool::new(1, vec![SqlitePooledConnection::new(connection)]);

        Self {
            connection_pool,
            acquire_timeout: Self::DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    /// Create the pool described by the configuration.
    ///
    /// An in-memory database is private to the connection that opened it, its pool
    /// holds that single connection.
    pub fn from_configuration(
        configuration: &DataAccessConfiguration,
        logger: &Logger,
    ) -> StdResult<Self> {
        let connection_string = configuration.connection_string()?;
        let mut builder =
            ConnectionBuilder::from_connection_string(&connection_string).with_logger(logger.clone());
        if configuration.enable_foreign_keys {
            builder = builder.with_options(&[ConnectionOptions::EnableForeignKeys]);
        }

        if builder.is_memory() {
            debug!(logger, "In-memory database, the connection pool holds a single connection");
            let mut pool = Self::build_from_connection(builder.build()?);
            pool.acquire_timeout = configuration.acquire_timeout();
            return Ok(pool);
        }

        Ok(Self::with_factory(
            configuration.pool_config(),
            configuration.acquire_timeout(),
            move || builder.clone().build(),
        ))
    }

    /// Get a connection from the pool
    ///
    /// Fails with [DataAccessError::PoolExhausted] when no connection frees up in time.
    pub fn connection(&self) -> StdResult<ResourcePoolItem<'_, SqlitePooledConnection>> {
        self.connection_pool
            .acquire_resource(self.acquire_timeout)
            .map_err(|error| match error.downcast_ref::<ResourcePoolError>() {
                Some(ResourcePoolError::AcquireTimeout) => {
                    error.context(DataAccessError::PoolExhausted(self.acquire_timeout))
                }
                _ => error,
            })
    }

    /// Close the idle connections, the acquired ones are closed when given back.
    pub fn clear(&self) -> StdResult<()> {
        self.connection_pool.clear()
    }

    /// Maximum number of open connections
    pub fn size(&self) -> usize {
        self.connection_pool.size()
    }

    /// Number of open connections, idle or acquired
    pub fn open_count(&self) -> StdResult<usize> {
        self.connection_pool.open_count()
    }

    /// Number of idle connections
    pub fn idle_count(&self) -> StdResult<usize> {
        self.connection_pool.count()
    }

    /// Time waited for a connection
    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }
}
