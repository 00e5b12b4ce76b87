use std::sync::Arc;

use anyhow::Context;
use relata_persistence::StdResult;
use relata_persistence::configuration::DataAccessConfiguration;
use relata_persistence::database::{DataContext, Executor, Session, UnitOfWork};
use relata_persistence::logging::LoggerExtensions;
use slog::{Logger, info};

use crate::database::{create_tables, storefront_registry};

/// Storefront data context with its tables created.
#[derive(Clone)]
pub struct StorefrontStore {
    context: DataContext,
    logger: Logger,
}

impl StorefrontStore {
    /// Open the database described by the configuration and create the
    /// storefront tables that are missing.
    pub fn open(configuration: &DataAccessConfiguration, logger: Logger) -> StdResult<Self> {
        let registry = storefront_registry().with_context(|| "Storefront registry build error")?;
        let context = DataContext::from_configuration(Arc::new(registry), configuration, logger.clone())?;

        Self::from_context(context, logger)
    }

    /// Wrap an existing data context, its registry must know the storefront records.
    pub fn from_context(context: DataContext, logger: Logger) -> StdResult<Self> {
        let logger = logger.new_with_component_name::<Self>();
        context.run(create_tables)?;
        info!(logger, "Storefront store opened"; "dialect" => context.dialect().name());

        Ok(Self { context, logger })
    }

    /// Underlying data context
    pub fn context(&self) -> &DataContext {
        &self.context
    }

    /// Acquire a connection for a session.
    pub fn session(&self) -> StdResult<Session<'_>> {
        self.context.session()
    }

    /// Run the operation outside of any unit of work.
    pub fn run<T>(&self, operation: impl FnOnce(&Executor<'_>) -> StdResult<T>) -> StdResult<T> {
        self.context.run(operation)
    }

    /// Run the operation in a unit of work committed on success.
    pub fn with_transaction<T>(
        &self,
        operation: impl FnOnce(&UnitOfWork<'_>) -> StdResult<T>,
    ) -> StdResult<T> {
        self.context.with_transaction(operation)
    }

    /// Optimize the database and close its connections.
    pub fn close(self) -> StdResult<()> {
        info!(self.logger, "Closing storefront store");
        self.context.shutdown()
    }
}
