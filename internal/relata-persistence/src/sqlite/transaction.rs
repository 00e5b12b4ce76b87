use std::sync::atomic::{AtomicUsize, Ordering};

use slog::{Logger, debug, error};

use crate::StdResult;
use crate::sqlite::{SqliteConnection, classify_error};

/// How a transaction acquires the database lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionBehavior {
    /// The lock is taken by the first statement that needs it.
    Deferred,
    /// The write lock is taken when the transaction begins, other writers wait.
    Immediate,
}

/// Sqlite transaction wrapper.
///
/// Transactions are automatically rolled back if this struct object is dropped and
/// the transaction was not committed.
pub struct Transaction<'a> {
    connection: &'a SqliteConnection,
    // An active transaction is one that has yet to be committed or rolled back.
    is_active: bool,
    logger: Logger,
}

impl<'a> Transaction<'a> {
    /// Begin a new transaction.
    pub fn begin(
        connection: &'a SqliteConnection,
        behavior: TransactionBehavior,
        logger: &Logger,
    ) -> StdResult<Self> {
        let sql = match behavior {
            TransactionBehavior::Deferred => "BEGIN DEFERRED TRANSACTION",
            TransactionBehavior::Immediate => "BEGIN IMMEDIATE TRANSACTION",
        };
        connection
            .execute(sql)
            .map_err(|e| classify_error(e).context("Begin transaction error"))?;
        debug!(logger, "Transaction begun"; "behavior" => ?behavior);

        Ok(Self {
            connection,
            is_active: true,
            logger: logger.clone(),
        })
    }

    /// Commit the transaction.
    ///
    /// When the engine refuses to commit, the transaction is rolled back.
    pub fn commit(mut self) -> StdResult<()> {
        self.is_active = false;
        if let Err(commit_error) = self.connection.execute("COMMIT TRANSACTION") {
            let commit_error = classify_error(commit_error);
            return match self.connection.execute("ROLLBACK TRANSACTION") {
                Ok(()) => {
                    debug!(self.logger, "Transaction rolled back after a failed commit");
                    Err(commit_error.context("Commit transaction error"))
                }
                Err(rollback_error) => {
                    error!(self.logger, "Rollback after a failed commit failed"; "error" => %rollback_error);
                    Err(commit_error.context(format!(
                        "Commit transaction error, rollback failed: {rollback_error}"
                    )))
                }
            };
        }
        debug!(self.logger, "Transaction committed");

        Ok(())
    }

    /// Rollback the transaction.
    pub fn rollback(mut self) -> StdResult<()> {
        self.is_active = false;
        self.connection
            .execute("ROLLBACK TRANSACTION")
            .map_err(|e| classify_error(e).context("Rollback transaction error"))?;
        debug!(self.logger, "Transaction rolled back");

        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.is_active {
            match self.connection.execute("ROLLBACK TRANSACTION") {
                Ok(()) => debug!(self.logger, "Transaction rolled back on drop"),
                Err(e) => {
                    error!(self.logger, "Rollback of a dropped transaction failed"; "error" => %e)
                }
            }
        }
    }
}

static SAVEPOINT_SEQUENCE: AtomicUsize = AtomicUsize::new(1);

/// Named savepoint, nested inside a transaction or opening one in autocommit mode.
///
/// Dropping an active savepoint rolls back to it.
pub struct Savepoint<'a> {
    connection: &'a SqliteConnection,
    name: String,
    is_active: bool,
    logger: Logger,
}

impl<'a> Savepoint<'a> {
    /// Open a savepoint with a unique name.
    pub fn open(connection: &'a SqliteConnection, logger: &Logger) -> StdResult<Self> {
        let name = format!(
            "relata_sp_{}",
            SAVEPOINT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        connection
            .execute(format!("SAVEPOINT {name}"))
            .map_err(|e| classify_error(e).context(format!("Open savepoint '{name}' error")))?;
        debug!(logger, "Savepoint opened"; "savepoint" => &name);

        Ok(Self {
            connection,
            name,
            is_active: true,
            logger: logger.clone(),
        })
    }

    /// Savepoint name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keep the changes made since the savepoint.
    pub fn release(mut self) -> StdResult<()> {
        self.is_active = false;
        self.connection
            .execute(format!("RELEASE SAVEPOINT {}", self.name))
            .map_err(|e| {
                classify_error(e).context(format!("Release savepoint '{}' error", self.name))
            })?;
        debug!(self.logger, "Savepoint released"; "savepoint" => &self.name);

        Ok(())
    }

    /// Undo the changes made since the savepoint.
    pub fn rollback(mut self) -> StdResult<()> {
        self.is_active = false;
        self.rollback_to()
    }

    fn rollback_to(&self) -> StdResult<()> {
        self.connection
            .execute(format!(
                "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}",
                name = self.name
            ))
            .map_err(|e| {
                classify_error(e).context(format!("Rollback to savepoint '{}' error", self.name))
            })?;
        debug!(self.logger, "Savepoint rolled back"; "savepoint" => &self.name);

        Ok(())
    }
}

impl Drop for Savepoint<'_> {
    fn drop(&mut self) {
        if self.is_active {
            if let Err(e) = self.rollback_to() {
                error!(self.logger, "Rollback of a dropped savepoint failed"; "error" => ?e);
            }
        }
    }
}
