use std::fmt::Debug;

/// Row locking requested by a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrength {
    /// Exclusive lock (`for update`)
    Update,
    /// Shared lock (`for share`)
    Share,
}

/// SQL flavour a statement is rendered for.
pub trait SqlDialect: Debug + Send + Sync {
    /// Dialect name
    fn name(&self) -> &'static str;

    /// Placeholder of the parameter at `index`, starting at 1.
    fn placeholder(&self, index: usize) -> String;

    /// Return true if nested units of work can use savepoints.
    fn supports_savepoints(&self) -> bool {
        true
    }

    /// Return true if insert and update statements accept a `returning` clause.
    fn supports_returning(&self) -> bool;

    /// Expression reading the key generated by the last insert of the connection.
    fn last_insert_id_expression(&self) -> &'static str;

    /// Clause appended to a select to lock the rows it reads.
    fn locking_clause(&self, lock: LockStrength) -> Option<&'static str>;

    /// `limit` / `offset` clause.
    fn limit_clause(&self, limit: Option<usize>, offset: Option<usize>) -> Option<String>;

    /// Clause appended to an insert to update `update_columns` when a row with the
    /// same `conflict_columns` exists, or to skip the row when there is nothing to update.
    fn upsert_clause(&self, conflict_columns: &[String], update_columns: &[String]) -> String;
}

/// SQLite: numbered placeholders, savepoints, `returning`, `on conflict` upserts,
/// no row level locking (lock the database with an immediate transaction instead).
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{index}")
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn last_insert_id_expression(&self) -> &'static str {
        "last_insert_rowid()"
    }

    fn locking_clause(&self, _lock: LockStrength) -> Option<&'static str> {
        None
    }

    fn limit_clause(&self, limit: Option<usize>, offset: Option<usize>) -> Option<String> {
        match (limit, offset) {
            (None, None) => None,
            (Some(limit), None) => Some(format!("limit {limit}")),
            (Some(limit), Some(offset)) => Some(format!("limit {limit} offset {offset}")),
            (None, Some(offset)) => Some(format!("limit -1 offset {offset}")),
        }
    }

    fn upsert_clause(&self, conflict_columns: &[String], update_columns: &[String]) -> String {
        if update_columns.is_empty() {
            return format!("on conflict ({}) do nothing", conflict_columns.join(", "));
        }
        let assignments = update_columns
            .iter()
            .map(|column| format!("{column} = excluded.{column}"))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "on conflict ({}) do update set {assignments}",
            conflict_columns.join(", ")
        )
    }
}

/// MySQL: positional placeholders, savepoints, `for update` / `for share`,
/// `on duplicate key update` upserts, no `returning`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn supports_returning(&self) -> bool {
        false
    }

    fn last_insert_id_expression(&self) -> &'static str {
        "last_insert_id()"
    }

    fn locking_clause(&self, lock: LockStrength) -> Option<&'static str> {
        match lock {
            LockStrength::Update => Some("for update"),
            LockStrength::Share => Some("for share"),
        }
    }

    fn limit_clause(&self, limit: Option<usize>, offset: Option<usize>) -> Option<String> {
        match (limit, offset) {
            (None, None) => None,
            (Some(limit), None) => Some(format!("limit {limit}")),
            (Some(limit), Some(offset)) => Some(format!("limit {limit} offset {offset}")),
            (None, Some(offset)) => Some(format!("limit {} offset {offset}", u64::MAX)),
        }
    }

    fn upsert_clause(&self, conflict_columns: &[String], update_columns: &[String]) -> String {
        // MySQL resolves conflicts on any unique key, a no-op assignment skips the row
        let assignments = if update_columns.is_empty() {
            conflict_columns
                .iter()
                .map(|column| format!("{column} = {column}"))
                .collect::<Vec<_>>()
        } else {
            update_columns
                .iter()
                .map(|column| format!("{column} = values({column})"))
                .collect::<Vec<_>>()
        };

        format!("on duplicate key update {}", assignments.join(", "))
    }
}
