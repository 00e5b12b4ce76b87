use std::fmt::{Display, Formatter};

use sqlite::Value;

use crate::sqlite::SqlDialect;

/// Replace every `?*` marker of `sql` with the placeholder of its position (starting at 1).
pub fn number_placeholders(sql: &str, placeholder: impl Fn(usize) -> String) -> String {
    let mut parts = sql.split("?*");
    let mut numbered = parts.next().unwrap_or_default().to_string();
    for (index, part) in parts.enumerate() {
        numbered.push_str(&placeholder(index + 1));
        numbered.push_str(part);
    }

    numbered
}

/// A statement text with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    sql: String,
    parameters: Vec<Value>,
}

impl SqlStatement {
    /// Statement with ready to run SQL.
    pub fn new(sql: &str, parameters: Vec<Value>) -> Self {
        Self {
            sql: sql.to_string(),
            parameters,
        }
    }

    /// Statement from SQL with `?*` markers, numbered with the placeholders of the dialect.
    pub fn from_raw(raw_sql: &str, parameters: Vec<Value>, dialect: &dyn SqlDialect) -> Self {
        Self {
            sql: number_placeholders(raw_sql, |index| dialect.placeholder(index)),
            parameters,
        }
    }

    /// SQL text
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters
    pub fn parameters(&self) -> &[Value] {
        &self.parameters
    }
}

impl Display for SqlStatement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql.replace('\n', " ").trim())
    }
}

#[cfg(test)]
mod tests {
    use crate::sqlite::{MySqlDialect, SqliteDialect};

    use super::*;

    #[test]
    fn number_placeholders_in_order() {
        assert_eq!(
            "a = $1 and b in ($2, $3)",
            number_placeholders("a = ?* and b in (?*, ?*)", |index| format!("${index}"))
        );
        assert_eq!("no parameter", number_placeholders("no parameter", |_| "?".to_string()));
    }

    #[test]
    fn from_raw_uses_dialect_placeholders() {
        let sqlite = SqlStatement::from_raw("x = ?* or y = ?*", Vec::new(), &SqliteDialect);
        let mysql = SqlStatement::from_raw("x = ?* or y = ?*", Vec::new(), &MySqlDialect);

        assert_eq!("x = ?1 or y = ?2", sqlite.sql());
        assert_eq!("x = ? or y = ?", mysql.sql());
    }
}
