use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::lexer::{is_identifier_char, trailing_line_comment};
use crate::session::Scope;

static USE_DATABASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*use\s*`?([a-z0-9_]+)").unwrap());
static FROM_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfrom\s+`?([a-z0-9_]+)`?\.?`?([a-z0-9_]+)?`?").unwrap()
});

/// Statement classes the rewriter cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementKind {
    Use,
    Select,
    Other,
}

impl StatementKind {
    /// Classify by leading keyword
    fn of(sql: &str) -> Self {
        let sql = sql.trim_start();
        if starts_with_keyword(sql, "USE") {
            StatementKind::Use
        } else if starts_with_keyword(sql, "SELECT") {
            StatementKind::Select
        } else {
            StatementKind::Other
        }
    }
}

/// Rewritten statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub sql: String,
    /// A `USE` switched the current database
    pub database_changed: bool,
}

/// Tracks scope and caps interactive SELECTs
#[derive(Debug, Clone)]
pub struct QueryRewriter {
    row_limit: u64,
}

impl QueryRewriter {
    pub fn new(row_limit: u64) -> Self {
        Self { row_limit }
    }

    /// Rewrite one statement, updating `scope` from what it references
    ///
    /// - `USE db` sets the current database, statement unchanged
    /// - `SELECT` gets ` LIMIT <row_limit>` appended and moves the scope to
    ///   the table of its FROM clause when one can be found; a trailing line
    ///   comment is dropped so the limit stays in effect
    /// - anything else passes through
    pub fn rewrite(&self, sql: &str, scope: &mut Scope) -> Rewrite {
        match StatementKind::of(sql) {
            StatementKind::Use => {
                let database = Self::database_from_use(sql);
                let database_changed = database.is_some();
                if let Some(db) = database {
                    debug!(database = %db, "USE changes scope");
                    scope.database = Some(db);
                }
                Rewrite {
                    sql: sql.to_string(),
                    database_changed,
                }
            }
            StatementKind::Select => {
                let (database, table) = Self::table_from_query(sql);
                if let Some(db) = database {
                    scope.database = Some(db);
                }
                if let Some(table) = table {
                    scope.table = Some(table);
                }
                let body = match trailing_line_comment(sql) {
                    Some(pos) => sql[..pos].trim_end(),
                    None => sql,
                };
                Rewrite {
                    sql: format!("{} LIMIT {}", body, self.row_limit),
                    database_changed: false,
                }
            }
            StatementKind::Other => Rewrite {
                sql: sql.to_string(),
                database_changed: false,
            },
        }
    }

    /// Target of a `USE` statement
    ///
    /// # Examples
    /// - `use foo` -> `foo`
    /// - ``use `foo`.bar`` -> `foo`
    pub fn database_from_use(sql: &str) -> Option<String> {
        USE_DATABASE
            .captures(sql)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// `(database, table)` referenced by the first FROM clause
    ///
    /// A single unqualified name is the table.
    ///
    /// # Examples
    /// - `select * from foo.bar` -> `(Some(foo), Some(bar))`
    /// - ``select * from `bar` `` -> `(None, Some(bar))`
    pub fn table_from_query(sql: &str) -> (Option<String>, Option<String>) {
        let Some(caps) = FROM_TABLE.captures(sql) else {
            return (None, None);
        };
        let first = caps.get(1).map(|m| m.as_str().to_string());
        match caps.get(2) {
            Some(table) => (first, Some(table.as_str().to_string())),
            None => (None, first),
        }
    }
}

impl Default for QueryRewriter {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Case-insensitive keyword prefix followed by a word boundary
fn starts_with_keyword(s: &str, keyword: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= keyword.len()
        && bytes[..keyword.len()].eq_ignore_ascii_case(keyword.as_bytes())
        && bytes
            .get(keyword.len())
            .map_or(true, |&b| !is_identifier_char(b))
}
