use tracing::debug;

use super::{execute, QueryError, Value};
use crate::connection::DbConnection;
use crate::session::{EventSink, Scope};

/// Foreign key lookup for `(schema, table, column)`
pub const REFERENCE_LOOKUP: &str = "SELECT table_name, column_name, referenced_table_name, referenced_column_name \
FROM information_schema.KEY_COLUMN_USAGE \
WHERE constraint_schema = COALESCE(?, DATABASE()) \
AND referenced_column_name IS NOT NULL \
AND table_name = ? \
AND column_name = ?";

/// Target of a foreign key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub table: String,
    pub column: String,
}

impl Reference {
    /// Statement selecting the referenced rows, value bound as parameter
    pub fn select_sql(&self) -> String {
        format!("select * from `{}` where `{}` = ?", self.table, self.column)
    }
}

/// Finds where a column of the current table points to
pub struct ReferenceResolver;

impl ReferenceResolver {
    pub fn resolve(
        conn: &mut dyn DbConnection,
        scope: &Scope,
        column: &str,
        events: &EventSink,
    ) -> Result<Reference, QueryError> {
        let table = scope.table.as_deref().ok_or(QueryError::NoScope)?;
        let params = [
            Value::from(scope.database.clone()),
            Value::from(table),
            Value::from(column),
        ];

        let set = execute(conn, events, REFERENCE_LOOKUP, &params)?;

        let reference = set.and_then(|set| {
            let row = set.rows.first()?;
            let table = set.get(row, "referenced_table_name")?.as_text()?;
            let column = set.get(row, "referenced_column_name")?.as_text()?;
            Some(Reference { table, column })
        });

        match reference {
            Some(reference) => {
                debug!(
                    column = %column,
                    referenced_table = %reference.table,
                    referenced_column = %reference.column,
                    "Resolved reference"
                );
                Ok(reference)
            }
            None => Err(QueryError::ReferenceNotFound(column.to_string())),
        }
    }
}
