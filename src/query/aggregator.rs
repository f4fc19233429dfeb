use tracing::debug;

use super::{execute, QueryError, Value};
use crate::connection::DbConnection;
use crate::session::EventSink;

/// Tabular result delivered to the caller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultGrid {
    pub columns: Vec<String>,
    /// Rows, each aligned to `columns`
    pub rows: Vec<Vec<Value>>,
}

impl ResultGrid {
    /// Grid without columns or rows
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }

    /// Rows as comma-joined lines, NULL as an empty field
    pub fn to_lines(&self) -> String {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(Value::to_field)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Outcome of folding one statement into the aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The first statement returned an empty row-set; the job is over
    EmptyFirst,
}

/// Runs statements on one connection and merges their row-sets
///
/// Columns are append-only. A row-set whose header differs from the
/// aggregate header gets its columns appended, and its rows start after the
/// columns that existed before it. Missing cells are NULL.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    grid: ResultGrid,
    executed: usize,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute `sql` and fold its row-set into the aggregate
    pub fn execute(
        &mut self,
        conn: &mut dyn DbConnection,
        sql: &str,
        params: &[Value],
        events: &EventSink,
    ) -> Result<Step, QueryError> {
        let result = execute(conn, events, sql, params);

        let first = self.executed == 0;
        self.executed += 1;

        let Some(set) = result? else {
            return Ok(Step::Continue);
        };

        if first && set.rows.is_empty() {
            debug!(sql = %sql, "First statement returned no rows");
            return Ok(Step::EmptyFirst);
        }

        let offset = if set.columns == self.grid.columns {
            0
        } else {
            let offset = self.grid.columns.len();
            self.grid.columns.extend(set.columns);
            offset
        };

        for row in set.rows {
            let mut aligned = vec![Value::Null; offset];
            aligned.extend(row);
            self.grid.rows.push(aligned);
        }
        Ok(Step::Continue)
    }

    /// Aggregated grid with every row padded to the full width
    pub fn finish(self) -> ResultGrid {
        let mut grid = self.grid;
        let width = grid.columns.len();
        for row in &mut grid.rows {
            row.resize(width, Value::Null);
        }
        grid
    }
}
