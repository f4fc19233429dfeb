//! Statement execution on an open connection
//!
//! Everything here runs synchronously on the session worker and talks to the
//! database through [`DbConnection`](crate::connection::DbConnection).

mod aggregator;
mod pipe;
mod reference;
mod update;
mod value;

pub use aggregator::{ResultAggregator, ResultGrid, Step};
pub use pipe::pipe_to_shell;
pub use reference::{Reference, ReferenceResolver, REFERENCE_LOOKUP};
pub use update::RecordUpdater;
pub use value::Value;

use std::time::Instant;

use crate::connection::{DbConnection, DriverError, RowSet};
use crate::metrics::metrics;
use crate::session::EventSink;

/// Failure while running a job's statements
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("No table selected")]
    NoScope,

    #[error("Error finding reference for column {0}")]
    ReferenceNotFound(String),

    #[error("No unique key found for table {0}")]
    NoUniqueKey(String),

    #[error("{0}")]
    Statement(#[from] DriverError),

    #[error("Pipe command failed: {0}")]
    PipeCommand(String),
}

impl QueryError {
    /// Label used for the error metrics
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::NoScope => "no_scope",
            QueryError::ReferenceNotFound(_) => "reference_not_found",
            QueryError::NoUniqueKey(_) => "no_unique_key",
            QueryError::Statement(_) => "statement",
            QueryError::PipeCommand(_) => "pipe_command",
        }
    }
}

/// Execute one statement, announcing it first and timing it
pub fn execute(
    conn: &mut dyn DbConnection,
    events: &EventSink,
    sql: &str,
    params: &[Value],
) -> Result<Option<RowSet>, QueryError> {
    events.query_executed(sql, params);
    let started = Instant::now();
    let result = conn.execute(sql, params);
    metrics().record_statement(started.elapsed().as_secs_f64());
    Ok(result?)
}
