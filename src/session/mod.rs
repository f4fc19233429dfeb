//! Session worker: owns one connection and processes jobs in order
//!
//! Every session runs on its own blocking task. Jobs arrive over an unbounded
//! channel and are handled strictly one at a time; results and notifications
//! go back over the [`Event`] channel returned by [`SessionEngine::spawn`].

mod job;
mod state;

pub use job::{Event, EventSink, Job, JobKind, UnknownJobKind};
pub use state::{Scope, Session};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::connection::{ConnectError, ConnectionManager, Connector, DbConnection, RowSet};
use crate::metrics::metrics;
use crate::parser::{QueryRewriter, StatementSplitter};
use crate::query::{
    execute, pipe_to_shell, QueryError, RecordUpdater, ReferenceResolver, ResultAggregator,
    ResultGrid, Step, Value,
};
use crate::registry::SessionId;

/// Lifecycle of a session's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Disconnected,
    Connecting,
    Ready,
    Busy,
}

/// Job failure, reported as an `error` event
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    Connect(#[from] ConnectError),

    #[error("No active connection")]
    NoConnection,

    #[error("Connect job without a usable connection profile")]
    MissingProfile,

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl SessionError {
    /// Label used for the error metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Connect(_) => "connect",
            SessionError::NoConnection => "no_connection",
            SessionError::MissingProfile => "missing_profile",
            SessionError::Query(e) => e.kind(),
        }
    }
}

/// Caller side of a running session
pub struct EngineHandle {
    id: SessionId,
    jobs: mpsc::UnboundedSender<Job>,
    state: watch::Receiver<EngineState>,
    worker: JoinHandle<()>,
}

impl EngineHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Last state published by the worker
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Queue a job; fails once the worker has stopped
    pub fn submit(&self, job: Job) -> Result<(), SendError<Job>> {
        self.jobs.send(job)
    }

    /// Queue a job named by its string tag
    ///
    /// Unknown tags are logged and dropped.
    pub fn submit_tag(
        &self,
        tag: &str,
        primary: &str,
        secondary: Option<String>,
        payload: Option<HashMap<String, Value>>,
    ) -> Result<(), SendError<Job>> {
        match Job::from_tag(tag, primary, secondary, payload) {
            Ok(job) => self.submit(job),
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Ignoring job");
                Ok(())
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }

    /// Stop accepting jobs and wait until the queued ones are done
    pub async fn join(self) {
        drop(self.jobs);
        if let Err(e) = self.worker.await {
            warn!(session_id = %self.id, error = %e, "Session worker panicked");
        }
    }
}

/// The single worker owning a [`Session`]
pub struct SessionEngine {
    id: SessionId,
    session: Session,
    state: watch::Sender<EngineState>,
    manager: ConnectionManager,
    rewriter: QueryRewriter,
    config: EngineConfig,
    events: EventSink,
    /// Lets the worker queue follow-up jobs without keeping its queue open
    requeue: mpsc::WeakUnboundedSender<Job>,
}

impl SessionEngine {
    /// Start a worker on the blocking pool
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        id: SessionId,
        connector: Arc<dyn Connector>,
        config: EngineConfig,
    ) -> (EngineHandle, mpsc::UnboundedReceiver<Event>) {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = EventSink::channel();
        let (state, state_rx) = watch::channel(EngineState::Disconnected);

        let engine = SessionEngine {
            id,
            session: Session::new(),
            state,
            manager: ConnectionManager::new(connector, config.clone()),
            rewriter: QueryRewriter::new(config.row_limit),
            config,
            events,
            requeue: job_tx.downgrade(),
        };
        let worker = tokio::task::spawn_blocking(move || engine.run(job_rx));

        let handle = EngineHandle {
            id,
            jobs: job_tx,
            state: state_rx,
            worker,
        };
        (handle, event_rx)
    }

    fn run(mut self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        info!(session_id = %self.id, "Session worker started");

        while let Some(job) = jobs.blocking_recv() {
            if !self.handle(job) {
                break;
            }
        }
        jobs.close();

        self.session.disconnect();
        self.set_state(EngineState::Disconnected);
        info!(session_id = %self.id, "Session worker stopped");
    }

    /// Process one job; returns false when the worker should stop
    #[instrument(skip(self, job), fields(session_id = %self.id, job = %job.kind, primary = %truncate_sql(&job.primary, 100)))]
    fn handle(&mut self, job: Job) -> bool {
        metrics().record_job(job.kind.as_str());
        debug!(state = ?self.current_state(), "Handling job");

        let result = match job.kind {
            JobKind::Disconnect => {
                self.session.disconnect();
                self.set_state(EngineState::Disconnected);
                info!("Disconnected");
                return false;
            }
            JobKind::Connect => self.busy(|engine| engine.connect(&job)),
            JobKind::ChangeConnection => {
                self.session = Session::new();
                self.set_state(EngineState::Disconnected);
                self.busy(|engine| engine.connect(&job))
            }
            kind if kind.needs_connection() && !self.session.is_connected() => {
                Err(SessionError::NoConnection)
            }
            JobKind::Query => self.busy(|engine| engine.run_text(&job.primary, &[])),
            JobKind::TableList => self.busy(|engine| engine.table_list(&job.primary)),
            JobKind::TableData => {
                let sql = format!("select * from `{}`", job.primary);
                self.busy(|engine| engine.run_text(&sql, &[]))
            }
            JobKind::TableContents => {
                let sql = format!("show columns in `{}`", job.primary);
                self.busy(|engine| engine.run_text(&sql, &[]))
            }
            JobKind::DbList => self.busy(|engine| engine.db_list()),
            JobKind::GetReference => self.busy(|engine| {
                engine.get_reference(&job.primary, job.secondary.as_deref())
            }),
            JobKind::Commit => self.busy(|engine| {
                engine.connection()?.commit().map_err(QueryError::from)?;
                engine.events.info("Committed.");
                Ok(())
            }),
            JobKind::Rollback => self.busy(|engine| {
                engine.connection()?.rollback().map_err(QueryError::from)?;
                engine.events.info("Rolled back.");
                Ok(())
            }),
            JobKind::Update => self.busy(|engine| engine.update(&job)),
        };

        if let Err(e) = result {
            self.report(e);
        }
        true
    }

    /// Run `f` between `busy(true)` and `busy(false)`
    fn busy<F>(&mut self, f: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut Self) -> Result<(), SessionError>,
    {
        if self.current_state() == EngineState::Ready {
            self.set_state(EngineState::Busy);
        }
        self.events.busy(true);
        let result = f(self);
        if self.current_state() == EngineState::Busy {
            self.set_state(EngineState::Ready);
        }
        self.events.busy(false);
        result
    }

    fn current_state(&self) -> EngineState {
        *self.state.borrow()
    }

    fn set_state(&self, state: EngineState) {
        self.state.send_replace(state);
    }

    fn report(&self, error: SessionError) {
        metrics().record_job_error(error.kind());
        warn!(session_id = %self.id, error = %error, "Job failed");
        self.events.error(error.to_string());
    }

    fn connection(&mut self) -> Result<&mut dyn DbConnection, SessionError> {
        self.session
            .link()
            .map(|link| link.connection())
            .ok_or(SessionError::NoConnection)
    }

    fn enqueue(&self, job: Job) {
        match self.requeue.upgrade() {
            Some(tx) => {
                let _ = tx.send(job);
            }
            None => debug!(job = %job.kind, "Queue closed, follow-up job dropped"),
        }
    }

    fn connect(&mut self, job: &Job) -> Result<(), SessionError> {
        let profile = job.profile().ok_or(SessionError::MissingProfile)?;

        self.session.disconnect();
        self.set_state(EngineState::Connecting);
        info!(connection = %profile, "Connecting");

        match self.manager.connect(&profile) {
            Ok(link) => {
                self.session.attach(link);
                self.set_state(EngineState::Ready);
                self.events.info(format!("Connected to: {}.", profile.label));
                self.enqueue(Job::new(JobKind::DbList, ""));
                Ok(())
            }
            Err(e) => {
                self.set_state(EngineState::Disconnected);
                Err(e.into())
            }
        }
    }

    /// Split, rewrite, expand and execute `text`, then deliver one grid
    fn run_text(&mut self, text: &str, params: &[Value]) -> Result<(), SessionError> {
        let split = StatementSplitter::split(text);
        let events = &self.events;
        let Session {
            link,
            scope,
            variables,
            ..
        } = &mut self.session;
        let conn = link
            .as_mut()
            .ok_or(SessionError::NoConnection)?
            .connection();

        let mut aggregator = ResultAggregator::new();
        for raw in &split.statements {
            let rewrite = self.rewriter.rewrite(raw, scope);
            if rewrite.database_changed {
                if let Some(db) = &scope.database {
                    events.send(Event::ScopeChanged(db.clone()));
                }
            }

            let expansion = variables.expand(&rewrite.sql);
            for capture in expansion.pending() {
                let set = execute(conn, events, &capture.query, &[])?;
                variables.resolve(&capture.name, first_column(set.as_ref()));
            }

            for sql in variables.statements(&expansion) {
                if aggregator.execute(conn, &sql, params, events)? == Step::EmptyFirst {
                    events.send(Event::Result(ResultGrid::empty()));
                    return Ok(());
                }
            }
        }

        let grid = aggregator.finish();
        if let Some(command) = &split.pipe_command {
            match pipe_to_shell(&self.config.shell, command, &grid) {
                Ok(output) => self.events.info(output),
                Err(e) => self.report(e.into()),
            }
        }
        self.events.send(Event::Result(grid));
        Ok(())
    }

    fn table_list(&mut self, database: &str) -> Result<(), SessionError> {
        let events = self.events.clone();
        let conn = self.connection()?;
        execute(conn, &events, &format!("use `{}`", database), &[])?;

        self.session.scope.database = Some(database.to_string());
        events.send(Event::ScopeChanged(database.to_string()));

        if let Some(tables) = self.session.cached_tables(database) {
            debug!(database = %database, tables = tables.len(), "Table list from cache");
            events.send(Event::TableList(tables.to_vec()));
            return Ok(());
        }

        let conn = self.connection()?;
        let set = execute(conn, &events, "SHOW TABLES", &[])?;
        let tables = first_column(set.as_ref());
        self.session.cache_tables(database, tables.clone());
        events.send(Event::TableList(tables));
        Ok(())
    }

    fn db_list(&mut self) -> Result<(), SessionError> {
        let events = self.events.clone();
        let conn = self.connection()?;
        let set = execute(conn, &events, "show databases", &[])?;

        let names = match set {
            Some(set) => {
                let idx = set.column_index("Database").unwrap_or(0);
                set.rows
                    .iter()
                    .filter_map(|row| row.get(idx).and_then(Value::as_text))
                    .filter(|name| !self.config.system_databases.contains(name))
                    .collect()
            }
            None => Vec::new(),
        };

        let connection = self.session.label().unwrap_or_default().to_string();
        events.send(Event::DbList { names, connection });
        Ok(())
    }

    fn get_reference(&mut self, column: &str, value: Option<&str>) -> Result<(), SessionError> {
        let reference = {
            let Session { link, scope, .. } = &mut self.session;
            let conn = link
                .as_mut()
                .ok_or(SessionError::NoConnection)?
                .connection();
            ReferenceResolver::resolve(conn, scope, column, &self.events)?
        };

        let value = value.map(Value::from).unwrap_or(Value::Null);
        self.run_text(&reference.select_sql(), &[value])
    }

    fn update(&mut self, job: &Job) -> Result<(), SessionError> {
        let record = job.payload.clone().unwrap_or_default();
        let value = job.secondary.clone().map(Value::Text).unwrap_or(Value::Null);

        let sql = {
            let Session { link, scope, .. } = &mut self.session;
            let conn = link
                .as_mut()
                .ok_or(SessionError::NoConnection)?
                .connection();
            RecordUpdater::update(conn, scope, &record, &job.primary, value, &self.events)?
        };
        self.events.info(sql);
        Ok(())
    }
}

/// First cell of every row, stringified
fn first_column(set: Option<&RowSet>) -> Vec<String> {
    set.map(|set| {
        set.rows
            .iter()
            .filter_map(|row| row.first().map(Value::to_string))
            .collect()
    })
    .unwrap_or_default()
}

/// Truncate SQL for logging (avoid huge log entries)
///
/// Uses Cow to avoid allocation when truncation is not needed.
fn truncate_sql(sql: &str, max_len: usize) -> std::borrow::Cow<'_, str> {
    if sql.len() <= max_len {
        return std::borrow::Cow::Borrowed(sql);
    }
    let mut end = max_len;
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!("{}...", &sql[..end]))
}
