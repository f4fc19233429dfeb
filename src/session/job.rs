use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use tokio::sync::mpsc;

use crate::config::ConnectionProfile;
use crate::query::{ResultGrid, Value};

/// Kinds of work a session accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Connect,
    Disconnect,
    Query,
    TableList,
    TableData,
    TableContents,
    DbList,
    GetReference,
    Commit,
    Rollback,
    Update,
    ChangeConnection,
}

impl JobKind {
    pub const ALL: [JobKind; 12] = [
        JobKind::Connect,
        JobKind::Disconnect,
        JobKind::Query,
        JobKind::TableList,
        JobKind::TableData,
        JobKind::TableContents,
        JobKind::DbList,
        JobKind::GetReference,
        JobKind::Commit,
        JobKind::Rollback,
        JobKind::Update,
        JobKind::ChangeConnection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Connect => "connect",
            JobKind::Disconnect => "disconnect",
            JobKind::Query => "query",
            JobKind::TableList => "table_list",
            JobKind::TableData => "table_data",
            JobKind::TableContents => "table_contents",
            JobKind::DbList => "db_list",
            JobKind::GetReference => "get_reference",
            JobKind::Commit => "commit",
            JobKind::Rollback => "rollback",
            JobKind::Update => "update",
            JobKind::ChangeConnection => "change_connection",
        }
    }

    /// Whether the job needs an open connection
    pub fn needs_connection(&self) -> bool {
        !matches!(
            self,
            JobKind::Connect | JobKind::ChangeConnection | JobKind::Disconnect
        )
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown job kind: {0}")]
pub struct UnknownJobKind(pub String);

impl FromStr for JobKind {
    type Err = UnknownJobKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownJobKind(s.to_string()))
    }
}

/// One unit of work for a session engine
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub kind: JobKind,
    pub primary: String,
    pub secondary: Option<String>,
    pub payload: Option<HashMap<String, Value>>,
}

impl Job {
    pub fn new(kind: JobKind, primary: impl Into<String>) -> Self {
        Self {
            kind,
            primary: primary.into(),
            secondary: None,
            payload: None,
        }
    }

    pub fn with_secondary(mut self, secondary: impl Into<String>) -> Self {
        self.secondary = Some(secondary.into());
        self
    }

    pub fn with_payload(mut self, payload: HashMap<String, Value>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Build a job from its string tag
    pub fn from_tag(
        tag: &str,
        primary: impl Into<String>,
        secondary: Option<String>,
        payload: Option<HashMap<String, Value>>,
    ) -> Result<Self, UnknownJobKind> {
        Ok(Self {
            kind: tag.parse()?,
            primary: primary.into(),
            secondary,
            payload,
        })
    }

    pub fn connect(profile: &ConnectionProfile) -> Self {
        Self::new(JobKind::Connect, profile.label.clone()).with_payload(profile.to_payload())
    }

    pub fn change_connection(profile: &ConnectionProfile) -> Self {
        Self::new(JobKind::ChangeConnection, profile.label.clone())
            .with_payload(profile.to_payload())
    }

    pub fn disconnect() -> Self {
        Self::new(JobKind::Disconnect, "")
    }

    pub fn query(sql: impl Into<String>) -> Self {
        Self::new(JobKind::Query, sql)
    }

    /// Set `column` of the row described by `record`; `None` stores NULL
    pub fn update(
        column: impl Into<String>,
        value: Option<String>,
        record: HashMap<String, Value>,
    ) -> Self {
        Self {
            kind: JobKind::Update,
            primary: column.into(),
            secondary: value,
            payload: Some(record),
        }
    }

    pub fn get_reference(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(JobKind::GetReference, column).with_secondary(value)
    }

    /// Profile carried in the payload of connect jobs
    pub fn profile(&self) -> Option<ConnectionProfile> {
        self.payload.as_ref().and_then(ConnectionProfile::from_payload)
    }
}

/// Notification sent from a session to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Error(String),
    Info(String),
    QueryExecuted { statement: String, params: Vec<Value> },
    Busy(bool),
    DbList { names: Vec<String>, connection: String },
    TableList(Vec<String>),
    ScopeChanged(String),
    Result(ResultGrid),
}

/// Sending half of a session's event channel
///
/// Events for an owner that stopped listening are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(Event::Error(message.into()));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(Event::Info(message.into()));
    }

    pub fn busy(&self, busy: bool) {
        self.send(Event::Busy(busy));
    }

    pub fn query_executed(&self, statement: &str, params: &[Value]) {
        self.send(Event::QueryExecuted {
            statement: statement.to_string(),
            params: params.to_vec(),
        });
    }
}
