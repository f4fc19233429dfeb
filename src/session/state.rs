use std::collections::HashMap;

use tracing::debug;

use crate::connection::Link;
use crate::parser::VariableEngine;

/// Database and table the user is currently looking at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub database: Option<String>,
    pub table: Option<String>,
}

/// State owned by a session worker
///
/// Only the worker thread touches a `Session`; it is replaced as a whole on
/// `change_connection`.
#[derive(Default)]
pub struct Session {
    /// Active connection and its tunnel
    pub(super) link: Option<Link>,
    /// Current scope
    pub scope: Scope,
    /// Table names per database, filled on first listing
    table_cache: HashMap<String, Vec<String>>,
    /// Query variables
    pub variables: VariableEngine,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn link(&mut self) -> Option<&mut Link> {
        self.link.as_mut()
    }

    /// Label of the profile the session is connected with
    pub fn label(&self) -> Option<&str> {
        self.link.as_ref().map(Link::label)
    }

    /// Install a new link, closing the previous one first
    pub fn attach(&mut self, link: Link) {
        self.disconnect();
        self.link = Some(link);
    }

    /// Close the connection and its tunnel; no-op when not connected
    pub fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            debug!(connection = %link.label(), "Dropping link");
            drop(link);
        }
    }

    pub fn cached_tables(&self, database: &str) -> Option<&[String]> {
        self.table_cache.get(database).map(Vec::as_slice)
    }

    pub fn cache_tables(&mut self, database: &str, tables: Vec<String>) {
        self.table_cache.insert(database.to_string(), tables);
    }
}
