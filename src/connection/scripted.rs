//! In-memory connector replaying scripted responses, for unit tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Connector, DbConnection, DriverError, Endpoint, RowSet};
use crate::query::Value;

#[derive(Default)]
struct Script {
    responses: HashMap<String, Result<Option<RowSet>, DriverError>>,
    delays: HashMap<String, Duration>,
    refuse: Option<String>,
    endpoints: Vec<Endpoint>,
    log: Vec<(String, Vec<Value>)>,
}

/// Connector whose connections answer from a shared script
///
/// Statements are matched by exact text. Unscripted statements succeed
/// without a row-set. `COMMIT` and `ROLLBACK` are logged like statements.
#[derive(Clone, Default)]
pub(crate) struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, sql: &str, columns: &[&str], rows: Vec<Vec<Value>>) {
        let set = RowSet::new(columns.iter().map(|c| c.to_string()).collect(), rows);
        self.script.lock().responses.insert(sql.to_string(), Ok(Some(set)));
    }

    pub fn fail(&self, sql: &str, message: &str) {
        self.script
            .lock()
            .responses
            .insert(sql.to_string(), Err(DriverError::new(message)));
    }

    pub fn delay(&self, sql: &str, delay: Duration) {
        self.script.lock().delays.insert(sql.to_string(), delay);
    }

    pub fn refuse_connections(&self, message: &str) {
        self.script.lock().refuse = Some(message.to_string());
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.script.lock().endpoints.clone()
    }

    /// Executed statement texts in order
    pub fn executed(&self) -> Vec<String> {
        self.script.lock().log.iter().map(|(sql, _)| sql.clone()).collect()
    }

    /// Executed statements with their parameters
    pub fn executed_with_params(&self) -> Vec<(String, Vec<Value>)> {
        self.script.lock().log.clone()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn DbConnection>, DriverError> {
        let mut script = self.script.lock();
        if let Some(message) = &script.refuse {
            return Err(DriverError::new(message.clone()));
        }
        script.endpoints.push(endpoint.clone());
        Ok(Box::new(ScriptedConnection {
            script: self.script.clone(),
        }))
    }
}

struct ScriptedConnection {
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnection {
    fn run(&mut self, sql: &str, params: &[Value]) -> Result<Option<RowSet>, DriverError> {
        let delay = self.script.lock().delays.get(sql).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut script = self.script.lock();
        script.log.push((sql.to_string(), params.to_vec()));
        script.responses.get(sql).cloned().unwrap_or(Ok(None))
    }
}

impl DbConnection for ScriptedConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Option<RowSet>, DriverError> {
        self.run(sql, params)
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.run("COMMIT", &[]).map(|_| ())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.run("ROLLBACK", &[]).map(|_| ())
    }
}
