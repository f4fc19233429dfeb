//! Database connections and the manager that opens them
//!
//! Access to MySQL goes through the [`Connector`] / [`DbConnection`] seam so
//! the session engine never depends on a concrete driver. A [`Link`] owns one
//! open connection together with the SSH tunnel it travels through.

mod driver;
mod tunnel;

#[cfg(test)]
pub(crate) mod scripted;

pub use driver::MySqlConnector;
pub use tunnel::{SshTunnel, TunnelError};

use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{ConnectionProfile, EngineConfig};
use crate::metrics::metrics;
use crate::query::Value;

/// Statements run on every fresh connection
///
/// Edits stay pending until an explicit `commit` job.
pub const SESSION_SETUP: [&str; 2] = [
    "SET SESSION TRANSACTION ISOLATION LEVEL READ UNCOMMITTED",
    "SET autocommit = 0",
];

/// Rows returned by a single statement
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Position of a column, matched case-insensitively
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Cell of `row` under column `name`
    pub fn get<'a>(&self, row: &'a [Value], name: &str) -> Option<&'a Value> {
        self.column_index(name).and_then(|idx| row.get(idx))
    }
}

/// Error reported by the database driver, message kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
    /// Server error code, when the server produced one
    pub code: Option<u16>,
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

/// One open database connection
pub trait DbConnection: Send {
    /// Execute a single statement
    ///
    /// Returns `None` when the statement produced no row-set (DDL, USE, ...).
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Option<RowSet>, DriverError>;

    fn commit(&mut self) -> Result<(), DriverError>;

    fn rollback(&mut self) -> Result<(), DriverError>;
}

/// Where and as whom to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

/// Factory for database connections
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn DbConnection>, DriverError>;
}

/// Connection failure
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Tunnel failed: {0}")]
    Tunnel(#[from] TunnelError),

    #[error("Password command failed: {0}")]
    Credential(String),

    #[error("{0}")]
    Driver(#[from] DriverError),
}

/// A live connection and the tunnel it is routed through
///
/// Dropping the link closes the connection first, then stops the tunnel.
pub struct Link {
    connection: Box<dyn DbConnection>,
    tunnel: Option<SshTunnel>,
    label: String,
}

impl Link {
    pub fn connection(&mut self) -> &mut dyn DbConnection {
        self.connection.as_mut()
    }

    /// Label of the profile this link was opened from
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_tunneled(&self) -> bool {
        self.tunnel.is_some()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        metrics().record_connection_closed();
        info!(
            connection = %self.label,
            tunneled = self.is_tunneled(),
            "Closed db connection"
        );
    }
}

/// Opens links from connection profiles
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    config: EngineConfig,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: EngineConfig) -> Self {
        Self { connector, config }
    }

    /// Connect to the database described by `profile`
    ///
    /// Opens the SSH tunnel first when the profile has a hop. Any tunnel that
    /// was started is stopped again when a later step fails.
    pub fn connect(&self, profile: &ConnectionProfile) -> Result<Link, ConnectError> {
        let started = Instant::now();
        let password = self.resolve_password(profile)?;

        let tunnel = match profile.ssh_hop() {
            Some(hop) => {
                debug!(
                    ssh_host = %hop.host,
                    ssh_port = hop.port,
                    remote = %format!("{}:{}", profile.host, profile.port),
                    "Opening SSH tunnel"
                );
                Some(SshTunnel::open(
                    &self.config.ssh_command,
                    &hop,
                    &profile.host,
                    profile.port,
                    Duration::from_secs(self.config.ssh_timeout_secs),
                )?)
            }
            None => None,
        };

        let endpoint = Endpoint {
            host: match tunnel {
                Some(_) => "127.0.0.1".to_string(),
                None => profile.host.clone(),
            },
            port: tunnel
                .as_ref()
                .map(SshTunnel::local_port)
                .unwrap_or(profile.port),
            user: profile.user.clone(),
            password,
        };

        let mut connection = self.connector.connect(&endpoint).map_err(|e| {
            error!(
                connection = %profile.label,
                addr = %format!("{}:{}", endpoint.host, endpoint.port),
                error = %e,
                "Failed to connect to database"
            );
            ConnectError::Driver(e)
        })?;

        for statement in SESSION_SETUP {
            connection.execute(statement, &[])?;
        }

        metrics().record_connection_opened(tunnel.is_some());
        info!(
            connection = %profile.label,
            tunneled = tunnel.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Connected"
        );

        Ok(Link {
            connection,
            tunnel,
            label: profile.label.clone(),
        })
    }

    /// Password to connect with
    ///
    /// A literal password wins; otherwise the password command is run on each
    /// call and its trimmed stdout is used.
    pub fn resolve_password(&self, profile: &ConnectionProfile) -> Result<String, ConnectError> {
        if let Some(password) = profile.literal_password() {
            return Ok(password.to_string());
        }
        let Some(cmd) = profile.password_command() else {
            return Ok(String::new());
        };

        debug!(connection = %profile.label, "Running password command");
        let output = Command::new(&self.config.shell)
            .arg("-c")
            .arg(cmd)
            .output()
            .map_err(|e| ConnectError::Credential(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(connection = %profile.label, status = %output.status, "Password command failed");
            return Err(ConnectError::Credential(if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
