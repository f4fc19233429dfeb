use std::collections::HashMap;

use serde::Deserialize;

use crate::query::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Engine behaviour shared by every session
    #[serde(default)]
    pub engine: EngineConfig,
    /// Known connection profiles
    #[serde(default)]
    pub connections: Vec<ConnectionProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            connections: Vec::new(),
        }
    }
}

impl Config {
    /// Look up a connection profile by its label
    pub fn connection(&self, label: &str) -> Option<&ConnectionProfile> {
        self.connections.iter().find(|c| c.label == label)
    }
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Settings for the session engine
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Row cap appended to every interactive SELECT
    #[serde(default = "default_row_limit")]
    pub row_limit: u64,
    /// Shell used for password commands and result piping
    #[serde(default = "default_shell")]
    pub shell: String,
    /// SSH client binary used for tunnels
    #[serde(default = "default_ssh_command")]
    pub ssh_command: String,
    /// How long to wait for a tunnel to accept connections (seconds)
    #[serde(default = "default_ssh_timeout_secs")]
    pub ssh_timeout_secs: u64,
    /// Databases hidden from the database list
    #[serde(default = "default_system_databases")]
    pub system_databases: Vec<String>,
}

fn default_row_limit() -> u64 {
    100
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_ssh_command() -> String {
    "ssh".to_string()
}

fn default_ssh_timeout_secs() -> u64 {
    10
}

fn default_system_databases() -> Vec<String> {
    vec![
        "information_schema".to_string(),
        "mysql".to_string(),
        "performance_schema".to_string(),
    ]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            row_limit: default_row_limit(),
            shell: default_shell(),
            ssh_command: default_ssh_command(),
            ssh_timeout_secs: default_ssh_timeout_secs(),
            system_databases: default_system_databases(),
        }
    }
}

// ============================================================================
// Connection Profiles
// ============================================================================

/// A named MySQL endpoint, optionally reached through an SSH hop
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionProfile {
    /// Unique label shown to the user
    pub label: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    /// Literal password, takes precedence over `password_cmd`
    #[serde(default)]
    pub password: Option<String>,
    /// Shell command printing the password, run on every connect
    #[serde(default)]
    pub password_cmd: Option<String>,
    #[serde(default)]
    pub ssh_host: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub ssh_user: Option<String>,
    /// Private key for the SSH hop; ssh picks the local identity when unset
    #[serde(default)]
    pub ssh_identity: Option<String>,
}

fn default_port() -> u16 {
    3306
}

fn default_ssh_port() -> u16 {
    22
}

/// The SSH jump used to reach a profile's database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshHop {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub identity: Option<String>,
}

impl ConnectionProfile {
    pub fn new(label: impl Into<String>, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            host: host.into(),
            port: default_port(),
            user: user.into(),
            password: None,
            password_cmd: None,
            ssh_host: None,
            ssh_port: default_ssh_port(),
            ssh_user: None,
            ssh_identity: None,
        }
    }

    /// The SSH hop, present only when both host and user are configured
    pub fn ssh_hop(&self) -> Option<SshHop> {
        match (non_empty(&self.ssh_host), non_empty(&self.ssh_user)) {
            (Some(host), Some(user)) => Some(SshHop {
                host: host.to_string(),
                port: self.ssh_port,
                user: user.to_string(),
                identity: non_empty(&self.ssh_identity).map(str::to_string),
            }),
            _ => None,
        }
    }

    /// Literal password if one is set and non-empty
    pub fn literal_password(&self) -> Option<&str> {
        non_empty(&self.password)
    }

    /// Password command if one is set and non-empty
    pub fn password_command(&self) -> Option<&str> {
        non_empty(&self.password_cmd)
    }

    /// Encode the profile as a `connect` job payload
    pub fn to_payload(&self) -> HashMap<String, Value> {
        let mut payload = HashMap::new();
        payload.insert("label".to_string(), Value::from(self.label.as_str()));
        payload.insert("host".to_string(), Value::from(self.host.as_str()));
        payload.insert("port".to_string(), Value::UInt(self.port as u64));
        payload.insert("user".to_string(), Value::from(self.user.as_str()));
        payload.insert("ssh_port".to_string(), Value::UInt(self.ssh_port as u64));

        let optional = [
            ("password", &self.password),
            ("password_cmd", &self.password_cmd),
            ("ssh_host", &self.ssh_host),
            ("ssh_user", &self.ssh_user),
            ("ssh_identity", &self.ssh_identity),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                payload.insert(key.to_string(), Value::from(v.as_str()));
            }
        }
        payload
    }

    /// Decode a profile from a `connect` job payload
    ///
    /// `host` and `user` are required; ports fall back to their defaults when
    /// absent or unparsable. A missing label defaults to `user@host`.
    pub fn from_payload(payload: &HashMap<String, Value>) -> Option<Self> {
        let text = |key: &str| payload.get(key).and_then(Value::as_text);

        let host = text("host")?;
        let user = text("user")?;
        let label = text("label").unwrap_or_else(|| format!("{}@{}", user, host));

        let mut profile = Self::new(label, host, user);
        profile.port = payload
            .get("port")
            .and_then(Value::as_u16)
            .unwrap_or_else(default_port);
        profile.password = text("password");
        profile.password_cmd = text("password_cmd");
        profile.ssh_host = text("ssh_host");
        profile.ssh_port = payload
            .get("ssh_port")
            .and_then(Value::as_u16)
            .unwrap_or_else(default_ssh_port);
        profile.ssh_user = text("ssh_user");
        profile.ssh_identity = text("ssh_identity");
        Some(profile)
    }
}

impl std::fmt::Display for ConnectionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}@{}:{}", self.label, self.user, self.host, self.port)?;
        if let Some(hop) = self.ssh_hop() {
            write!(f, " via {}@{}:{}", hop.user, hop.host, hop.port)?;
        }
        write!(f, ")")
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
