//! Integration test entry point
//!
//! Run with: DIBI_RUN_INTEGRATION_TESTS=1 cargo test --test integration
//!
//! Environment variables:
//! - DIBI_RUN_INTEGRATION_TESTS: Set to "1" to enable integration tests
//! - DIBI_TEST_HOST: MySQL host (default: 127.0.0.1)
//! - DIBI_TEST_PORT: MySQL port (default: 3306)
//! - DIBI_TEST_USER: MySQL user, needs CREATE/DROP DATABASE (default: root)
//! - DIBI_TEST_PASS: MySQL password (default: empty)

mod editing;
mod session;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use dibi::config::{ConnectionProfile, EngineConfig};
use dibi::connection::MySqlConnector;
use dibi::registry::SessionRegistry;
use dibi::session::{Event, Job};
use mysql::prelude::*;
use mysql::{Conn, OptsBuilder};
use tokio::sync::mpsc::UnboundedReceiver;

/// Check if integration tests should run
pub fn should_run_integration_tests() -> bool {
    env::var("DIBI_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Skip test if integration tests are not enabled
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !crate::should_run_integration_tests() {
            eprintln!("Skipping integration test (set DIBI_RUN_INTEGRATION_TESTS=1 to run)");
            return;
        }
    };
}

/// Server connection settings from the environment
#[derive(Debug, Clone)]
pub struct ServerTestConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

pub fn get_server_config() -> ServerTestConfig {
    ServerTestConfig {
        host: env::var("DIBI_TEST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env::var("DIBI_TEST_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3306),
        user: env::var("DIBI_TEST_USER").unwrap_or_else(|_| "root".to_string()),
        password: env::var("DIBI_TEST_PASS").unwrap_or_default(),
    }
}

impl ServerTestConfig {
    /// Direct connection used to prepare and inspect fixtures
    pub fn conn(&self) -> Conn {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(&self.host))
            .tcp_port(self.port)
            .user(Some(&self.user))
            .pass(Some(&self.password));
        Conn::new(opts).expect("Failed to connect to MySQL")
    }

    pub fn profile(&self, label: &str) -> ConnectionProfile {
        let mut profile = ConnectionProfile::new(label, self.host.clone(), self.user.clone());
        profile.port = self.port;
        profile.password = Some(self.password.clone());
        profile
    }
}

/// A throwaway database with `users` and `orders` tables
///
/// Dropped again when the fixture goes out of scope.
pub struct Fixture {
    pub database: String,
    config: ServerTestConfig,
}

impl Fixture {
    pub fn create(name: &str) -> Self {
        let config = get_server_config();
        let database = format!("dibi_it_{}", name);
        let mut conn = config.conn();

        conn.query_drop(format!("DROP DATABASE IF EXISTS `{}`", database))
            .expect("drop database");
        conn.query_drop(format!("CREATE DATABASE `{}`", database))
            .expect("create database");
        conn.query_drop(format!(
            "CREATE TABLE `{}`.users (
                id INT PRIMARY KEY,
                name VARCHAR(64),
                email VARCHAR(128) UNIQUE
            ) ENGINE=InnoDB",
            database
        ))
        .expect("create users");
        conn.query_drop(format!(
            "CREATE TABLE `{}`.orders (
                id INT PRIMARY KEY,
                user_id INT,
                amount DECIMAL(10, 2),
                FOREIGN KEY (user_id) REFERENCES users(id)
            ) ENGINE=InnoDB",
            database
        ))
        .expect("create orders");
        conn.query_drop(format!(
            "INSERT INTO `{}`.users VALUES (1, 'ada', 'ada@example.com'), (2, 'bob', 'bob@example.com')",
            database
        ))
        .expect("insert users");
        conn.query_drop(format!(
            "INSERT INTO `{}`.orders VALUES (10, 1, 5.00), (11, 2, 7.50), (12, 1, 1.25)",
            database
        ))
        .expect("insert orders");

        Self { database, config }
    }

    pub fn conn(&self) -> Conn {
        self.config.conn()
    }

    pub fn profile(&self) -> ConnectionProfile {
        self.config.profile(&self.database)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let mut conn = self.config.conn();
        let _ = conn.query_drop(format!("DROP DATABASE IF EXISTS `{}`", self.database));
    }
}

pub fn registry() -> SessionRegistry {
    SessionRegistry::new(Arc::new(MySqlConnector), EngineConfig::default())
}

/// Run `jobs` on a fresh session connected with `profile`, return all events
pub async fn run_session(profile: &ConnectionProfile, jobs: Vec<Job>) -> Vec<Event> {
    let registry = registry();
    let (id, mut rx) = registry.open(profile).expect("open session");
    for job in jobs {
        registry.submit(id, job).expect("submit job");
    }
    registry.close(id).await.expect("close session");

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// Wait for the first event matching `pred`
pub async fn wait_for<F>(rx: &mut UnboundedReceiver<Event>, pred: F) -> Event
where
    F: Fn(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("session ended while waiting for event"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub fn errors(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Error(msg) => Some(msg.as_str()),
            _ => None,
        })
        .collect()
}
