//! dibi: MySQL session engine
//!
//! A session owns one (optionally SSH-tunneled) connection and processes
//! jobs strictly in order on a worker thread. Query text goes through
//! splitting, scope-tracking rewrites and `$variable` expansion before its
//! row-sets are merged into a single [`query::ResultGrid`].

pub mod config;
pub mod connection;
pub mod metrics;
pub mod parser;
pub mod query;
pub mod registry;
pub mod session;
