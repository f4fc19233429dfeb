//! Reference lookup and cell updates against a live server

use std::collections::HashMap;

use crate::{errors, run_session, skip_if_not_enabled, Fixture};
use dibi::query::Value;
use dibi::session::{Event, Job, JobKind};
use mysql::prelude::*;

fn ada() -> HashMap<String, Value> {
    HashMap::from([
        ("id".to_string(), Value::from("1")),
        ("name".to_string(), Value::from("ada")),
        ("email".to_string(), Value::from("ada@example.com")),
    ])
}

fn name_of(fixture: &Fixture, id: u32) -> Option<String> {
    let mut conn = fixture.conn();
    conn.query_first(format!(
        "SELECT name FROM `{}`.users WHERE id = {}",
        fixture.database, id
    ))
    .expect("select name")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_update_then_commit() {
    skip_if_not_enabled!();
    let fixture = Fixture::create("update_commit");

    let events = run_session(
        &fixture.profile(),
        vec![
            Job::query(format!("use `{}`", fixture.database)),
            Job::new(JobKind::TableData, "users"),
            Job::update("name", Some("ada lovelace".to_string()), ada()),
            Job::new(JobKind::Commit, ""),
        ],
    )
    .await;

    assert!(errors(&events).is_empty(), "errors: {:?}", errors(&events));
    assert!(events.contains(&Event::Info(
        "UPDATE users SET name = ? WHERE id = ?".to_string()
    )));
    assert_eq!(name_of(&fixture, 1).as_deref(), Some("ada lovelace"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_uncommitted_update_is_discarded() {
    skip_if_not_enabled!();
    let fixture = Fixture::create("update_rollback");

    let events = run_session(
        &fixture.profile(),
        vec![
            Job::query(format!("use `{}`", fixture.database)),
            Job::new(JobKind::TableData, "users"),
            Job::update("name", None, ada()),
            Job::new(JobKind::Rollback, ""),
        ],
    )
    .await;

    assert!(errors(&events).is_empty(), "errors: {:?}", errors(&events));
    assert_eq!(name_of(&fixture, 1).as_deref(), Some("ada"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_reference_follows_foreign_key() {
    skip_if_not_enabled!();
    let fixture = Fixture::create("reference");

    let events = run_session(
        &fixture.profile(),
        vec![
            Job::query(format!("use `{}`", fixture.database)),
            Job::new(JobKind::TableData, "orders"),
            Job::get_reference("user_id", "2"),
        ],
    )
    .await;

    assert!(errors(&events).is_empty(), "errors: {:?}", errors(&events));
    let grid = events
        .iter()
        .rev()
        .find_map(|e| match e {
            Event::Result(grid) => Some(grid),
            _ => None,
        })
        .unwrap();
    assert_eq!(grid.columns, vec!["id", "name", "email"]);
    assert_eq!(grid.rows.len(), 1);
    assert_eq!(grid.rows[0][1], Value::from("bob"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_edits_need_a_table_in_scope() {
    skip_if_not_enabled!();
    let fixture = Fixture::create("no_scope");

    let events = run_session(
        &fixture.profile(),
        vec![
            Job::get_reference("user_id", "2"),
            Job::update("name", Some("x".to_string()), ada()),
        ],
    )
    .await;

    assert_eq!(errors(&events), vec!["No table selected", "No table selected"]);
}
