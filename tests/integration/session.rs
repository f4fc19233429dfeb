//! Query pipeline against a live server

use crate::{errors, registry, run_session, skip_if_not_enabled, wait_for, Fixture};
use dibi::query::{ResultGrid, Value};
use dibi::session::{Event, Job, JobKind};

fn results(events: &[Event]) -> Vec<&ResultGrid> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Result(grid) => Some(grid),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_query_aggregates_row_sets() {
    skip_if_not_enabled!();
    let fixture = Fixture::create("aggregate");

    let sql = format!(
        "use `{}`; select id, name from users order by id; select amount from orders where id = 10",
        fixture.database
    );
    let events = run_session(&fixture.profile(), vec![Job::query(sql)]).await;

    assert!(errors(&events).is_empty(), "errors: {:?}", errors(&events));
    assert!(events.contains(&Event::ScopeChanged(fixture.database.clone())));

    let grids = results(&events);
    assert_eq!(grids.len(), 1);
    let grid = grids[0];
    assert_eq!(grid.columns, vec!["id", "name", "amount"]);
    assert_eq!(
        grid.rows,
        vec![
            vec![Value::from("1"), Value::from("ada"), Value::Null],
            vec![Value::from("2"), Value::from("bob"), Value::Null],
            vec![Value::Null, Value::Null, Value::from("5.00")],
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_variables_iterate_captured_values() {
    skip_if_not_enabled!();
    let fixture = Fixture::create("variables");

    let events = run_session(
        &fixture.profile(),
        vec![
            Job::query(format!("use `{}`", fixture.database)),
            Job::query("t := show tables"),
            Job::query("select count(*) as n from $t"),
        ],
    )
    .await;

    assert!(errors(&events).is_empty(), "errors: {:?}", errors(&events));
    let executed: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            Event::QueryExecuted { statement, .. } => Some(statement.as_str()),
            _ => None,
        })
        .collect();
    assert!(executed.contains(&"select count(*) as n from orders LIMIT 100"));
    assert!(executed.contains(&"select count(*) as n from users LIMIT 100"));

    let last = *results(&events).last().unwrap();
    assert_eq!(last.columns, vec!["n"]);
    assert_eq!(last.rows, vec![vec![Value::from("3")], vec![Value::from("2")]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_db_and_table_lists() {
    skip_if_not_enabled!();
    let fixture = Fixture::create("lists");

    let registry = registry();
    let (id, mut rx) = registry.open(&fixture.profile()).unwrap();

    let list = wait_for(&mut rx, |e| matches!(e, Event::DbList { .. })).await;
    match list {
        Event::DbList { names, connection } => {
            assert!(names.contains(&fixture.database));
            assert!(!names.iter().any(|n| n == "information_schema" || n == "mysql"));
            assert_eq!(connection, fixture.database);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    registry
        .submit(id, Job::new(JobKind::TableList, fixture.database.clone()))
        .unwrap();
    let tables = wait_for(&mut rx, |e| matches!(e, Event::TableList(_))).await;
    assert_eq!(
        tables,
        Event::TableList(vec!["orders".to_string(), "users".to_string()])
    );

    registry.close(id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_statement_error_does_not_end_session() {
    skip_if_not_enabled!();
    let fixture = Fixture::create("errors");

    let events = run_session(
        &fixture.profile(),
        vec![
            Job::query(format!("use `{}`", fixture.database)),
            Job::query("select nope from users"),
            Job::query("select name from users where id = 2"),
        ],
    )
    .await;

    let errors = errors(&events);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Unknown column 'nope'"), "got: {}", errors[0]);

    let last = *results(&events).last().unwrap();
    assert_eq!(last.rows, vec![vec![Value::from("bob")]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_first_result() {
    skip_if_not_enabled!();
    let fixture = Fixture::create("empty");

    let events = run_session(
        &fixture.profile(),
        vec![Job::query(format!(
            "select * from `{}`.users where id = 999; select 1",
            fixture.database
        ))],
    )
    .await;

    assert_eq!(results(&events), vec![&ResultGrid::empty()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_password_command() {
    skip_if_not_enabled!();
    let fixture = Fixture::create("password_cmd");

    let mut profile = fixture.profile();
    profile.password = None;
    profile.password_cmd = Some("printf %s \"$DIBI_TEST_PASS\"".to_string());

    let events = run_session(&profile, vec![Job::query("select 1")]).await;
    assert!(errors(&events).is_empty(), "errors: {:?}", errors(&events));
    assert!(events.contains(&Event::Info(format!("Connected to: {}.", fixture.database))));
}
