use std::collections::HashMap;
use std::env;
use std::io::BufRead;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use dibi::config::{self, Config};
use dibi::connection::MySqlConnector;
use dibi::metrics::metrics;
use dibi::query::{ResultGrid, Value};
use dibi::registry::{SessionId, SessionRegistry};
use dibi::session::{Event, Job, JobKind};

const USAGE: &str = "usage: dibi [--config <path>] <connection-label>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let (config_path, label) = parse_args(env::args().skip(1))?;
    let config = match config_path {
        Some(path) => config::load_config(&path).with_context(|| format!("loading {}", path))?,
        None => load_or_default_config(),
    };
    let profile = config::find_connection(&config, &label)?.clone();

    let registry = SessionRegistry::new(Arc::new(MySqlConnector), config.engine.clone());
    let (id, events) = registry.open(&profile)?;
    info!(session_id = %id, connection = %profile, "Session opened");

    let printer = tokio::spawn(print_events(events));

    // stdin is read on its own thread so the runtime stays free
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    while let Some(line) = line_rx.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_command(line) {
            Command::Quit => break,
            Command::Metrics => print!("{}", metrics().gather()),
            Command::Status => println!("{:?}", registry.state(id)?),
            Command::Switch(label) => match config::find_connection(&config, &label) {
                Ok(profile) => submit(&registry, id, Job::change_connection(profile))?,
                Err(e) => eprintln!("error: {}", e),
            },
            Command::Job(job) => submit(&registry, id, job)?,
            Command::Usage(usage) => eprintln!("usage: {}", usage),
            Command::Unknown(cmd) => eprintln!("unknown command: {}", cmd),
        }
    }

    registry.close(id).await?;
    if let Err(e) = printer.await {
        warn!(error = %e, "Event printer failed");
    }
    Ok(())
}

fn submit(registry: &SessionRegistry, id: SessionId, job: Job) -> anyhow::Result<()> {
    registry
        .submit(id, job)
        .context("session is no longer running")
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<(Option<String>, String)> {
    let mut config_path = None;
    let mut label = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config_path = Some(args.next().context(USAGE)?);
            }
            "--help" | "-h" => bail!(USAGE),
            _ if label.is_none() => label = Some(arg),
            _ => bail!(USAGE),
        }
    }

    match label {
        Some(label) => Ok((config_path, label)),
        None => bail!(USAGE),
    }
}

fn load_or_default_config() -> Config {
    // Try to load from config file
    let mut config_paths: Vec<String> = Vec::new();
    if let Ok(path) = env::var("DIBI_CONFIG") {
        config_paths.push(path);
    }
    config_paths.push("config/dibi.toml".to_string());
    config_paths.push("dibi.toml".to_string());

    for path in &config_paths {
        match config::load_config(path) {
            Ok(config) => {
                info!(path = %path, "Loaded configuration");
                return config;
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to load config");
            }
        }
    }

    info!("Using default configuration");
    Config::default()
}

enum Command {
    Job(Job),
    Metrics,
    Status,
    /// Switch the session to another configured connection
    Switch(String),
    Quit,
    Usage(&'static str),
    Unknown(String),
}

/// Meta commands start with a backslash, anything else is SQL
fn parse_command(line: &str) -> Command {
    let Some(meta) = line.strip_prefix('\\') else {
        return Command::Job(Job::query(line));
    };
    let mut parts = meta.splitn(3, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().unwrap_or_default().to_string();
    let rest = parts.next().map(|s| s.trim().to_string());

    match name {
        "q" | "quit" => Command::Quit,
        "metrics" => Command::Metrics,
        "dbs" => Command::Job(Job::new(JobKind::DbList, "")),
        "use" => Command::Job(Job::new(JobKind::TableList, arg)),
        "data" => Command::Job(Job::new(JobKind::TableData, arg)),
        "desc" => Command::Job(Job::new(JobKind::TableContents, arg)),
        "ref" => Command::Job(Job::get_reference(arg, rest.unwrap_or_default())),
        "set" => parse_update(&arg, rest.as_deref().unwrap_or_default()),
        "connect" if !arg.is_empty() => Command::Switch(arg),
        "connect" => Command::Usage("\\connect <label>"),
        "status" => Command::Status,
        "commit" => Command::Job(Job::new(JobKind::Commit, "")),
        "rollback" => Command::Job(Job::new(JobKind::Rollback, "")),
        other => Command::Unknown(other.to_string()),
    }
}

/// `\set <column> <value|NULL> <key>=<value>...`
///
/// The key pairs identify the row as it currently is.
fn parse_update(column: &str, rest: &str) -> Command {
    const SET_USAGE: &str = "\\set <column> <value|NULL> <key>=<value>...";
    let mut parts = rest.split_whitespace();
    let Some(value) = parts.next() else {
        return Command::Usage(SET_USAGE);
    };
    if column.is_empty() {
        return Command::Usage(SET_USAGE);
    }

    let mut record = HashMap::new();
    for pair in parts {
        let Some((key, cell)) = pair.split_once('=') else {
            return Command::Usage(SET_USAGE);
        };
        record.insert(key.to_string(), Value::from(cell));
    }
    if record.is_empty() {
        return Command::Usage(SET_USAGE);
    }

    let value = (!value.eq_ignore_ascii_case("null")).then(|| value.to_string());
    Command::Job(Job::update(column, value, record))
}

async fn print_events(mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        match event {
            Event::Error(msg) => eprintln!("error: {}", msg),
            Event::Info(msg) => println!("{}", msg.trim_end()),
            Event::QueryExecuted { statement, params } if params.is_empty() => {
                eprintln!("> {}", statement)
            }
            Event::QueryExecuted { statement, params } => {
                let params: Vec<String> = params.iter().map(ToString::to_string).collect();
                eprintln!("> {} [{}]", statement, params.join(", "))
            }
            Event::Busy(_) => {}
            Event::DbList { names, connection } => {
                println!("databases on {}: {}", connection, names.join(", "))
            }
            Event::TableList(names) => println!("tables: {}", names.join(", ")),
            Event::ScopeChanged(db) => println!("using {}", db),
            Event::Result(grid) => print_grid(&grid),
        }
    }
}

fn print_grid(grid: &ResultGrid) {
    if grid.is_empty() {
        println!("(no rows)");
        return;
    }
    println!("{}", grid.columns.join("\t"));
    for row in &grid.rows {
        let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
        println!("{}", cells.join("\t"));
    }
    println!("({} rows)", grid.rows.len());
}
