//! MySQL implementation of the connection seam

use mysql::prelude::{Protocol, Queryable};
use mysql::{Conn, OptsBuilder, Params, QueryResult};
use tracing::debug;

use super::{Connector, DbConnection, DriverError, Endpoint, RowSet};
use crate::query::Value;

/// Connects with the `mysql` crate over TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnector;

impl Connector for MySqlConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn DbConnection>, DriverError> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        debug!(addr = %addr, user = %endpoint.user, "Connecting to MySQL");

        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(endpoint.host.as_str()))
            .tcp_port(endpoint.port)
            .user(Some(endpoint.user.as_str()))
            .pass(Some(endpoint.password.as_str()));
        let conn = Conn::new(opts)?;

        Ok(Box::new(MySqlConnection { conn }))
    }
}

struct MySqlConnection {
    conn: Conn,
}

impl DbConnection for MySqlConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Option<RowSet>, DriverError> {
        if params.is_empty() {
            // Text protocol: SHOW / USE and friends cannot be prepared
            let result = self.conn.query_iter(sql)?;
            collect(result)
        } else {
            let params = Params::Positional(params.iter().map(to_mysql).collect());
            let result = self.conn.exec_iter(sql, params)?;
            collect(result)
        }
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.conn.query_drop("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.conn.query_drop("ROLLBACK")?;
        Ok(())
    }
}

/// Drain the first result set of a query
fn collect<P: Protocol>(mut result: QueryResult<'_, '_, '_, P>) -> Result<Option<RowSet>, DriverError> {
    let columns: Vec<String> = result
        .columns()
        .as_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect();

    if columns.is_empty() {
        return Ok(None);
    }

    let mut rows = Vec::new();
    for row in result.by_ref() {
        let row = row?;
        let values = (0..row.len())
            .map(|idx| row.as_ref(idx).cloned().map(from_mysql).unwrap_or(Value::Null))
            .collect();
        rows.push(values);
    }

    Ok(Some(RowSet::new(columns, rows)))
}

impl From<mysql::Error> for DriverError {
    fn from(err: mysql::Error) -> Self {
        let code = match &err {
            mysql::Error::MySqlError(e) => Some(e.code),
            _ => None,
        };
        Self {
            code,
            message: err.to_string(),
        }
    }
}

fn to_mysql(value: &Value) -> mysql::Value {
    match value {
        Value::Null => mysql::Value::NULL,
        Value::Int(i) => mysql::Value::Int(*i),
        Value::UInt(u) => mysql::Value::UInt(*u),
        Value::Float(f) => mysql::Value::Double(*f),
        Value::Text(s) => mysql::Value::Bytes(s.clone().into_bytes()),
        Value::Bytes(b) => mysql::Value::Bytes(b.clone()),
    }
}

fn from_mysql(value: mysql::Value) -> Value {
    match value {
        mysql::Value::NULL => Value::Null,
        mysql::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => Value::Text(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql::Value::Int(i) => Value::Int(i),
        mysql::Value::UInt(u) => Value::UInt(u),
        mysql::Value::Float(f) => Value::Float(f as f64),
        mysql::Value::Double(d) => Value::Float(d),
        mysql::Value::Date(year, month, day, hour, minute, second, micros) => {
            let date = format!("{:04}-{:02}-{:02}", year, month, day);
            if hour == 0 && minute == 0 && second == 0 && micros == 0 {
                Value::Text(date)
            } else {
                Value::Text(format!(
                    "{} {}",
                    date,
                    format_clock(hour as u32, minute, second, micros)
                ))
            }
        }
        mysql::Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let clock = format_clock(days * 24 + hours as u32, minutes, seconds, micros);
            Value::Text(if negative { format!("-{}", clock) } else { clock })
        }
    }
}

fn format_clock(hours: u32, minutes: u8, seconds: u8, micros: u32) -> String {
    let mut out = format!("{:02}:{:02}:{:02}", hours, minutes, seconds);
    if micros > 0 {
        out.push_str(&format!(".{:06}", micros));
    }
    out
}
