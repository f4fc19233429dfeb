use std::collections::HashMap;

use tracing::{debug, info};

use super::{execute, QueryError, Value};
use crate::connection::{DbConnection, RowSet};
use crate::session::{EventSink, Scope};

/// MySQL 8.0 reserved words; they cannot appear as bare identifiers
const RESERVED: &[&str] = &[
    "accessible", "add", "all", "alter", "analyze", "and", "as", "asc", "asensitive", "before",
    "between", "bigint", "binary", "blob", "both", "by", "call", "cascade", "case", "change",
    "char", "character", "check", "collate", "column", "condition", "constraint", "continue",
    "convert", "create", "cross", "cube", "cume_dist", "current_date", "current_time",
    "current_timestamp", "current_user", "cursor", "database", "databases", "day_hour",
    "day_microsecond", "day_minute", "day_second", "dec", "decimal", "declare", "default",
    "delayed", "delete", "dense_rank", "desc", "describe", "deterministic", "distinct",
    "distinctrow", "div", "double", "drop", "dual", "each", "else", "elseif", "empty", "enclosed",
    "escaped", "except", "exists", "exit", "explain", "false", "fetch", "first_value", "float",
    "float4", "float8", "for", "force", "foreign", "from", "fulltext", "function", "generated",
    "get", "grant", "group", "grouping", "groups", "having", "high_priority", "hour_microsecond",
    "hour_minute", "hour_second", "if", "ignore", "in", "index", "infile", "inner", "inout",
    "insensitive", "insert", "int", "int1", "int2", "int3", "int4", "int8", "integer", "intersect",
    "interval", "into", "io_after_gtids", "io_before_gtids", "is", "iterate", "join", "json_table",
    "key", "keys", "kill", "lag", "last_value", "lateral", "lead", "leading", "leave", "left",
    "like", "limit", "linear", "lines", "load", "localtime", "localtimestamp", "lock", "long",
    "longblob", "longtext", "loop", "low_priority", "master_bind", "master_ssl_verify_server_cert",
    "match", "maxvalue", "mediumblob", "mediumint", "mediumtext", "middleint", "minute_microsecond",
    "minute_second", "mod", "modifies", "natural", "not", "no_write_to_binlog", "nth_value",
    "ntile", "null", "numeric", "of", "on", "optimize", "optimizer_costs", "option", "optionally",
    "or", "order", "out", "outer", "outfile", "over", "partition", "percent_rank", "precision",
    "primary", "procedure", "purge", "range", "rank", "read", "read_write", "reads", "real",
    "recursive", "references", "regexp", "release", "rename", "repeat", "replace", "require",
    "resignal", "restrict", "return", "revoke", "right", "rlike", "row", "row_number", "rows",
    "schema", "schemas", "second_microsecond", "select", "sensitive", "separator", "set", "show",
    "signal", "smallint", "spatial", "specific", "sql", "sql_big_result", "sql_calc_found_rows",
    "sql_small_result", "sqlexception", "sqlstate", "sqlwarning", "ssl", "starting", "stored",
    "straight_join", "system", "table", "terminated", "then", "tinyblob", "tinyint", "tinytext",
    "to", "trailing", "trigger", "true", "undo", "union", "unique", "unlock", "unsigned", "update",
    "usage", "use", "using", "utc_date", "utc_time", "utc_timestamp", "values", "varbinary",
    "varchar", "varcharacter", "varying", "virtual", "when", "where", "while", "window", "with",
    "write", "xor", "year_month", "zerofill",
];

/// A parameterised single-cell UPDATE
#[derive(Debug, Clone, PartialEq)]
struct UpdateStatement {
    sql: String,
    params: Vec<Value>,
}

/// Writes single cells back using the table's unique key
pub struct RecordUpdater;

impl RecordUpdater {
    /// Update `column` of the row identified by `record`
    ///
    /// `record` is the row as it was before the edit. Nothing is committed.
    /// Returns the executed statement text.
    pub fn update(
        conn: &mut dyn DbConnection,
        scope: &Scope,
        record: &HashMap<String, Value>,
        column: &str,
        value: Value,
        events: &EventSink,
    ) -> Result<String, QueryError> {
        let table = scope.table.as_deref().ok_or(QueryError::NoScope)?;

        let index_sql = format!(
            "show index from `{}` where non_unique = false or key_name = 'primary'",
            table
        );
        let index = execute(conn, events, &index_sql, &[])?;

        let key = index
            .as_ref()
            .map(unique_key_columns)
            .unwrap_or_default();
        if key.is_empty() {
            return Err(QueryError::NoUniqueKey(table.to_string()));
        }
        debug!(table = %table, key = ?key, "Unique key for update");

        let statement = Self::build(table, column, value, &key, record);
        execute(conn, events, &statement.sql, &statement.params)?;

        info!(table = %table, column = %column, "Updated record");
        Ok(statement.sql)
    }

    /// Build the UPDATE for `column`, matching on `key` columns of `record`
    ///
    /// Key columns missing from the record bind NULL.
    fn build(
        table: &str,
        column: &str,
        value: Value,
        key: &[String],
        record: &HashMap<String, Value>,
    ) -> UpdateStatement {
        let conditions = key
            .iter()
            .map(|k| format!("{} = ?", quote_identifier(k)))
            .collect::<Vec<_>>()
            .join(" AND ");

        let mut params = Vec::with_capacity(key.len() + 1);
        params.push(value);
        params.extend(key.iter().map(|k| record.get(k).cloned().unwrap_or(Value::Null)));

        UpdateStatement {
            sql: format!(
                "UPDATE {} SET {} = ? WHERE {}",
                quote_identifier(table),
                quote_identifier(column),
                conditions
            ),
            params,
        }
    }
}

/// Columns of the primary key, else of the first unique key listed
fn unique_key_columns(index: &RowSet) -> Vec<String> {
    let entries: Vec<(String, String)> = index
        .rows
        .iter()
        .filter_map(|row| {
            let key = index.get(row, "Key_name")?.as_text()?;
            let column = index.get(row, "Column_name")?.as_text()?;
            Some((key, column))
        })
        .collect();

    let primary: Vec<String> = entries
        .iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case("primary"))
        .map(|(_, column)| column.clone())
        .collect();
    if !primary.is_empty() {
        return primary;
    }

    let Some((first, _)) = entries.first() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter(|(key, _)| key == first)
        .map(|(_, column)| column.clone())
        .collect()
}

/// Backtick-quote identifiers that are not plain words or are reserved
fn quote_identifier(name: &str) -> String {
    let plain = !name.is_empty()
        && !name.as_bytes()[0].is_ascii_digit()
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    let reserved = RESERVED.iter().any(|word| word.eq_ignore_ascii_case(name));

    if plain && !reserved {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}
