use anyhow::Result;
use serde_json::{Map, Number, Value};
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::{Column, Executor, Row as _, TypeInfo};
use std::time::Instant;

/// One result row: column name to value, in the column order the server returned.
pub type Row = Map<String, Value>;

/// Run a statement that returns rows. Sent unprepared so Doris-only syntax
/// (`SHOW RESOURCES`, AI functions) goes through untouched.
pub async fn execute_query(pool: &MySqlPool, sql: &str) -> Result<Vec<Row>> {
    let start = Instant::now();

    let rows = pool.fetch_all(sql).await?;

    tracing::debug!(
        rows = rows.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "query executed"
    );

    Ok(rows.iter().map(row_to_json).collect())
}

pub async fn execute_update(pool: &MySqlPool, sql: &str) -> Result<u64> {
    let result = pool.execute(sql).await?;
    Ok(result.rows_affected())
}

fn row_to_json(row: &MySqlRow) -> Row {
    let mut values = Map::with_capacity(row.columns().len());
    for (idx, col) in row.columns().iter().enumerate() {
        let value = mysql_value_to_json(row, idx, col.type_info().name());
        values.insert(col.name().to_string(), value);
    }
    values
}

fn mysql_value_to_json(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
    // Unprepared statements come back in the text protocol, so every value
    // decodes as a string first and is then narrowed by its column type.
    row.try_get_unchecked::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(|raw| text_to_json(raw, type_name))
        .unwrap_or(Value::Null)
}

pub(crate) fn text_to_json(raw: String, type_name: &str) -> Value {
    let type_name = type_name.to_ascii_uppercase();

    if type_name == "BOOLEAN" {
        return match raw.as_str() {
            "1" | "true" | "TRUE" => Value::Bool(true),
            "0" | "false" | "FALSE" => Value::Bool(false),
            _ => Value::String(raw),
        };
    }

    if type_name.contains("INT") {
        if let Ok(v) = raw.parse::<i64>() {
            return Value::Number(v.into());
        }
        if let Ok(v) = raw.parse::<u64>() {
            return Value::Number(v.into());
        }
        return Value::String(raw);
    }

    if ["FLOAT", "DOUBLE", "DECIMAL", "REAL"]
        .iter()
        .any(|t| type_name.contains(t))
    {
        return raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(raw));
    }

    Value::String(raw)
}
