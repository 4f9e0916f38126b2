use super::query::{execute_query, Row};
use super::quote_ident;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::mysql::MySqlPool;

/// One column as reported by `DESCRIBE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub is_key: bool,
}

pub async fn get_tables(pool: &MySqlPool) -> Result<Vec<String>> {
    let rows = execute_query(pool, "SHOW TABLES").await?;
    Ok(rows.iter().filter_map(first_column_text).collect())
}

pub async fn get_databases(pool: &MySqlPool) -> Result<Vec<String>> {
    let rows = execute_query(pool, "SHOW DATABASES").await?;
    Ok(rows.iter().filter_map(first_column_text).collect())
}

pub async fn get_columns(pool: &MySqlPool, table: &str) -> Result<Vec<ColumnInfo>> {
    let rows = execute_query(pool, &format!("DESCRIBE {}", quote_ident(table))).await?;
    if rows.is_empty() {
        return Err(anyhow!("table {} has no columns or does not exist", table));
    }
    rows.iter().map(column_from_describe_row).collect()
}

/// `SHOW TABLES` names its only column `Tables_in_<db>`, so read by position.
fn first_column_text(row: &Row) -> Option<String> {
    row.values().next().and_then(value_text)
}

pub(crate) fn column_from_describe_row(row: &Row) -> Result<ColumnInfo> {
    let name = row
        .get("Field")
        .and_then(value_text)
        .ok_or_else(|| anyhow!("DESCRIBE row without a Field column"))?;
    let data_type = row.get("Type").and_then(value_text).unwrap_or_default();
    let is_nullable = row
        .get("Null")
        .and_then(value_text)
        .map(|v| v.eq_ignore_ascii_case("yes"))
        .unwrap_or(true);
    let is_key = row
        .get("Key")
        .and_then(value_text)
        .map(|v| v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(false);

    Ok(ColumnInfo {
        name,
        data_type,
        is_nullable,
        column_default: row.get("Default").and_then(value_text),
        is_key,
    })
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
