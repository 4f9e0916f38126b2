//! In-memory `Database` used by unit tests.

use super::{ColumnInfo, Database, Row};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;

pub(crate) struct FakeTable {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
}

#[derive(Default)]
pub(crate) struct FakeDatabase {
    tables: Vec<FakeTable>,
    broken_tables: HashSet<String>,
    fail_listing: bool,
    fail_sampling: bool,
    /// Reply for any statement that is not a sample/distinct probe.
    query_result: Option<Result<Vec<Row>, String>>,
    executed: Mutex<Vec<String>>,
}

pub(crate) fn column(name: &str, data_type: &str, nullable: bool) -> ColumnInfo {
    ColumnInfo {
        name: name.into(),
        data_type: data_type.into(),
        is_nullable: nullable,
        column_default: None,
        is_key: false,
    }
}

pub(crate) fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str, columns: Vec<ColumnInfo>, rows: Vec<Value>) -> Self {
        self.tables.push(FakeTable {
            name: name.into(),
            columns,
            rows: rows.into_iter().map(row).collect(),
        });
        self
    }

    pub fn with_broken_table(mut self, name: &str) -> Self {
        self.broken_tables.insert(name.into());
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn failing_sampling(mut self) -> Self {
        self.fail_sampling = true;
        self
    }

    pub fn with_query_result(mut self, rows: Vec<Value>) -> Self {
        self.query_result = Some(Ok(rows.into_iter().map(row).collect()));
        self
    }

    pub fn with_query_error(mut self, message: &str) -> Self {
        self.query_result = Some(Err(message.into()));
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn table(&self, name: &str) -> Result<&FakeTable> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| anyhow!("Unknown table '{}'", name))
    }

    fn sample(&self, sql: &str) -> Option<Result<Vec<Row>>> {
        // SELECT * FROM `t` LIMIT n
        let rest = sql.strip_prefix("SELECT * FROM `")?;
        let (table, tail) = rest.split_once('`')?;
        let limit: usize = tail.trim().strip_prefix("LIMIT ")?.parse().ok()?;
        if self.fail_sampling {
            return Some(Err(anyhow!("sampling disabled")));
        }
        Some(self.table(table).map(|t| t.rows.iter().take(limit).cloned().collect()))
    }

    fn distinct(&self, sql: &str) -> Option<Result<Vec<Row>>> {
        // SELECT DISTINCT `c` FROM `t` WHERE `c` IS NOT NULL LIMIT n
        let rest = sql.strip_prefix("SELECT DISTINCT `")?;
        let (column, tail) = rest.split_once('`')?;
        let tail = tail.strip_prefix(" FROM `")?;
        let (table, tail) = tail.split_once('`')?;
        let limit: usize = tail.rsplit_once("LIMIT ")?.1.trim().parse().ok()?;
        if self.fail_sampling {
            return Some(Err(anyhow!("sampling disabled")));
        }
        let result = self.table(table).map(|t| {
            let mut seen: Vec<Value> = Vec::new();
            for r in &t.rows {
                if let Some(v) = r.get(column) {
                    if !v.is_null() && !seen.contains(v) {
                        seen.push(v.clone());
                    }
                }
            }
            seen.into_iter()
                .take(limit)
                .map(|v| {
                    let mut out = Row::new();
                    out.insert(column.to_string(), v);
                    out
                })
                .collect()
        });
        Some(result)
    }
}

#[async_trait]
impl Database for FakeDatabase {
    async fn execute_query(&self, sql: &str) -> Result<Vec<Row>> {
        self.executed.lock().unwrap().push(sql.to_string());
        if let Some(result) = self.sample(sql).or_else(|| self.distinct(sql)) {
            return result;
        }
        match &self.query_result {
            Some(Ok(rows)) => Ok(rows.clone()),
            Some(Err(message)) => Err(anyhow!("{}", message)),
            None => Ok(Vec::new()),
        }
    }

    async fn execute_update(&self, sql: &str) -> Result<u64> {
        self.executed.lock().unwrap().push(sql.to_string());
        match &self.query_result {
            Some(Err(message)) => Err(anyhow!("{}", message)),
            _ => Ok(1),
        }
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        if self.fail_listing {
            return Err(anyhow!("SHOW TABLES failed: connection refused"));
        }
        Ok(self.tables.iter().map(|t| t.name.clone()).collect())
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        if self.broken_tables.contains(table) {
            return Err(anyhow!("DESCRIBE {} failed", table));
        }
        Ok(self.table(table)?.columns.clone())
    }
}
