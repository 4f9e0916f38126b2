use super::context::{DistinctValueSet, SampleRow, SchemaContext, TableDescriptor, TableSample};
use crate::db::{quote_ident, Database};
use anyhow::{anyhow, Context, Result};
use futures::stream::{self, StreamExt};
use serde_json::Value;

/// Limits for how much live data is pulled into a prompt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalOptions {
    pub sample_rows: usize,
    pub distinct_limit: usize,
    pub max_sample_tables: usize,
    /// Upper bound on per-table reads in flight at once.
    pub concurrency: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            sample_rows: 3,
            distinct_limit: 30,
            max_sample_tables: 5,
            concurrency: 5,
        }
    }
}

/// Pulls table definitions and representative values out of the live database.
///
/// Only listing the tables is allowed to fail the request. A table that cannot
/// be described or sampled simply contributes less context.
pub struct SchemaRetriever<'a> {
    db: &'a dyn Database,
    options: RetrievalOptions,
}

impl<'a> SchemaRetriever<'a> {
    pub fn new(db: &'a dyn Database) -> Self {
        Self::with_options(db, RetrievalOptions::default())
    }

    pub fn with_options(db: &'a dyn Database, options: RetrievalOptions) -> Self {
        Self { db, options }
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.db.list_tables().await.context("failed to list tables")
    }

    pub async fn describe_table(&self, name: &str) -> Result<TableDescriptor> {
        let columns = self
            .db
            .describe_table(name)
            .await
            .with_context(|| format!("failed to describe table {}", name))?;
        Ok(TableDescriptor {
            name: name.to_string(),
            columns,
        })
    }

    /// Describe every table, skipping the ones that fail.
    ///
    /// `_question` is reserved for relevance filtering; all tables are kept.
    pub async fn describe_tables(&self, _question: &str) -> Result<SchemaContext> {
        let tables = self.list_tables().await?;
        let total = tables.len();

        let described: Vec<Result<TableDescriptor>> = stream::iter(tables)
            .map(|name| async move { self.describe_table(&name).await })
            .buffered(self.concurrency(total))
            .collect()
            .await;

        let mut schema = SchemaContext::default();
        for result in described {
            match result {
                Ok(table) => schema.tables.push(table),
                Err(e) => tracing::warn!(error = %format!("{:#}", e), "skipping table"),
            }
        }

        if total > 0 && schema.tables.is_empty() {
            return Err(anyhow!("none of the {} tables could be described", total));
        }

        Ok(schema)
    }

    pub async fn build_ddl_statements(&self, question: &str) -> Result<Vec<String>> {
        Ok(self.describe_tables(question).await?.ddl_statements())
    }

    /// Up to `limit` rows from the table; empty when the table is empty or unreadable.
    pub async fn sample_rows(&self, table: &str, limit: usize) -> Vec<SampleRow> {
        let sql = format!("SELECT * FROM {} LIMIT {}", quote_ident(table), limit);
        match self.db.execute_query(&sql).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(table, error = %e, "sample rows unavailable");
                Vec::new()
            }
        }
    }

    /// Distinct non-empty values of one column, rendered as text.
    pub async fn distinct_text_values(&self, table: &str, column: &str, limit: usize) -> Vec<String> {
        let col = quote_ident(column);
        let sql = format!(
            "SELECT DISTINCT {col} FROM {} WHERE {col} IS NOT NULL LIMIT {}",
            quote_ident(table),
            limit
        );

        match self.db.execute_query(&sql).await {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| row.get(column).or_else(|| row.values().next()))
                .filter_map(value_as_text)
                .collect(),
            Err(e) => {
                tracing::warn!(table, column, error = %e, "distinct values unavailable");
                Vec::new()
            }
        }
    }

    pub async fn sample_table(&self, table: &TableDescriptor) -> TableSample {
        let rows = self.sample_rows(&table.name, self.options.sample_rows).await;
        let mut sample = TableSample {
            table: table.name.clone(),
            rows,
            distinct_values: Vec::new(),
        };
        if sample.rows.is_empty() {
            return sample;
        }

        for col in table.location_text_columns() {
            let values = self
                .distinct_text_values(&table.name, &col.name, self.options.distinct_limit)
                .await;
            if !values.is_empty() {
                sample.distinct_values.push(DistinctValueSet {
                    table: table.name.clone(),
                    column: col.name.clone(),
                    values,
                });
            }
        }
        sample
    }

    /// Samples for the first `max_sample_tables` tables, in schema order.
    pub async fn sample_tables(&self, schema: &SchemaContext) -> Vec<TableSample> {
        let tables: Vec<TableDescriptor> = schema
            .tables
            .iter()
            .take(self.options.max_sample_tables)
            .cloned()
            .collect();
        let concurrency = self.concurrency(tables.len());

        stream::iter(tables)
            .map(|table| async move { self.sample_table(&table).await })
            .buffered(concurrency)
            .collect()
            .await
    }

    fn concurrency(&self, work: usize) -> usize {
        work.min(self.options.concurrency).max(1)
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
