use super::{introspection, query, quote_ident, ColumnInfo, Database, Row};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::{ConnectOptions, Connection, Executor, Row as _};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DorisConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Never echoed back in config dumps
    #[serde(skip_serializing, default)]
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub connect_retries: u32,
    pub retry_interval_secs: u64,
}

impl Default for DorisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9030,
            user: "root".into(),
            password: String::new(),
            database: "doris_db".into(),
            max_connections: 10,
            connect_retries: 30,
            retry_interval_secs: 2,
        }
    }
}

impl DorisConfig {
    fn connect_options(&self) -> MySqlConnectOptions {
        // Doris rejects several of the session variables sqlx sets by default.
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .pipes_as_concat(false)
            .no_engine_substitution(false)
            .timezone(None)
            .statement_cache_capacity(0)
    }
}

/// Pooled client bound to the gateway's database.
pub struct DorisClient {
    pool: MySqlPool,
    database: String,
}

impl DorisClient {
    pub async fn connect(config: &DorisConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(config.connect_options().database(&config.database))
            .await
            .with_context(|| format!("failed to open pool for database {}", config.database))?;

        Ok(Self {
            pool,
            database: config.database.clone(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub async fn ping(&self) -> Result<()> {
        query::execute_query(&self.pool, "SELECT 1 AS health").await?;
        Ok(())
    }

    pub async fn server_version(&self) -> Result<String> {
        let rows = query::execute_query(&self.pool, "SELECT version() AS version").await?;
        rows.first()
            .and_then(|row| row.get("version"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("server did not report a version"))
    }
}

#[async_trait]
impl Database for DorisClient {
    async fn execute_query(&self, sql: &str) -> Result<Vec<Row>> {
        query::execute_query(&self.pool, sql).await
    }

    async fn execute_update(&self, sql: &str) -> Result<u64> {
        query::execute_update(&self.pool, sql).await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        introspection::get_tables(&self.pool).await
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        introspection::get_columns(&self.pool, table).await
    }
}

/// Wait for the Doris frontend, make sure the database exists, then open the pool.
pub async fn bootstrap(config: &DorisConfig) -> Result<DorisClient> {
    let attempts = config.connect_retries.max(1);
    let interval = Duration::from_secs(config.retry_interval_secs);
    let mut last_error = None;

    for attempt in 1..=attempts {
        tracing::info!(
            attempt,
            attempts,
            host = %config.host,
            port = config.port,
            "waiting for Doris frontend"
        );

        match try_bootstrap(config).await {
            Ok(client) => {
                tracing::info!(database = %client.database(), "Doris database ready");
                return Ok(client);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Doris connection failed");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    let error = last_error.unwrap_or_else(|| anyhow!("no connection attempt was made"));
    Err(error.context(format!(
        "could not reach Doris at {}:{} after {} attempts",
        config.host, config.port, attempts
    )))
}

async fn try_bootstrap(config: &DorisConfig) -> Result<DorisClient> {
    let mut conn = config.connect_options().connect().await?;

    conn.execute(format!("CREATE DATABASE IF NOT EXISTS {}", quote_ident(&config.database)).as_str())
        .await?;

    let rows = conn.fetch_all("SHOW DATABASES").await?;
    let exists = rows.iter().any(|row| {
        row.try_get_unchecked::<String, _>(0)
            .map(|name| name == config.database)
            .unwrap_or(false)
    });
    conn.close().await?;

    if !exists {
        return Err(anyhow!(
            "database {} not listed after CREATE DATABASE",
            config.database
        ));
    }

    DorisClient::connect(config).await
}
