//! Gateway configuration, read from the environment at startup.

use crate::ai::LlmConfig;
use crate::db::DorisConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub doris: DorisConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Include the full error chain in 500 responses.
    pub expose_traceback: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8018,
            expose_traceback: true,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        let server = &mut config.server;
        if let Some(v) = get("API_HOST") {
            server.host = v;
        }
        parse_into(&get, "API_PORT", &mut server.port)?;
        if let Some(v) = get("EXPOSE_TRACEBACK") {
            server.expose_traceback = parse_flag(&v);
        }

        let doris = &mut config.doris;
        if let Some(v) = get("DORIS_HOST") {
            doris.host = v;
        }
        parse_into(&get, "DORIS_PORT", &mut doris.port)?;
        if let Some(v) = get("DORIS_USER") {
            doris.user = v;
        }
        if let Some(v) = lookup("DORIS_PASSWORD") {
            doris.password = v;
        }
        if let Some(v) = get("DORIS_DATABASE") {
            doris.database = v;
        }
        parse_into(&get, "DORIS_MAX_CONNECTIONS", &mut doris.max_connections)?;
        parse_into(&get, "DORIS_CONNECT_RETRIES", &mut doris.connect_retries)?;
        parse_into(&get, "DORIS_RETRY_INTERVAL_SECS", &mut doris.retry_interval_secs)?;

        let llm = &mut config.llm;
        llm.api_key = get("DEEPSEEK_API_KEY").or_else(|| get("OPENAI_API_KEY"));
        if let Some(v) = get("DEEPSEEK_MODEL") {
            llm.model = v;
        }
        if let Some(v) = get("DEEPSEEK_BASE_URL") {
            llm.base_url = v;
        }
        parse_into(&get, "LLM_TEMPERATURE", &mut llm.temperature)?;
        parse_into(&get, "LLM_MAX_TOKENS", &mut llm.max_tokens)?;
        parse_into(&get, "LLM_TIMEOUT_SECS", &mut llm.timeout_secs)?;

        Ok(config)
    }
}

fn parse_into<T, G>(get: &G, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        *target = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw))?;
    }
    Ok(())
}

fn parse_flag(v: &str) -> bool {
    matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
