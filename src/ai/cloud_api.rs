use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Bearer token. Never serialized.
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "deepseek-chat".into(),
            base_url: "https://api.deepseek.com".into(),
            temperature: 0.1,
            max_tokens: 2000,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// Apply per-request overrides; blank values keep the configured ones.
    pub fn with_overrides(
        &self,
        api_key: Option<String>,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        fn non_blank(v: Option<String>) -> Option<String> {
            v.filter(|s| !s.trim().is_empty())
        }

        Self {
            api_key: non_blank(api_key).or_else(|| self.api_key.clone()),
            model: non_blank(model).unwrap_or_else(|| self.model.clone()),
            base_url: non_blank(base_url).unwrap_or_else(|| self.base_url.clone()),
            ..self.clone()
        }
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }
}

/// Sampling parameters forwarded with every completion request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 2000,
        }
    }
}

/// Anything that can answer a system + user message pair with text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat_complete(
        &self,
        system: &str,
        user: &str,
        params: &GenerationParams,
    ) -> Result<String>;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints (OpenAI, DeepSeek, Qwen, ...).
pub struct OpenAiCompatClient {
    config: LlmConfig,
    api_key: String,
    http_client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("AI not configured: no API key provided"))?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            config,
            api_key,
            http_client,
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }
}

pub(crate) fn chat_request_body(
    model: &str,
    system: &str,
    user: &str,
    params: &GenerationParams,
) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system},
            {"role": "user", "content": user}
        ],
        "temperature": params.temperature,
        "max_tokens": params.max_tokens
    })
}

pub(crate) fn parse_chat_response(text: &str) -> Result<String> {
    let json: serde_json::Value = serde_json::from_str(text).context("invalid JSON from LLM API")?;
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("LLM API response has no message content: {}", text))
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    async fn chat_complete(
        &self,
        system: &str,
        user: &str,
        params: &GenerationParams,
    ) -> Result<String> {
        let body = chat_request_body(&self.config.model, system, user, params);

        let resp = self
            .http_client
            .post(self.config.completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(anyhow!("LLM API error ({}): {}", status, text));
        }

        parse_chat_response(&text)
    }
}
