use super::cloud_api::{ChatModel, GenerationParams};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// `ChatModel` that replies with a fixed script and remembers what it was asked.
pub(crate) struct ScriptedModel {
    reply: Result<String, String>,
    delay: Option<Duration>,
    pub calls: Mutex<Vec<(String, String, GenerationParams)>>,
}

impl ScriptedModel {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.calls.lock().unwrap().last().map(|(_, user, _)| user.clone())
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat_complete(
        &self,
        system: &str,
        user: &str,
        params: &GenerationParams,
    ) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string(), *params));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply.clone().map_err(|e| anyhow!(e))
    }
}
