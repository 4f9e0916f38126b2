//! Natural-language question to executed SQL.
//!
//! One `answer` call runs retrieval, prompt composition, generation,
//! sanitization and execution once, in that order. Nothing is retried and
//! nothing is cached between calls.

use super::cloud_api::{ChatModel, GenerationParams};
use super::context::PromptContext;
use super::prompt;
use super::retriever::{RetrievalOptions, SchemaRetriever};
use crate::db::{Database, Row};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DIALECT: &str = "Apache Doris";

/// Pipeline stage an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Grounding,
    Generation,
    Execution,
}

#[derive(Debug, Error)]
pub enum Nl2SqlError {
    #[error("schema retrieval failed: {0:#}")]
    Schema(anyhow::Error),

    #[error("SQL generation failed: {0:#}")]
    Generation(anyhow::Error),

    #[error("SQL generation failed: model returned no SQL")]
    EmptyGeneration,

    #[error("failed to execute generated SQL `{sql}`: {error:#}")]
    Execution { sql: String, error: anyhow::Error },
}

impl Nl2SqlError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Schema(_) => Stage::Grounding,
            Self::Generation(_) | Self::EmptyGeneration => Stage::Generation,
            Self::Execution { .. } => Stage::Execution,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub sql: String,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone)]
pub struct Nl2SqlOptions {
    pub dialect: String,
    pub generation: GenerationParams,
    pub retrieval: RetrievalOptions,
    /// Hard limit on the model call; the whole answer fails when it elapses.
    pub llm_timeout: Duration,
}

impl Default for Nl2SqlOptions {
    fn default() -> Self {
        Self {
            dialect: DEFAULT_DIALECT.into(),
            generation: GenerationParams::default(),
            retrieval: RetrievalOptions::default(),
            llm_timeout: Duration::from_secs(60),
        }
    }
}

pub struct Nl2Sql<'a> {
    db: &'a dyn Database,
    llm: &'a dyn ChatModel,
    options: Nl2SqlOptions,
}

impl<'a> Nl2Sql<'a> {
    pub fn new(db: &'a dyn Database, llm: &'a dyn ChatModel) -> Self {
        Self::with_options(db, llm, Nl2SqlOptions::default())
    }

    pub fn with_options(db: &'a dyn Database, llm: &'a dyn ChatModel, options: Nl2SqlOptions) -> Self {
        Self { db, llm, options }
    }

    pub async fn answer(&self, question: &str) -> Result<Answer, Nl2SqlError> {
        let sql = self.generate_sql(question).await?;
        let rows = self.run_sql(&sql).await?;
        tracing::info!(rows = rows.len(), "generated SQL executed");
        Ok(Answer { sql, rows })
    }

    /// Retrieval, composition and generation, without executing the result.
    pub async fn generate_sql(&self, question: &str) -> Result<String, Nl2SqlError> {
        let context = self.build_context(question).await?;
        let prompt = prompt::compose(&context);
        tracing::debug!(prompt_chars = prompt.chars().count(), "prompt composed");

        let system = prompt::system_message(&self.options.dialect);
        let call = self
            .llm
            .chat_complete(&system, &prompt, &self.options.generation);
        let raw = match tokio::time::timeout(self.options.llm_timeout, call).await {
            Ok(result) => result.map_err(Nl2SqlError::Generation)?,
            Err(_) => {
                return Err(Nl2SqlError::Generation(anyhow::anyhow!(
                    "LLM call timed out after {}s",
                    self.options.llm_timeout.as_secs()
                )))
            }
        };

        let sql = sanitize_sql(&raw);
        if sql.is_empty() {
            return Err(Nl2SqlError::EmptyGeneration);
        }
        tracing::info!(%sql, "SQL generated");
        Ok(sql)
    }

    pub async fn build_context(&self, question: &str) -> Result<PromptContext, Nl2SqlError> {
        let retriever = SchemaRetriever::with_options(self.db, self.options.retrieval);
        let schema = retriever
            .describe_tables(question)
            .await
            .map_err(Nl2SqlError::Schema)?;
        let samples = retriever.sample_tables(&schema).await;

        Ok(PromptContext {
            dialect: self.options.dialect.clone(),
            ddl_statements: schema.ddl_statements(),
            samples,
            examples: Vec::new(),
            documentation: Vec::new(),
            question: question.to_string(),
        })
    }

    /// Execute a generated statement with its trailing terminator removed.
    pub async fn run_sql(&self, sql: &str) -> Result<Vec<Row>, Nl2SqlError> {
        self.db
            .execute_query(strip_terminator(sql))
            .await
            .map_err(|error| Nl2SqlError::Execution {
                sql: sql.to_string(),
                error,
            })
    }
}

/// Strip surrounding whitespace and markdown code fences from a model reply.
///
/// Stripping repeats until nothing changes, so nested fences are removed too.
pub fn sanitize_sql(raw: &str) -> String {
    let mut sql = raw.trim();
    loop {
        let stripped = strip_fences(sql);
        if stripped == sql {
            return sql.to_string();
        }
        sql = stripped;
    }
}

fn strip_fences(sql: &str) -> &str {
    let mut sql = sql.trim();
    if let Some(rest) = sql.strip_prefix("```") {
        sql = strip_language_tag(rest);
    }
    if let Some(rest) = sql.strip_suffix("```") {
        sql = rest;
    }
    sql.trim()
}

/// Drop a `sql` or `mysql` info string after an opening fence. Anything else
/// on the fence line is part of the statement.
fn strip_language_tag(rest: &str) -> &str {
    for tag in ["mysql", "sql"] {
        let Some(prefix) = rest.get(..tag.len()) else {
            continue;
        };
        let after = &rest[tag.len()..];
        let at_boundary = after
            .chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || c == '`');
        if prefix.eq_ignore_ascii_case(tag) && at_boundary {
            return after;
        }
    }
    rest
}

/// Remove exactly one trailing `;`, if present.
pub fn strip_terminator(sql: &str) -> &str {
    let trimmed = sql.trim_end();
    trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end()
}
