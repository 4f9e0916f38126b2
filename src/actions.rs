//! The `/api/execute` catalog: each action renders one SELECT that calls a
//! Doris AI function over a table column.

use crate::db::{quote_ident, quote_literal, Database, Row};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_LIMIT: u64 = 100;
const MAX_LIMIT: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Query,
    Sentiment,
    Classify,
    Extract,
    Stats,
    Similarity,
    Translate,
    Summarize,
    Mask,
    FixGrammar,
    Generate,
    Filter,
}

impl Action {
    pub const ALL: [Action; 12] = [
        Action::Query,
        Action::Sentiment,
        Action::Classify,
        Action::Extract,
        Action::Stats,
        Action::Similarity,
        Action::Translate,
        Action::Summarize,
        Action::Mask,
        Action::FixGrammar,
        Action::Generate,
        Action::Filter,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Action::Query => "query",
            Action::Sentiment => "sentiment",
            Action::Classify => "classify",
            Action::Extract => "extract",
            Action::Stats => "stats",
            Action::Similarity => "similarity",
            Action::Translate => "translate",
            Action::Summarize => "summarize",
            Action::Mask => "mask",
            Action::FixGrammar => "fixgrammar",
            Action::Generate => "generate",
            Action::Filter => "filter",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Action {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect();
        Action::ALL
            .into_iter()
            .find(|a| a.name() == normalized)
            .ok_or_else(|| ActionError::Unknown(s.to_string()))
    }
}

/// Request problems; these map to 400 at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action '{0}'; expected one of query, sentiment, classify, extract, stats, similarity, translate, summarize, mask, fixgrammar, generate, filter")]
    Unknown(String),

    #[error("action requires parameter '{0}'")]
    MissingParam(&'static str),

    #[error("parameter '{0}' is invalid: {1}")]
    InvalidParam(&'static str, String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub action: String,
    pub table: Option<String>,
    pub column: Option<String>,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedAction {
    pub action: Action,
    pub sql: String,
}

#[derive(Debug, Serialize)]
pub struct ActionResult {
    pub success: bool,
    pub action: String,
    pub sql: String,
    pub data: Vec<Row>,
    pub count: usize,
}

/// Validate the request and render its SQL.
pub fn prepare(request: ExecuteRequest) -> Result<PreparedAction, ActionError> {
    let action: Action = request.action.parse()?;

    let mut params = request.params.unwrap_or_default();
    if let Some(table) = request.table {
        params.insert("table".into(), Value::String(table));
    }
    if let Some(column) = request.column {
        params.insert("column".into(), Value::String(column));
    }

    let sql = build_sql(action, &Params(&params))?;
    Ok(PreparedAction { action, sql })
}

pub async fn run(db: &dyn Database, prepared: PreparedAction) -> Result<ActionResult> {
    tracing::info!(action = %prepared.action, sql = %prepared.sql, "executing action");
    let data = db.execute_query(&prepared.sql).await?;
    Ok(ActionResult {
        success: true,
        action: prepared.action.name().to_string(),
        sql: prepared.sql,
        count: data.len(),
        data,
    })
}

struct Params<'a>(&'a Map<String, Value>);

impl Params<'_> {
    fn text(&self, key: &'static str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn required(&self, key: &'static str) -> Result<String, ActionError> {
        self.text(key).ok_or(ActionError::MissingParam(key))
    }

    fn limit(&self) -> Result<u64, ActionError> {
        let limit = match self.0.get("limit") {
            None | Some(Value::Null) => DEFAULT_LIMIT,
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| ActionError::InvalidParam("limit", n.to_string()))?,
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| ActionError::InvalidParam("limit", s.clone()))?,
            Some(other) => return Err(ActionError::InvalidParam("limit", other.to_string())),
        };
        Ok(limit.clamp(1, MAX_LIMIT))
    }

    /// Array of strings, or one comma-separated string.
    fn list(&self, key: &'static str) -> Result<Vec<String>, ActionError> {
        let items: Vec<String> = match self.0.get(key) {
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                })
                .collect(),
            Some(Value::String(s)) => s.split(',').map(|p| p.trim().to_string()).collect(),
            _ => Vec::new(),
        };
        let items: Vec<String> = items.into_iter().filter(|s| !s.is_empty()).collect();
        if items.is_empty() {
            return Err(ActionError::MissingParam(key));
        }
        Ok(items)
    }
}

fn ai_call(function: &str, resource: Option<&str>, args: &[String]) -> String {
    let mut all: Vec<String> = Vec::with_capacity(args.len() + 1);
    if let Some(resource) = resource {
        all.push(quote_literal(resource));
    }
    all.extend(args.iter().cloned());
    format!("{}({})", function, all.join(", "))
}

fn array_literal(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| quote_literal(s)).collect();
    format!("[{}]", quoted.join(", "))
}

fn build_sql(action: Action, params: &Params<'_>) -> Result<String, ActionError> {
    let resource = params.text("resource");
    let resource = resource.as_deref();

    if action == Action::Generate && params.text("table").is_none() {
        let prompt = quote_literal(&params.required("prompt")?);
        return Ok(format!(
            "SELECT {} AS generated",
            ai_call("AI_GENERATE", resource, &[prompt])
        ));
    }

    let table = quote_ident(&params.required("table")?);

    match action {
        Action::Query => {
            let columns = match params.list("columns") {
                Ok(cols) => cols.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
                Err(_) => "*".to_string(),
            };
            Ok(format!("SELECT {} FROM {} LIMIT {}", columns, table, params.limit()?))
        }
        Action::Stats => match params.text("column") {
            Some(column) => {
                let col = quote_ident(&column);
                Ok(format!(
                    "SELECT COUNT(*) AS total_count, COUNT({col}) AS non_null_count, COUNT(DISTINCT {col}) AS distinct_count FROM {table}"
                ))
            }
            None => Ok(format!("SELECT COUNT(*) AS total_count FROM {table}")),
        },
        _ => {
            let col = quote_ident(&params.required("column")?);
            let limit = params.limit()?;
            let call = |function: &str, extra: Vec<String>| {
                let mut args = vec![col.clone()];
                args.extend(extra);
                ai_call(function, resource, &args)
            };

            let sql = match action {
                Action::Sentiment => format!(
                    "SELECT {col}, {} AS sentiment FROM {table} LIMIT {limit}",
                    call("AI_SENTIMENT", vec![])
                ),
                Action::Classify => format!(
                    "SELECT {col}, {} AS category FROM {table} LIMIT {limit}",
                    call("AI_CLASSIFY", vec![array_literal(&params.list("labels")?)])
                ),
                Action::Extract => format!(
                    "SELECT {col}, {} AS extracted FROM {table} LIMIT {limit}",
                    call("AI_EXTRACT", vec![array_literal(&params.list("labels")?)])
                ),
                Action::Similarity => format!(
                    "SELECT {col}, {} AS similarity FROM {table} ORDER BY similarity DESC LIMIT {limit}",
                    call("AI_SIMILARITY", vec![quote_literal(&params.required("text")?)])
                ),
                Action::Translate => format!(
                    "SELECT {col}, {} AS translated FROM {table} LIMIT {limit}",
                    call(
                        "AI_TRANSLATE",
                        vec![quote_literal(&params.required("target_language")?)]
                    )
                ),
                Action::Summarize => format!(
                    "SELECT {col}, {} AS summary FROM {table} LIMIT {limit}",
                    call("AI_SUMMARIZE", vec![])
                ),
                Action::Mask => format!(
                    "SELECT {col}, {} AS masked FROM {table} LIMIT {limit}",
                    call("AI_MASK", vec![array_literal(&params.list("labels")?)])
                ),
                Action::FixGrammar => format!(
                    "SELECT {col}, {} AS corrected FROM {table} LIMIT {limit}",
                    call("AI_FIXGRAMMAR", vec![])
                ),
                Action::Generate => {
                    let prompt = quote_literal(&params.required("prompt")?);
                    format!(
                        "SELECT {col}, {} AS generated FROM {table} LIMIT {limit}",
                        ai_call("AI_GENERATE", resource, &[format!("CONCAT({prompt}, {col})")])
                    )
                }
                Action::Filter => {
                    let condition = quote_literal(&format!("{}: ", params.required("condition")?));
                    format!(
                        "SELECT * FROM {table} WHERE {} LIMIT {limit}",
                        ai_call("AI_FILTER", resource, &[format!("CONCAT({condition}, {col})")])
                    )
                }
                Action::Query | Action::Stats => unreachable!("handled above"),
            };
            Ok(sql)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::FakeDatabase;
    use serde_json::json;

    fn request(value: Value) -> ExecuteRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_action_names() {
        assert_eq!("Sentiment".parse::<Action>().unwrap(), Action::Sentiment);
        assert_eq!("fix-grammar".parse::<Action>().unwrap(), Action::FixGrammar);
        assert_eq!("fix_grammar".parse::<Action>().unwrap(), Action::FixGrammar);
        assert!(matches!("drop".parse::<Action>(), Err(ActionError::Unknown(_))));
    }

    #[test]
    fn sentiment_with_resource_and_limit() {
        let prepared = prepare(request(json!({
            "action": "sentiment",
            "table": "customer_feedback",
            "column": "feedback_text",
            "params": {"limit": 50, "resource": "my_deepseek"}
        })))
        .unwrap();
        assert_eq!(
            prepared.sql,
            "SELECT `feedback_text`, AI_SENTIMENT('my_deepseek', `feedback_text`) AS sentiment FROM `customer_feedback` LIMIT 50"
        );
    }

    #[test]
    fn classify_renders_label_array() {
        let prepared = prepare(request(json!({
            "action": "classify",
            "table": "tickets",
            "column": "body",
            "params": {"labels": "billing, bug ,praise"}
        })))
        .unwrap();
        assert!(prepared
            .sql
            .contains("AI_CLASSIFY(`body`, ['billing', 'bug', 'praise']) AS category"));
        assert!(prepared.sql.ends_with("LIMIT 100"));
    }

    #[test]
    fn missing_labels_is_a_client_error() {
        let err = prepare(request(json!({"action": "mask", "table": "t", "column": "c"}))).unwrap_err();
        assert!(matches!(err, ActionError::MissingParam("labels")));
    }

    #[test]
    fn missing_table_is_a_client_error() {
        let err = prepare(request(json!({"action": "summarize", "column": "c"}))).unwrap_err();
        assert!(matches!(err, ActionError::MissingParam("table")));
    }

    #[test]
    fn literals_are_escaped() {
        let prepared = prepare(request(json!({
            "action": "similarity",
            "table": "t",
            "column": "c",
            "params": {"text": "it's great"}
        })))
        .unwrap();
        assert!(prepared.sql.contains("'it''s great'"));
        assert!(prepared.sql.contains("ORDER BY similarity DESC"));
    }

    #[test]
    fn limit_is_capped() {
        let prepared = prepare(request(json!({
            "action": "query",
            "table": "t",
            "params": {"limit": "999999", "columns": ["a", "b"]}
        })))
        .unwrap();
        assert_eq!(prepared.sql, "SELECT `a`, `b` FROM `t` LIMIT 10000");
    }

    #[test]
    fn stats_without_column_counts_rows() {
        let prepared = prepare(request(json!({"action": "stats", "table": "t"}))).unwrap();
        assert_eq!(prepared.sql, "SELECT COUNT(*) AS total_count FROM `t`");
    }

    #[test]
    fn generate_without_table_is_a_scalar_call() {
        let prepared = prepare(request(json!({
            "action": "generate",
            "params": {"prompt": "Hello"}
        })))
        .unwrap();
        assert_eq!(prepared.sql, "SELECT AI_GENERATE('Hello') AS generated");
    }

    #[test]
    fn filter_uses_condition_in_where() {
        let prepared = prepare(request(json!({
            "action": "filter",
            "table": "reviews",
            "column": "text",
            "params": {"condition": "mentions delivery"}
        })))
        .unwrap();
        assert_eq!(
            prepared.sql,
            "SELECT * FROM `reviews` WHERE AI_FILTER(CONCAT('mentions delivery: ', `text`)) LIMIT 100"
        );
    }

    #[tokio::test]
    async fn run_returns_rows_and_count() {
        let db = FakeDatabase::new().with_query_result(vec![json!({"total_count": 7})]);
        let prepared = prepare(request(json!({"action": "stats", "table": "t"}))).unwrap();
        let result = run(&db, prepared).await.unwrap();
        assert!(result.success);
        assert_eq!(result.action, "stats");
        assert_eq!(result.count, 1);
        assert_eq!(result.data[0]["total_count"], 7);
    }
}
