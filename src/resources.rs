//! LLM provider configurations stored as Doris `ai` resources.

use crate::db::{quote_literal, Database, Row};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct LlmResourceRequest {
    pub resource_name: String,
    /// openai / deepseek / qwen / zhipu / local ...
    pub provider_type: String,
    pub endpoint: String,
    pub model_name: String,
    pub api_key: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmResource {
    #[serde(rename = "ResourceName")]
    pub name: String,
    #[serde(rename = "ResourceType")]
    pub resource_type: String,
    pub properties: Map<String, Value>,
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("resource name must not be empty"));
    }
    Ok(())
}

pub fn create_resource_sql(req: &LlmResourceRequest) -> Result<String> {
    validate_name(&req.resource_name)?;

    let mut properties = vec![
        "'type' = 'ai'".to_string(),
        format!("'ai.provider_type' = {}", quote_literal(&req.provider_type)),
        format!("'ai.endpoint' = {}", quote_literal(&req.endpoint)),
        format!("'ai.model_name' = {}", quote_literal(&req.model_name)),
    ];
    if let Some(key) = req.api_key.as_deref().filter(|k| !k.is_empty()) {
        properties.push(format!("'ai.api_key' = {}", quote_literal(key)));
    }
    // Doris stores every property as a string
    if let Some(t) = req.temperature {
        properties.push(format!("'ai.temperature' = '{}'", t));
    }
    if let Some(m) = req.max_tokens {
        properties.push(format!("'ai.max_tokens' = '{}'", m));
    }

    Ok(format!(
        "CREATE RESOURCE {}\nPROPERTIES (\n    {}\n)",
        quote_literal(&req.resource_name),
        properties.join(",\n    ")
    ))
}

pub async fn create(db: &dyn Database, req: &LlmResourceRequest) -> Result<String> {
    let sql = create_resource_sql(req)?;
    tracing::info!(
        resource = %req.resource_name,
        provider = %req.provider_type,
        endpoint = %req.endpoint,
        model = %req.model_name,
        "creating LLM resource"
    );
    db.execute_update(&sql).await?;
    Ok(sql)
}

pub async fn list(db: &dyn Database) -> Result<Vec<LlmResource>> {
    let rows = db
        .execute_query(r#"SHOW RESOURCES WHERE NAME LIKE "%""#)
        .await?;
    Ok(group_ai_resources(&rows))
}

/// `SHOW RESOURCES` returns one row per property; fold them per resource.
pub fn group_ai_resources(rows: &[Row]) -> Vec<LlmResource> {
    let mut resources: Vec<LlmResource> = Vec::new();

    for row in rows {
        let field = |key: &str| row.get(key).and_then(Value::as_str);
        let (Some(name), Some(resource_type)) = (field("Name"), field("ResourceType")) else {
            continue;
        };
        if resource_type != "ai" {
            continue;
        }

        let idx = match resources.iter().position(|r| r.name == name) {
            Some(idx) => idx,
            None => {
                resources.push(LlmResource {
                    name: name.to_string(),
                    resource_type: resource_type.to_string(),
                    properties: Map::new(),
                });
                resources.len() - 1
            }
        };

        if let (Some(item), Some(value)) = (field("Item"), row.get("Value")) {
            if !item.is_empty() && !value.is_null() {
                resources[idx].properties.insert(item.to_string(), value.clone());
            }
        }
    }

    resources
}

pub async fn test_resource(db: &dyn Database, name: &str) -> Result<Option<Row>> {
    validate_name(name)?;
    let sql = format!(
        "SELECT AI_GENERATE({}, 'Hello') AS test_result",
        quote_literal(name)
    );
    Ok(db.execute_query(&sql).await?.into_iter().next())
}

pub async fn delete(db: &dyn Database, name: &str) -> Result<()> {
    validate_name(name)?;
    db.execute_update(&format!("DROP RESOURCE {}", quote_literal(name)))
        .await?;
    tracing::info!(resource = %name, "LLM resource dropped");
    Ok(())
}
