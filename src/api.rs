//! HTTP surface of the gateway.

use crate::actions::{self, ActionError, ExecuteRequest};
use crate::ai::{ChatModel, LlmConfig, Nl2Sql, Nl2SqlOptions, OpenAiCompatClient, RetrievalOptions};
use crate::config::GatewayConfig;
use crate::db::Database;
use crate::resources::{self, LlmResourceRequest};
use crate::upload::{self, ImportOptions, UploadError};
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

const DEFAULT_PREVIEW_ROWS: usize = 10;

/// Builds the chat model for one natural-language request.
pub type ModelFactory = Arc<dyn Fn(LlmConfig) -> anyhow::Result<Arc<dyn ChatModel>> + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub config: Arc<GatewayConfig>,
    model_factory: ModelFactory,
}

impl AppState {
    pub fn new(db: Arc<dyn Database>, config: GatewayConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
            model_factory: Arc::new(|llm: LlmConfig| -> anyhow::Result<Arc<dyn ChatModel>> {
                Ok(Arc::new(OpenAiCompatClient::new(llm)?))
            }),
        }
    }

    pub fn with_model_factory(mut self, factory: ModelFactory) -> Self {
        self.model_factory = factory;
        self
    }

    fn internal(&self, error: impl Into<anyhow::Error>) -> ApiError {
        let error = error.into();
        tracing::error!(error = %format!("{:#}", error), "request failed");
        ApiError::Internal {
            message: format!("{:#}", error),
            traceback: self
                .config
                .server
                .expose_traceback
                .then(|| format!("{:?}", error)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{message}")]
    Internal {
        message: String,
        traceback: Option<String>,
    },
}

impl From<ActionError> for ApiError {
    fn from(e: ActionError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(error) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": error }))).into_response()
            }
            ApiError::Internal { message, traceback } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message, "traceback": traceback })),
            )
                .into_response(),
        }
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/execute", post(execute))
        .route("/api/tables", get(list_tables))
        .route("/api/tables/:name/schema", get(table_schema))
        .route("/api/llm/config", post(create_llm_config).get(list_llm_configs))
        .route("/api/llm/config/:name/test", post(test_llm_config))
        .route("/api/llm/config/:name", delete(delete_llm_config))
        .route("/api/query/natural", post(natural_query))
        .route("/api/upload/preview", post(upload_preview))
        .route("/api/upload", post(upload_file))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "service": "Doris AI gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "GET /api/health",
            "POST /api/execute",
            "GET /api/tables",
            "GET /api/tables/:name/schema",
            "POST /api/llm/config",
            "GET /api/llm/config",
            "POST /api/llm/config/:name/test",
            "DELETE /api/llm/config/:name",
            "POST /api/query/natural",
            "POST /api/upload/preview",
            "POST /api/upload",
        ],
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let connected = match state.db.execute_query("SELECT 1 AS health").await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "health probe failed");
            false
        }
    };
    Json(json!({ "success": true, "doris_connected": connected }))
}

pub async fn execute(State(state): State<AppState>, Json(request): Json<ExecuteRequest>) -> ApiResult {
    let prepared = actions::prepare(request)?;
    let result = actions::run(state.db.as_ref(), prepared)
        .await
        .map_err(|e| state.internal(e))?;
    Ok(Json(json!(result)))
}

pub async fn list_tables(State(state): State<AppState>) -> ApiResult {
    let tables = state.db.list_tables().await.map_err(|e| state.internal(e))?;
    Ok(Json(json!({ "success": true, "count": tables.len(), "tables": tables })))
}

pub async fn table_schema(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let columns = state
        .db
        .describe_table(&name)
        .await
        .map_err(|e| state.internal(e))?;
    Ok(Json(json!({ "success": true, "table": name, "columns": columns })))
}

pub async fn create_llm_config(
    State(state): State<AppState>,
    Json(request): Json<LlmResourceRequest>,
) -> ApiResult {
    if let Err(e) = resources::validate_name(&request.resource_name) {
        return Err(ApiError::BadRequest(e.to_string()));
    }
    let sql = resources::create(state.db.as_ref(), &request)
        .await
        .map_err(|e| state.internal(e))?;
    Ok(Json(json!({
        "success": true,
        "message": format!("LLM resource '{}' created", request.resource_name),
        "sql": sql,
    })))
}

pub async fn list_llm_configs(State(state): State<AppState>) -> ApiResult {
    let resources = resources::list(state.db.as_ref())
        .await
        .map_err(|e| state.internal(e))?;
    Ok(Json(json!({ "success": true, "count": resources.len(), "resources": resources })))
}

pub async fn test_llm_config(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let result = resources::test_resource(state.db.as_ref(), &name)
        .await
        .map_err(|e| state.internal(e))?;
    Ok(Json(json!({ "success": true, "resource": name, "result": result })))
}

pub async fn delete_llm_config(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    resources::delete(state.db.as_ref(), &name)
        .await
        .map_err(|e| state.internal(e))?;
    Ok(Json(json!({ "success": true, "message": format!("LLM resource '{}' deleted", name) })))
}

#[derive(Debug, Deserialize)]
pub struct NaturalQueryRequest {
    pub query: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

pub async fn natural_query(
    State(state): State<AppState>,
    Json(request): Json<NaturalQueryRequest>,
) -> ApiResult {
    let NaturalQueryRequest {
        query,
        api_key,
        model,
        base_url,
    } = request;
    let question = query.as_deref().map(str::trim).unwrap_or_default();
    if question.is_empty() {
        return Err(ApiError::BadRequest("query is required".into()));
    }

    let llm = state.config.llm.with_overrides(api_key, model, base_url);
    if llm.api_key.is_none() {
        return Err(ApiError::BadRequest(
            "no API key: pass api_key or set DEEPSEEK_API_KEY".into(),
        ));
    }

    let options = Nl2SqlOptions {
        generation: llm.generation_params(),
        llm_timeout: llm.timeout(),
        retrieval: RetrievalOptions::default(),
        ..Nl2SqlOptions::default()
    };
    let (model_name, endpoint) = (llm.model.clone(), llm.base_url.clone());
    let model = (state.model_factory)(llm).map_err(|e| state.internal(e))?;

    let span = tracing::info_span!("natural_query", request_id = %uuid::Uuid::new_v4());
    let answer = async {
        tracing::info!(question, model = %model_name, base_url = %endpoint, "answering natural-language query");
        Nl2Sql::with_options(state.db.as_ref(), model.as_ref(), options)
            .answer(question)
            .await
    }
    .instrument(span)
    .await
    .map_err(|e| {
        tracing::warn!(stage = ?e.stage(), "natural-language query failed");
        state.internal(e)
    })?;

    Ok(Json(json!({
        "success": true,
        "query": query,
        "sql": answer.sql,
        "count": answer.rows.len(),
        "data": answer.rows,
    })))
}

#[derive(Debug, Default)]
struct UploadForm {
    filename: String,
    content: Vec<u8>,
    fields: HashMap<String, String>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let bad = |e: axum::extract::multipart::MultipartError| ApiError::BadRequest(e.to_string());
    let mut form = UploadForm::default();
    let mut has_file = false;

    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            form.filename = field.file_name().unwrap_or("upload.xlsx").to_string();
            form.content = field.bytes().await.map_err(bad)?.to_vec();
            has_file = true;
        } else {
            form.fields.insert(name, field.text().await.map_err(bad)?);
        }
    }

    if !has_file {
        return Err(ApiError::BadRequest("multipart field 'file' is required".into()));
    }
    Ok(form)
}

impl AppState {
    fn upload_error(&self, e: UploadError) -> ApiError {
        match e {
            UploadError::Database(inner) => self.internal(inner),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PreviewParams {
    pub rows: Option<usize>,
}

pub async fn upload_preview(
    State(state): State<AppState>,
    Query(params): Query<PreviewParams>,
    multipart: Multipart,
) -> ApiResult {
    let form = read_upload_form(multipart).await?;
    let rows = match (params.rows, form.fields.get("rows")) {
        (Some(rows), _) => rows,
        (None, Some(raw)) => raw
            .trim()
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("rows must be a number, got {:?}", raw)))?,
        (None, None) => DEFAULT_PREVIEW_ROWS,
    };

    let preview = upload::preview(&form.filename, &form.content, rows).map_err(|e| state.upload_error(e))?;
    Ok(Json(json!({
        "success": true,
        "filename": form.filename,
        "columns": preview.columns,
        "rows": preview.rows,
        "total_rows": preview.total_rows,
    })))
}

/// Only an explicit yes creates the table; a missing field defaults to yes.
fn parse_create_table(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

pub async fn upload_file(State(state): State<AppState>, multipart: Multipart) -> ApiResult {
    let form = read_upload_form(multipart).await?;

    let table_name = form
        .fields
        .get("table_name")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("table_name is required".into()))?;

    let column_mapping = match form.fields.get("column_mapping").filter(|m| !m.trim().is_empty()) {
        Some(raw) => Some(
            serde_json::from_str::<HashMap<String, String>>(raw)
                .map_err(|e| ApiError::BadRequest(format!("column_mapping is not a JSON object: {}", e)))?,
        ),
        None => None,
    };

    let create_table = form
        .fields
        .get("create_table")
        .map_or(true, |v| parse_create_table(v));

    let options = ImportOptions {
        table_name,
        column_mapping,
        create_table,
    };
    let summary = upload::import(state.db.as_ref(), &form.filename, &form.content, &options)
        .await
        .map_err(|e| state.upload_error(e))?;
    Ok(Json(json!(summary)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedModel;
    use crate::db::testing::{column, FakeDatabase};
    use serde_json::json;

    fn state_with(db: FakeDatabase, reply: &str, api_key: Option<&str>) -> AppState {
        let mut config = GatewayConfig::default();
        config.llm.api_key = api_key.map(str::to_string);
        let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel::replying(reply));
        AppState::new(Arc::new(db), config).with_model_factory(Arc::new(
            move |_: LlmConfig| -> anyhow::Result<Arc<dyn ChatModel>> { Ok(model.clone()) },
        ))
    }

    fn natural(query: &str) -> Json<NaturalQueryRequest> {
        Json(NaturalQueryRequest {
            query: Some(query.into()),
            api_key: None,
            model: None,
            base_url: None,
        })
    }

    fn status(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[tokio::test]
    async fn natural_query_returns_sql_and_rows() {
        let db = FakeDatabase::new()
            .with_table("t", vec![column("n", "INT", true)], vec![json!({"n": 1})])
            .with_query_result(vec![json!({"n": 1})]);
        let state = state_with(db, "```sql\nSELECT * FROM t;\n```", Some("sk-test"));

        let Json(body) = natural_query(State(state), natural("all rows")).await.unwrap();

        assert_eq!(body["success"], true);
        assert_eq!(body["query"], "all rows");
        assert_eq!(body["sql"], "SELECT * FROM t;");
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn natural_query_echoes_question_as_sent() {
        let state = state_with(FakeDatabase::new(), "SELECT 1", Some("sk-test"));

        let Json(body) = natural_query(State(state), natural("  how many rows?\n"))
            .await
            .unwrap();

        assert_eq!(body["query"], "  how many rows?\n");
    }

    #[test]
    fn router_accepts_every_handler() {
        fn assert_send<T: Send>(_: &T) {}

        let state = state_with(FakeDatabase::new(), "", None);
        assert_send(&natural_query(State(state.clone()), natural("q")));
        let _ = router(state);
    }

    #[test]
    fn create_table_needs_an_explicit_yes() {
        for yes in ["true", "TRUE", "1", "yes", " Yes "] {
            assert!(parse_create_table(yes), "{yes:?}");
        }
        for no in ["false", "0", "no", "maybe", ""] {
            assert!(!parse_create_table(no), "{no:?}");
        }
    }

    #[tokio::test]
    async fn natural_query_requires_question_and_key() {
        let state = state_with(FakeDatabase::new(), "SELECT 1", Some("sk-test"));
        let err = natural_query(State(state), natural("  ")).await.unwrap_err();
        assert_eq!(status(err), StatusCode::BAD_REQUEST);

        let state = state_with(FakeDatabase::new(), "SELECT 1", None);
        let err = natural_query(State(state), natural("count rows")).await.unwrap_err();
        assert_eq!(status(err), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn natural_query_failure_is_internal_with_traceback() {
        let db = FakeDatabase::new().failing_listing();
        let state = state_with(db, "SELECT 1", Some("sk-test"));

        let err = natural_query(State(state), natural("count rows")).await.unwrap_err();
        match &err {
            ApiError::Internal { message, traceback } => {
                assert!(message.contains("schema retrieval failed"));
                assert!(traceback.is_some());
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(status(err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn traceback_hidden_when_disabled() {
        let mut state = state_with(FakeDatabase::new(), "", Some("sk-test"));
        let mut config = (*state.config).clone();
        config.server.expose_traceback = false;
        state.config = Arc::new(config);

        match state.internal(anyhow::anyhow!("boom")) {
            ApiError::Internal { traceback, .. } => assert!(traceback.is_none()),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_action_is_bad_request() {
        let state = state_with(FakeDatabase::new(), "", None);
        let request = ExecuteRequest {
            action: "dance".into(),
            table: Some("t".into()),
            column: None,
            params: None,
        };
        let err = execute(State(state), Json(request)).await.unwrap_err();
        assert_eq!(status(err), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_connection() {
        let state = state_with(FakeDatabase::new(), "", None);
        let Json(body) = health(State(state)).await;
        assert_eq!(body["doris_connected"], true);

        let state = state_with(FakeDatabase::new().with_query_error("down"), "", None);
        let Json(body) = health(State(state)).await;
        assert_eq!(body["doris_connected"], false);
    }

    #[tokio::test]
    async fn tables_and_schema() {
        let db = FakeDatabase::new().with_table("orders", vec![column("id", "BIGINT", false)], vec![]);
        let state = state_with(db, "", None);

        let Json(body) = list_tables(State(state.clone())).await.unwrap();
        assert_eq!(body["tables"], json!(["orders"]));

        let Json(body) = table_schema(State(state), Path("orders".into())).await.unwrap();
        assert_eq!(body["columns"][0]["name"], "id");
    }
}
