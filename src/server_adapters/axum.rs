//! Axum router exposing the relay.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /v1/chat/completions` | OpenAI-compatible chat with server-side tool execution |
//! | `GET /v1/models` | Backend model list, passed through |
//! | `GET /health` | Liveness plus provider counts |
//! | `GET /v1/mcp/tools` | Current tool catalog |
//! | `GET /v1/mcp/status` | Per-provider status |
//! | `GET, POST /v1/mcp/servers` | List or add providers |
//! | `GET, DELETE /v1/mcp/servers/{name}` | Provider details or removal |
//! | `POST /v1/mcp/servers/{name}/{start,stop,enable,disable}` | Lifecycle |
//! | `POST /v1/mcp/reload` | Replace every provider |
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use reasoning_relay::backend::OpenAiCompatBackend;
//! use reasoning_relay::config::RelayConfig;
//! use reasoning_relay::registry::ToolProviderRegistry;
//! use reasoning_relay::server_adapters::axum::{AppState, router};
//! use reasoning_relay::telemetry::init_subscriber;
//!
//! # async fn serve(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
//! config.validate()?;
//! let _log_guard = init_subscriber(&config.logging.clone().with_env_overrides()?)?;
//! let backend = Arc::new(OpenAiCompatBackend::new(config.backend.clone())?);
//! let registry = Arc::new(ToolProviderRegistry::new(config.providers.clone(), config.registry.clone()));
//! registry.start_all().await;
//!
//! let app = router(AppState::from_config(&config, backend, registry));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{SseOptions, completion_chunks, error_body};
use crate::backend::ChatBackend;
use crate::config::{OrchestratorConfig, RelayConfig};
use crate::error::{RelayError, Result};
use crate::orchestrator::{ToolResolver, TurnOptions, run_turn, run_turn_stream};
use crate::registry::{
    ProviderConfig, ProviderDetails, ProviderState, ProviderStatus, ToolProviderRegistry,
};
use crate::types::ChatCompletionRequest;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn ChatBackend>,
    pub registry: Arc<ToolProviderRegistry>,
    pub orchestrator: OrchestratorConfig,
    pub system_prompt: Option<String>,
    pub sse: SseOptions,
}

impl AppState {
    pub fn new(backend: Arc<dyn ChatBackend>, registry: Arc<ToolProviderRegistry>) -> Self {
        Self {
            backend,
            registry,
            orchestrator: OrchestratorConfig::default(),
            system_prompt: None,
            sse: SseOptions::default(),
        }
    }

    pub fn from_config(
        config: &RelayConfig,
        backend: Arc<dyn ChatBackend>,
        registry: Arc<ToolProviderRegistry>,
    ) -> Self {
        Self {
            orchestrator: config.orchestrator.clone(),
            system_prompt: config.system_prompt.clone().filter(|p| !p.is_empty()),
            ..Self::new(backend, registry)
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_sse_options(mut self, sse: SseOptions) -> Self {
        self.sse = sse;
        self
    }

    fn reject(&self, err: &RelayError) -> ErrorResponse {
        ErrorResponse {
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body: error_body(err, &self.sse),
        }
    }
}

/// An OpenAI-style error reply.
#[derive(Debug)]
pub struct ErrorResponse {
    status: StatusCode,
    body: Value,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type HandlerResult<T> = std::result::Result<T, ErrorResponse>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/health", get(health))
        .route("/v1/mcp/tools", get(list_tools))
        .route("/v1/mcp/status", get(status))
        .route("/v1/mcp/servers", get(status).post(add_server))
        .route(
            "/v1/mcp/servers/{name}",
            get(server_details).delete(remove_server),
        )
        .route("/v1/mcp/servers/{name}/start", post(start_server))
        .route("/v1/mcp/servers/{name}/stop", post(stop_server))
        .route("/v1/mcp/servers/{name}/enable", post(enable_server))
        .route("/v1/mcp/servers/{name}/disable", post(disable_server))
        .route("/v1/mcp/reload", post(reload))
        .with_state(state)
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(mut request): Json<ChatCompletionRequest>,
) -> HandlerResult<Response> {
    if request.model.trim().is_empty() {
        return Err(state.reject(&RelayError::InvalidInput("model is required".into())));
    }
    if let Some(prompt) = &state.system_prompt {
        request.inject_system_prompt(prompt);
    }

    let options = TurnOptions::from(&state.orchestrator)
        .with_auto_execute(request.execute_tools.unwrap_or(state.orchestrator.auto_execute));
    let tools: Arc<dyn ToolResolver> = state.registry.clone();

    if request.stream {
        let model = request.model.clone();
        let turn = run_turn_stream(state.backend.clone(), tools, request, options);
        let events = completion_chunks(turn, model, state.sse.clone())
            .map(|payload| Ok::<_, Infallible>(Event::default().data(payload)));
        return Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response());
    }

    let outcome = run_turn(state.backend.clone(), tools, request, options)
        .await
        .map_err(|e| state.reject(&e))?;
    if let Some(warning) = outcome.max_iterations_error() {
        tracing::warn!(%warning, "returning partial turn");
    }
    Ok(Json(outcome.into_response()).into_response())
}

async fn list_models(State(state): State<AppState>) -> HandlerResult<Json<Value>> {
    state
        .backend
        .list_models()
        .await
        .map(Json)
        .map_err(|e| state.reject(&e))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let providers = state.registry.status();
    let running = providers
        .iter()
        .filter(|p| p.state == ProviderState::Running)
        .count();
    Json(json!({
        "status": "ok",
        "providers": { "running": running, "total": providers.len() },
        "tools": state.registry.catalog().len(),
    }))
}

async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    let tools = state.registry.catalog();
    Json(json!({ "count": tools.len(), "tools": tools }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "providers": state.registry.status() }))
}

async fn add_server(
    State(state): State<AppState>,
    Json(config): Json<ProviderConfig>,
) -> HandlerResult<(StatusCode, Json<ProviderStatus>)> {
    let status = state
        .registry
        .add_provider(config)
        .await
        .map_err(|e| state.reject(&e))?;
    Ok((StatusCode::CREATED, Json(status)))
}

async fn server_details(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> HandlerResult<Json<ProviderDetails>> {
    state.registry.details(&name).map(Json).map_err(|e| state.reject(&e))
}

async fn remove_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> HandlerResult<StatusCode> {
    state
        .registry
        .remove_provider(&name)
        .await
        .map_err(|e| state.reject(&e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Lifecycle replies always carry the provider's status; a failed start is reported in the
/// body rather than as an HTTP error.
fn lifecycle_reply(state: &AppState, name: &str, outcome: Result<()>) -> HandlerResult<Json<Value>> {
    if let Err(RelayError::NotFound(_)) = &outcome {
        return Err(state.reject(&RelayError::NotFound(format!("provider '{name}'"))));
    }
    let details = state.registry.details(name).map_err(|e| state.reject(&e))?;
    Ok(Json(json!({
        "name": name,
        "ok": outcome.is_ok(),
        "error": outcome.err().map(|e| e.to_string()),
        "status": details.status,
    })))
}

async fn start_server(State(state): State<AppState>, Path(name): Path<String>) -> HandlerResult<Json<Value>> {
    let outcome = state.registry.start(&name).await;
    lifecycle_reply(&state, &name, outcome)
}

async fn stop_server(State(state): State<AppState>, Path(name): Path<String>) -> HandlerResult<Json<Value>> {
    let outcome = state.registry.stop(&name).await;
    lifecycle_reply(&state, &name, outcome)
}

async fn enable_server(State(state): State<AppState>, Path(name): Path<String>) -> HandlerResult<Json<Value>> {
    let outcome = state.registry.set_enabled(&name, true).await;
    lifecycle_reply(&state, &name, outcome)
}

async fn disable_server(State(state): State<AppState>, Path(name): Path<String>) -> HandlerResult<Json<Value>> {
    let outcome = state.registry.set_enabled(&name, false).await;
    lifecycle_reply(&state, &name, outcome)
}

#[derive(Debug, Deserialize)]
struct ReloadRequest {
    #[serde(default)]
    providers: Vec<ProviderConfig>,
}

async fn reload(
    State(state): State<AppState>,
    Json(body): Json<ReloadRequest>,
) -> HandlerResult<Json<Value>> {
    let outcomes = state
        .registry
        .reload(body.providers)
        .await
        .map_err(|e| state.reject(&e))?;
    let results: Vec<Value> = outcomes
        .into_iter()
        .map(|(name, outcome)| {
            json!({
                "name": name,
                "ok": outcome.is_ok(),
                "error": outcome.err().map(|e| e.to_string()),
            })
        })
        .collect();
    Ok(Json(json!({
        "results": results,
        "providers": state.registry.status(),
    })))
}
