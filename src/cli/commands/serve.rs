//! HTTP API server for the AI assistant.
//!
//! Exposes the agent as a streaming chat endpoint. Every fragment the agent
//! produces is written as one `0:<json string>\n` line as soon as it exists.

use super::build_agent;
use crate::agent::{Agent, ConversationMessage};
use crate::auth::{require_staff, Authenticator, Principal};
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::{Prompts, Settings};
use crate::inference::{InferenceEngine, OllamaClient};
use crate::store;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state.
pub struct AppState {
    pub agent: Agent,
    pub prompts: Prompts,
    pub auth: Arc<Authenticator>,
    pub cors_origins: Vec<String>,
}

/// Run the HTTP API server.
pub async fn run_serve(
    host: Option<String>,
    port: Option<u16>,
    settings: Settings,
) -> anyhow::Result<()> {
    let engine: Arc<dyn InferenceEngine> = Arc::new(OllamaClient::from_settings(&settings.ollama)?);

    if let Err(e) = preflight::check(Operation::Serve, &settings, engine.as_ref()).await {
        Output::error(&format!("{}", e));
        Output::info("Run 'lms-agent doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let store = store::open(&settings)?;
    let agent = build_agent(&settings, engine.clone(), store.clone(), None)?;
    let prompts = Prompts::load(
        settings.prompts.custom_dir.as_deref(),
        Some(&settings.prompts.variables),
    )?;

    if !settings.auth.enabled {
        Output::warning("Authentication is disabled; every caller may use the agent.");
    }
    if !engine.is_model_available(agent.model()).await {
        Output::warning(&format!(
            "Model {} is not available yet; chat requests will get 503 until it is.",
            agent.model()
        ));
    }

    let state = Arc::new(AppState {
        agent,
        prompts,
        auth: Arc::new(Authenticator::new(store, settings.auth.enabled)),
        cors_origins: settings.server.cors_origins.clone(),
    });
    let app = build_router(state);

    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    Output::header("LMS Agent API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Tools", "GET  /api/ai-agent/tools");
    Output::kv("Chat", "POST /api/ai-agent/chat");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router with CORS, request tracing and auth on the agent routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.cors_origins);

    let agent_routes = Router::new()
        .route("/api/ai-agent/chat", post(chat))
        .route("/api/ai-agent/tools", get(list_tools))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_staff,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(agent_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

// === Errors ===

/// JSON error body returned before any stream byte is written.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    help: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorBody {
                message: message.into(),
                error: None,
                help: None,
            },
        }
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.body.error = Some(error.into());
        self
    }

    fn with_help(mut self, help: impl Into<String>) -> Self {
        self.body.help = Some(help.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn engine_unavailable(model: &str) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "Ollama is not available")
            .with_error("Please ensure Ollama is running with: ollama serve")
            .with_help(format!(
                "Install Ollama from https://ollama.com and run: ollama pull {}",
                model
            ))
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "AI agent error").with_error(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_tools(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.agent.registry().descriptors())
}

async fn chat(
    State(state): State<Arc<AppState>>,
    principal: Option<Extension<Principal>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let history = parse_messages(&body)?;

    let model = state.agent.model();
    match principal {
        Some(Extension(p)) => info!(
            user = %p.id,
            role = %p.role,
            "Chat request with {} message(s), model {}",
            history.len(),
            model
        ),
        None => info!("Anonymous chat request with {} message(s), model {}", history.len(), model),
    }

    if !state.agent.engine().is_model_available(model).await {
        return Err(ApiError::engine_unavailable(model));
    }

    let system_prompt = state.prompts.agent_system(&state.agent.registry().names());
    let fragments = state
        .agent
        .run(&system_prompt, history)
        .map(|fragment| Ok::<_, Infallible>(Bytes::from(frame(&fragment))));

    Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(fragments))
        .map_err(|e| ApiError::internal(e.to_string()))
}

/// Extract the message list; anything but a JSON array under `messages` is a 400.
fn parse_messages(body: &[u8]) -> Result<Vec<ConversationMessage>, ApiError> {
    let required = || ApiError::bad_request("Messages array is required");

    let value: Value = serde_json::from_slice(body).map_err(|_| required())?;
    let messages = match value.get("messages") {
        Some(Value::Array(items)) => items.clone(),
        _ => return Err(required()),
    };

    serde_json::from_value(Value::Array(messages)).map_err(|e| {
        error!("Rejected malformed message list: {}", e);
        ApiError::bad_request("Invalid messages array").with_error(e.to_string())
    })
}

/// Encode one fragment as a line of the stream protocol.
pub fn frame(fragment: &str) -> String {
    format!("0:{}\n", Value::String(fragment.to_string()))
}
