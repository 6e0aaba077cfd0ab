//! Chat HTTP Server
//!
//! Axum-based server exposing the SSE chat endpoint plus context, admin
//! history and health routes. CORS, optional request tracing, graceful
//! shutdown.

use crate::app::App;
use crate::chat::ChatRequestBody;
use crate::context::SessionContext;
use crate::error::{ChatError, ErrorPayload};
use crate::message::ChatMessage;
use crate::transport::{into_sse, StreamMeta};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Default and maximum `limit` for admin history
const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 200;

/// JSON error response
#[derive(Debug)]
pub struct ApiError(StatusCode, ErrorPayload);

impl ApiError {
    fn not_found(what: impl Into<String>) -> Self {
        Self(
            StatusCode::NOT_FOUND,
            ErrorPayload {
                code: crate::error::ErrorCode::Validation,
                message: what.into(),
            },
        )
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        let status = match e {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, ErrorPayload::from(&e))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("Storage failure: {:#}", e);
        ChatError::Storage(e.to_string()).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

/// Chat server
pub struct ChatServer {
    app: Arc<App>,
}

impl ChatServer {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    /// Build the router with all routes and middleware
    pub fn build_router(&self) -> Router {
        let config = &self.app.config;

        let cors = if config.cors_origins.iter().any(|o| o == "*") {
            CorsLayer::new().allow_origin(Any)
        } else {
            CorsLayer::new().allow_origin(
                config
                    .cors_origins
                    .iter()
                    .filter_map(|o| o.parse::<HeaderValue>().ok())
                    .collect::<Vec<_>>(),
            )
        }
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        let api = Router::new()
            .route("/chat", post(chat))
            .route("/chat/realtime/{session_id}/cancel", post(cancel_realtime))
            .route("/context/{session_id}", get(get_context).put(put_context))
            .route("/admin/conversations", get(list_admin_sessions))
            .route(
                "/admin/conversations/{session_id}",
                get(admin_history).delete(clear_admin_history),
            )
            .route("/status", get(status))
            .route("/health", get(health_check))
            .route("/healthz", get(liveness))
            .route("/readyz", get(readiness))
            .with_state(Arc::clone(&self.app));

        let mut router = Router::new().nest("/api", api).layer(cors);

        // Add request logging if enabled
        if config.log_requests {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start the server and run until shutdown signal
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.app.config.socket_addr();
        let router = self.build_router();

        info!(
            "Starting chat server on {} (provider: {})",
            addr,
            self.app.provider.name()
        );
        if !addr.ip().is_loopback() {
            warn!("Chat server bound to {} - put it behind an authenticating proxy", addr);
        }

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.app.dispose();
        info!("Chat server shut down gracefully");
        Ok(())
    }
}

/// Stream a chat reply as SSE
///
/// Validation failures are reported in-band as an `error` frame.
async fn chat(State(app): State<Arc<App>>, payload: Result<Json<ChatRequestBody>, JsonRejection>) -> Response {
    let provider = app.chat.provider_name();

    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!("Rejected chat body: {}", rejection.body_text());
            let error = ChatError::validation(rejection.body_text());
            return error_stream(StreamMeta::new("standard", None, provider), error);
        }
    };

    let fallback_meta = StreamMeta::new(body.mode_name(), body.session_id.clone(), provider);
    match body.into_request(app.chat.settings().max_message_chars) {
        Ok(request) => {
            let meta = StreamMeta::new(request.mode.name(), request.session_id.clone(), provider);
            let messages = app.chat.stream(request).map(Ok::<_, ChatError>);
            into_sse(meta, messages).into_response()
        }
        Err(e) => {
            warn!("Invalid chat request: {}", e);
            error_stream(fallback_meta, e)
        }
    }
}

fn error_stream(meta: StreamMeta, error: ChatError) -> Response {
    into_sse(meta, stream::iter([Err::<ChatMessage, ChatError>(error)])).into_response()
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: bool,
}

async fn cancel_realtime(
    State(app): State<Arc<App>>,
    Path(session_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    if app.realtime.cancel(&session_id) {
        Ok(Json(CancelResponse { cancelled: true }))
    } else {
        Err(ApiError::not_found(format!("no live realtime session '{}'", session_id)))
    }
}

async fn get_context(
    State(app): State<Arc<App>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionContext>, ApiError> {
    app.context_store
        .load(&session_id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no context for session '{}'", session_id)))
}

async fn put_context(
    State(app): State<Arc<App>>,
    Path(session_id): Path<String>,
    Json(mut context): Json<SessionContext>,
) -> Result<Json<SessionContext>, ApiError> {
    context.session_id = Some(session_id.clone());
    app.context_store.save(&session_id, &context)?;
    Ok(Json(context))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn admin_history(
    State(app): State<Arc<App>>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let messages = app.admin_store.get_history(&session_id, limit)?;
    Ok(Json(serde_json::json!({
        "sessionId": session_id,
        "messages": messages,
    })))
}

async fn clear_admin_history(
    State(app): State<Arc<App>>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = app.admin_store.clear(&session_id)?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

async fn list_admin_sessions(State(app): State<Arc<App>>) -> Result<Json<serde_json::Value>, ApiError> {
    let sessions = app.admin_store.list_sessions()?;
    Ok(Json(serde_json::json!({ "sessions": sessions })))
}

async fn status(State(app): State<Arc<App>>) -> Json<crate::app::StatusReport> {
    Json(app.status())
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    /// Timestamp (ISO 8601)
    timestamp: String,
}

async fn health_check(State(app): State<Arc<App>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: app.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Liveness probe
async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe; not ready while the vendor circuit is open
async fn readiness(State(app): State<Arc<App>>) -> StatusCode {
    if app.recovery.breaker().is_open() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
