//! HTTP front-end: the chat page and the `/chat` endpoint.

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::agent_core::Orchestrator;

const INDEX_HTML: &str = include_str!("index.html");

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/chat", post(chat))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("HTTP server listening on http://{}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

// ─── Handlers ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
}

#[derive(Debug)]
enum ApiError {
    NoPrompt,
    Processing,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::NoPrompt => (StatusCode::BAD_REQUEST, "No prompt received"),
            ApiError::Processing => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error processing the query.",
            ),
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatQuery>,
) -> Result<Json<ChatReply>, ApiError> {
    if body.query.trim().is_empty() {
        return Err(ApiError::NoPrompt);
    }

    match state.orchestrator.process(&body.query).await {
        Ok(response) => Ok(Json(ChatReply { response })),
        Err(e) => {
            tracing::error!(error = %e, "error processing the query");
            Err(ApiError::Processing)
        }
    }
}
