//! HTTP surface: provider discovery and the streaming chat endpoint.

use crate::error::ValidationError;
use crate::fanout::{FanOut, FanOutEvent};
use crate::provider::{ProviderKind, ThinkingMode};
use anyhow::Context;
use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub fanout: FanOut,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub thinking_mode: Option<String>,
}

impl ChatBody {
    /// A missing `thinkingMode` means off; anything else must be "off" or "on".
    pub fn validate(self) -> Result<(String, ThinkingMode), ValidationError> {
        let prompt = self
            .prompt
            .filter(|p| !p.trim().is_empty())
            .ok_or(ValidationError::EmptyPrompt)?;
        let mode = match self.thinking_mode.as_deref() {
            None => ThinkingMode::Off,
            Some(m) => m.parse()?,
        };
        Ok((prompt, mode))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub provider: ProviderKind,
    pub label: String,
    pub model: String,
    pub configured: bool,
}

pub fn describe_providers(fanout: &FanOut) -> Vec<ProviderInfo> {
    fanout
        .adapters()
        .iter()
        .map(|a| ProviderInfo {
            provider: a.kind(),
            label: format!("{} ({})", a.kind().display_name(), a.model()),
            model: a.model().to_string(),
            configured: a.is_configured(),
        })
        .collect()
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/api/providers", get(providers))
        .route("/api/chat", post(chat))
        .with_state(state);

    let app = match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };
    app.layer(TraceLayer::new_for_http())
}

pub async fn serve(bind: &str, app: Router) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind to {bind}"))?;
    tracing::info!("gateway listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn providers(State(state): State<AppState>) -> Json<Vec<ProviderInfo>> {
    Json(describe_providers(&state.fanout))
}

async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Response, ValidationError> {
    let Json(body) = body.map_err(|e| ValidationError::MalformedBody(e.body_text()))?;
    let (prompt, mode) = body.validate()?;

    let lines = state.fanout.run(&prompt, mode).map(encode_line);
    Ok((
        [
            (header::CONTENT_TYPE, "application/x-ndjson"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(lines),
    )
        .into_response())
}

pub fn encode_line(event: FanOutEvent) -> Result<Bytes, serde_json::Error> {
    let mut line = serde_json::to_vec(&event)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}
