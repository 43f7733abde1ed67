//! HTTP API for the bridge.

use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::adapter::{AdapterError, SharedAdapter, Summary};

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request parameters (400).
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Adapter(AdapterError::UnknownFlag(_))
            | ApiError::Adapter(AdapterError::UnknownSetting(_)) => StatusCode::NOT_FOUND,
            ApiError::Adapter(AdapterError::InvalidValue { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Adapter(AdapterError::Device(_)) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short machine-readable error name.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Adapter(AdapterError::UnknownFlag(_)) => "UnknownFlag",
            ApiError::Adapter(AdapterError::UnknownSetting(_)) => "UnknownSetting",
            ApiError::Adapter(AdapterError::InvalidValue { .. }) => "InvalidValue",
            ApiError::Adapter(AdapterError::Device(_)) => "DeviceError",
        }
    }
}

/// JSON body of an error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(kind = self.kind(), "Request failed: {}", self);
        } else {
            warn!(kind = self.kind(), "Request rejected: {}", self);
        }

        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    adapter: SharedAdapter,
}

/// Create the HTTP router.
pub fn create_router(adapter: SharedAdapter) -> Router {
    let state = AppState { adapter };

    Router::new()
        .route("/", get(root_handler))
        .route("/summary", get(summary_handler))
        .route("/flag/:flag", get(flag_handler))
        .route("/enableFlag/:flag", post(enable_flag_handler))
        .route("/disableFlag/:flag", post(disable_flag_handler))
        .route("/setSetting/:setting/:value", post(set_setting_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the / endpoint.
async fn root_handler(State(state): State<AppState>) -> Html<String> {
    let mut page = String::from(
        "<!DOCTYPE html>\n<html>\n<head><title>eda-modbus-bridge</title></head>\n<body>\n\
         <h1>eda-modbus-bridge</h1>\n<p><a href=\"/summary\">/summary</a></p>\n",
    );

    page.push_str("<h2>Flags</h2>\n<ul>\n");
    for name in state.adapter.flag_names() {
        page.push_str(&format!("<li>{}</li>\n", escape_html(name)));
    }
    page.push_str("</ul>\n<h2>Settings</h2>\n<ul>\n");
    for name in state.adapter.setting_names() {
        page.push_str(&format!("<li>{}</li>\n", escape_html(name)));
    }
    page.push_str("</ul>\n</body>\n</html>\n");

    Html(page)
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Handler for the /summary endpoint.
async fn summary_handler(State(state): State<AppState>) -> Result<Json<Summary>, ApiError> {
    let summary = state.adapter.read_summary().await?;
    Ok(Json(summary))
}

/// Response of the /flag endpoint.
#[derive(Debug, Serialize)]
struct FlagState {
    active: bool,
}

async fn flag_handler(
    State(state): State<AppState>,
    Path(flag): Path<String>,
) -> Result<Json<FlagState>, ApiError> {
    let active = state.adapter.flag(&flag).await?;
    Ok(Json(FlagState { active }))
}

async fn enable_flag_handler(
    State(state): State<AppState>,
    Path(flag): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.adapter.enable_flag(&flag).await?;
    Ok(StatusCode::OK)
}

async fn disable_flag_handler(
    State(state): State<AppState>,
    Path(flag): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.adapter.disable_flag(&flag).await?;
    Ok(StatusCode::OK)
}

async fn set_setting_handler(
    State(state): State<AppState>,
    Path((setting, value)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let value: i64 = value
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("'{}' is not an integer", value)))?;

    state.adapter.set_setting(&setting, value).await?;
    Ok(StatusCode::OK)
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// HTTP server configuration.
pub struct HttpServer {
    adapter: SharedAdapter,
    listen_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(adapter: SharedAdapter, listen_addr: SocketAddr) -> Self {
        Self {
            adapter,
            listen_addr,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.adapter);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(addr = %self.listen_addr, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
