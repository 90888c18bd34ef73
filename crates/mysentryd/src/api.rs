//! HTTP surface of the monitor daemon
//!
//! The query/action API the console consumes, plus the `/servers` SSE
//! snapshot feed the proxies subscribe to. Every request funnels into the
//! coordinator through its handle; this layer only translates between HTTP
//! and the coordinator's request/response types.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use mysentry_core::{Endpoint, MonitorError};
use mysentry_monitor::{Action, InstanceView, MonitorHandle};

#[derive(Clone)]
pub struct ApiState {
    handle: MonitorHandle,
}

/// HTTP-facing error: coordinator errors keep their HTTP-analogous codes.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        Self {
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub fn router(handle: MonitorHandle) -> Router {
    Router::new()
        .route("/api/v1/instances", get(overview))
        .route("/api/v1/instances/{endpoint}", get(detail))
        .route("/api/v1/instances/{endpoint}/role", get(role))
        .route("/api/v1/instances/{endpoint}/actions/{action}", post(action))
        .route("/servers", get(servers))
        .with_state(ApiState { handle })
}

fn parse_endpoint(raw: &str) -> Result<Endpoint, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid endpoint: {raw}")))
}

async fn overview(State(state): State<ApiState>) -> Result<Json<Vec<InstanceView>>, ApiError> {
    Ok(Json(state.handle.overview().await?))
}

async fn detail(
    State(state): State<ApiState>,
    Path(endpoint): Path<String>,
) -> Result<Json<InstanceView>, ApiError> {
    let endpoint = parse_endpoint(&endpoint)?;
    Ok(Json(state.handle.detail(endpoint).await?))
}

/// Bare role probe; answers "Unknown" instead of an error so liveness
/// checks can always read a role string.
async fn role(State(state): State<ApiState>, Path(endpoint): Path<String>) -> String {
    match parse_endpoint(&endpoint) {
        Ok(endpoint) => match state.handle.detail(endpoint).await {
            Ok(view) => view.role.to_string(),
            Err(_) => "Unknown".to_string(),
        },
        Err(_) => "Unknown".to_string(),
    }
}

async fn action(
    State(state): State<ApiState>,
    Path((endpoint, action)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let endpoint = parse_endpoint(&endpoint)?;
    let action: Action = action
        .parse()
        .map_err(|_| ApiError::bad_request(format!("unknown action: {action}")))?;
    state.handle.apply(endpoint, action).await?;
    Ok(StatusCode::ACCEPTED)
}

/// The snapshot feed: one `init` event with the current snapshot, then an
/// `update` event per membership change.
async fn servers(
    State(state): State<ApiState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscription = state.handle.subscribe().await?;
    debug!("snapshot feed subscriber connected");

    let init = Event::default()
        .id("1")
        .event("init")
        .data(serde_json::to_string(&subscription.current).map_err(MonitorError::from)?);

    let updates = BroadcastStream::new(subscription.updates).filter_map(|item| async move {
        match item {
            Ok(snapshot) => {
                let data = serde_json::to_string(&snapshot).ok()?;
                Some(Ok(Event::default().id("1").event("update").data(data)))
            }
            // a lagged subscriber skips straight to newer snapshots
            Err(_) => None,
        }
    });

    let stream = futures::stream::once(async move { Ok(init) }).chain(updates);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
