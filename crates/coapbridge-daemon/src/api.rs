//! HTTP handlers: bus gateway and diagnostics

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use coapbridge_core::envelope::{decode_request, encode_response};
use coapbridge_core::RequestCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn bad_request(msg: impl Into<String>) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(ApiError::new(msg))).into_response()
}

#[derive(Deserialize)]
pub struct CallQuery {
    /// Request code for the forwarded call; GET when absent
    method: Option<String>,
}

/// Invoke the bus object at `path` with an enveloped request message
pub async fn call_object(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<CallQuery>,
    body: Bytes,
) -> impl IntoResponse {
    let code = match query.method.as_deref().map(str::parse::<RequestCode>) {
        None => RequestCode::Get,
        Some(Ok(code)) => code,
        Some(Err(e)) => return bad_request(e.to_string()),
    };

    let request = match decode_request(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed request envelope");
            return bad_request(format!("Invalid request envelope: {}", e));
        }
    };

    let path = format!("/{}", path.trim_start_matches('/'));
    let response = state.bridge.on_method_call(&path, code, &request).await;
    debug!(path = %path, code = %code, status = %response.code, "Bus call completed");

    match encode_response(&response) {
        Ok(envelope) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            envelope,
        )
            .into_response(),
        Err(e) => {
            error!(path = %path, error = %e, "Failed to encode response envelope");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new(e.to_string())),
            )
                .into_response()
        }
    }
}

/// Every registered node and its context
pub async fn list_contexts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.bridge.directory().list_contexts())
}

/// Every resource path and its owning node
pub async fn list_resources(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.bridge.directory().list_resources())
}

/// Every mirrored bus object
pub async fn list_objects(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.bridge.objects().list_objects())
}

/// Remove a resource subtree from the directory (and thereby the bus)
pub async fn remove_resources(
    State(state): State<Arc<AppState>>,
    Path(prefix): Path<String>,
) -> impl IntoResponse {
    let prefix = format!("/{}", prefix.trim_start_matches('/'));
    let removed = state.bridge.on_node_or_resource_removed(&prefix);
    info!(prefix = %prefix, count = removed.len(), "Resource removal requested");

    if removed.is_empty() {
        (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("No resources under prefix")),
        )
            .into_response()
    } else {
        Json(removed).into_response()
    }
}

#[derive(Serialize)]
pub struct StatusResponse {
    version: &'static str,
    bus_name: String,
    bus_connected: bool,
    contact_port: u16,
    nodes: usize,
    resources: usize,
    objects: usize,
    started_at: String,
}

/// Bridge status summary
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let directory = state.bridge.directory();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        bus_name: state.bus.name().to_string(),
        bus_connected: state.bus.is_connected(),
        contact_port: state.bus.contact_port(),
        nodes: directory.list_contexts().len(),
        resources: directory.list_resources().len(),
        objects: state.bridge.objects().list_objects().len(),
        started_at: state.started_at.to_rfc3339(),
    })
}
