//! HTTP server setup and background tasks

use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use coapbridge_coap::RdServer;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::api;
use crate::state::AppState;

/// Build the HTTP router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Bus gateway
        .route("/bus/{*path}", post(api::call_object))
        // Diagnostics
        .route("/api/status", get(api::get_status))
        .route("/api/contexts", get(api::list_contexts))
        .route("/api/resources", get(api::list_resources))
        .route("/api/resources/{*prefix}", delete(api::remove_resources))
        .route("/api/objects", get(api::list_objects))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the resource directory, the expiry sweep and the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let socket = UdpSocket::bind(&state.config.coap.bind).await?;
    let rd = Arc::new(RdServer::new(state.bridge.clone()));
    tokio::spawn(async move {
        if let Err(e) = rd.run(socket).await {
            error!(error = %e, "Resource directory endpoint failed");
        }
    });

    match state.config.sweep_interval() {
        Some(period) => {
            let sweeper = state.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    let expired = sweeper.sweep_expired(Utc::now());
                    debug!(expired, "Expiry sweep finished");
                }
            });
        }
        None => info!("Registration expiry sweep disabled"),
    }

    let bind = state.config.daemon.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting gateway server");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
