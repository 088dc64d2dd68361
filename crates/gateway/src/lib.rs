//! HTTP control surface for PulseLoop.
//!
//! Exposes the loop's REST operations and its event stream (SSE and
//! WebSocket) to a dashboard or any other observer.
//!
//! Built on Axum.

pub mod api;

pub use api::{ApiState, SharedApiState, api_router};

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use pulseloop_agent::LoopController;
use pulseloop_config::AppConfig;
use pulseloop_core::error::GatewayError;
use pulseloop_core::{BroadcastHub, Store};
use pulseloop_tools::SystemShell;

impl ApiState {
    /// Wire store, hub, runtime gateway, and controller from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, GatewayError> {
        let gateway = pulseloop_providers::build_from_config(config)?;
        let store = Arc::new(Store::new(config.loop_defaults.to_loop_config()));
        let hub = Arc::new(BroadcastHub::new(Arc::clone(&store)));
        let controller = Arc::new(LoopController::new(
            store,
            hub,
            Arc::clone(&gateway),
            Arc::new(SystemShell::new()),
        ));
        Ok(Self::new(controller, gateway))
    }
}

/// Build the full router.
///
/// Layers applied:
/// - CORS (permissive when no origins are configured)
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedApiState, cors_origins: &[String]) -> Router {
    api_router(state)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB body limit
        .layer(cors_layer(cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the HTTP server and run until Ctrl+C.
///
/// On shutdown the loop is stopped and its task joined before returning.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.bind_addr();
    let state = Arc::new(ApiState::from_config(&config)?);
    let controller = Arc::clone(&state.controller);

    let app = build_router(state, &config.server.cors_origins);

    info!(addr = %addr, runtime = %config.runtime.url, "Control surface listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    controller.stop().await;
    controller.join().await;
    Ok(())
}
