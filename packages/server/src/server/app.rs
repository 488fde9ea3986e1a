//! Application setup and server configuration.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::domains::files::ObjectStorage;
use crate::kernel::{AssignmentEngine, EventHub};
use crate::server::rpc::{self, Envelope};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// Identity allowed to register and remove colonies.
    pub server_id: String,
    pub events: EventHub,
    pub assignment: Arc<AssignmentEngine>,
    pub s3: Option<Arc<dyn ObjectStorage>>,
}

async fn api_handler(State(state): State<AppState>, Json(envelope): Json<Envelope>) -> Response {
    match rpc::dispatch(&state, envelope).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn health_handler() -> &'static str {
    "OK"
}

/// Build the Axum application router.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/api", post(api_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        // Generous request deadline; long-polls bound themselves via the
        // subscription timeout well below this.
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(600)))
        .with_state(state)
}
