//! Route table. Endpoint paths match §6's external interface list
//! verbatim — this API is not nested under `/api` the way the UI-facing
//! teacher's router is, since these ARE the whole public contract.
//!
//! Path parameter syntax: this crate pins axum 0.7, which uses the older
//! `:id` colon syntax rather than axum 0.8's `{id}` braces.

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::bootstrap::{AppContext, CorsConfig};
use crate::handlers;
use crate::state::AppState;

fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    match config {
        CorsConfig::AllowAll => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        CorsConfig::AllowOrigins(origins) => {
            use axum::http::HeaderValue;
            let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

pub(crate) fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/synthesize", post(handlers::synthesize::synthesize))
        .route("/audio/url/:voice_id/:story_id", get(handlers::audio::presigned_url))
        .route("/audio/exists/:voice_id/:story_id", get(handlers::audio::exists))
        .route("/audio/:voice_id/:filename", get(handlers::audio::stream))
        .route("/me/credits", get(handlers::credits::get_credits))
        .route("/voices", post(handlers::voices::create))
        .route("/voices/:id", delete(handlers::voices::delete))
        .route("/admin/voice-slots/status", get(handlers::admin::status))
}

/// Builds the full router: the API surface plus an unauthenticated
/// `/health` liveness check for the process supervisor.
pub fn create_router(ctx: Arc<AppContext>, cors_config: &CorsConfig) -> Router {
    let cors = build_cors_layer(cors_config);

    Router::new()
        .route("/health", get(health_check))
        .merge(api_routes().with_state(ctx))
        .layer(cors)
}

pub(crate) async fn health_check() -> &'static str {
    "OK"
}
