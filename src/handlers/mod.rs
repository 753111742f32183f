//! HTTP surface: REST handlers, the WebSocket endpoint and router
//! assembly.

pub mod analytics;
pub mod auth;
pub mod emails;
pub mod events;
pub mod health;
pub mod templates;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::config::AppConfig;
use crate::middleware::require_auth;
use crate::state::AppState;

/// Build the application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health::check))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/google", get(auth::google_redirect))
        .route("/auth/google/callback", get(auth::google_callback))
        .route("/ws", get(events::ws));

    let protected = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/profile", put(auth::update_profile))
        .route("/email/schedule", post(emails::schedule))
        .route("/email/batch-schedule", post(emails::batch_schedule))
        .route("/email", get(emails::list))
        .route("/email/stats", get(emails::queue_stats))
        .route("/email/job/{job_id}", get(emails::job_status))
        .route("/email/{id}", get(emails::get_one))
        .route("/email/{id}/star", put(emails::toggle_star))
        .route("/templates", post(templates::create).get(templates::list))
        .route(
            "/templates/{id}",
            put(templates::update).delete(templates::remove),
        )
        .route("/analytics/daily", get(analytics::daily))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(state.config()))
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    match config.client.url.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true),
        Err(_) => {
            warn!(url = %config.client.url, "client URL is not a valid origin, CORS disabled");
            CorsLayer::new()
        }
    }
}
