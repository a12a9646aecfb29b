use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::{events, handlers, middleware, projects, storage_dev};
use crate::state::AppState;
use ortelius_core::config::CorsConfig;

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.config().cors);

    let mut api = Router::new()
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/projects",
            post(projects::create_project).get(projects::list_projects),
        )
        .route("/projects/{id}", get(projects::get_project))
        .route("/projects/{id}/upload-url", post(projects::request_upload_url))
        .route(
            "/projects/{id}/finalize-upload",
            post(projects::finalize_upload),
        )
        .route("/projects/{id}/process", post(projects::start_processing))
        .route("/projects/{id}/result", get(projects::get_result))
        .route("/events", post(events::receive_event));

    if state.dev_storage_enabled() {
        api = api.route("/storage/{bucket}/{*path}", put(storage_dev::put_object));
    }

    Router::new()
        .nest("/api/v1", api)
        .layer(axum::middleware::from_fn(middleware::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    if config.allowed_origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
