use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: std::sync::Arc<services::AppState>) -> Router {
    // CORS for the read-only snapshot endpoints consumed by dashboards
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any); // TODO: restrict to specific origins in production

    Router::new()
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .route(
            "/api/v1/events/progress",
            post(handlers::events::report_progress),
        )
        .route(
            "/api/v1/quizzes/{quiz_id}/attempts",
            post(handlers::attempts::start_attempt),
        )
        .route(
            "/api/v1/attempts/{attempt_id}/responses",
            post(handlers::attempts::record_response),
        )
        .route(
            "/api/v1/attempts/{attempt_id}/submit",
            post(handlers::attempts::submit_attempt),
        )
        .nest("/api/v1", snapshot_routes().layer(cors))
        .with_state(app_state)
        .layer(
            tower::ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(
                    middlewares::metrics::metrics_middleware,
                )),
        )
}

fn snapshot_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route(
            "/enrollments/{learner_id}/{course_id}",
            get(handlers::progress::get_enrollment),
        )
        .route(
            "/modules/{module_id}/progress/{learner_id}",
            get(handlers::progress::get_module_progress),
        )
}
