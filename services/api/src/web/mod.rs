pub mod envelope;
pub mod middleware;
pub mod rest;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use middleware::{request_id, require_user, UserId};
pub use rest::ApiDoc;
pub use state::AppState;

/// All API routes, guarded by the caller-id check and traced per request.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/goals", post(rest::create_goal_handler))
        .route("/news/analyze", post(rest::analyze_handler))
        .route("/news/{article_id}/{segment_index}", get(rest::segment_detail_handler))
        .route(
            "/quiz/{article_id}",
            get(rest::get_quiz_handler).post(rest::generate_quiz_handler),
        )
        .route("/quiz/{article_id}/submit", post(rest::submit_quiz_handler))
        .layer(axum_middleware::from_fn(require_user))
        .layer(TraceLayer::new_for_http())
        .layer(axum_middleware::from_fn(request_id))
        .with_state(state)
}
