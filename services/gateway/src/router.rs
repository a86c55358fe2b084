use crate::handlers::{aggregate, status};
use crate::state::AppState;
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/aggregate", get(aggregate::query_aggregate))
        .route("/sources/{source}/range", get(aggregate::date_range))
        .route("/status", get(status::get_status));

    Router::new()
        .nest("/v1", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
