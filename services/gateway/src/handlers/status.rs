use crate::models::StatusResponse;
use crate::state::AppState;
use axum::{Json, extract::State};

pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        scheduler: state.scheduler.state(),
        sources: state.status.snapshot(),
        counters: state.status.export(),
        cache: state.queries.cache_stats(),
    })
}
