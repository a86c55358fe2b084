use crate::error::AppError;
use crate::models::{AggregateParams, SharedJson};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use query_engine::{AggregateRequest, AggregateTable, DateRange};
use types::ids::SourceId;

pub async fn query_aggregate(
    State(state): State<AppState>,
    Query(params): Query<AggregateParams>,
) -> Result<SharedJson<AggregateTable>, AppError> {
    let request = AggregateRequest::try_from(params)?;
    let table = state.queries.query_aggregate(&request).await?;
    tracing::debug!(
        source = %request.source,
        rows = table.rows.len(),
        resolution = %table.resolution,
        "Aggregate served"
    );
    Ok(SharedJson(table))
}

pub async fn date_range(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> Result<Json<DateRange>, AppError> {
    let source = SourceId::try_new(source.as_str())
        .ok_or_else(|| AppError::BadRequest(format!("invalid source {source:?}")))?;
    Ok(Json(state.queries.date_range(&source)?))
}
