use crate::error::AppError;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use collector::{SchedulerState, SourceStatus};
use query_engine::{AggregateRequest, CacheStats, Filters, GroupDimension, ResolutionChoice, TimeBucket};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use types::ids::SourceId;

/// Query string of `GET /v1/aggregate`.
///
/// List parameters are comma separated, e.g.
/// `?source=nem&start=..&end=..&group_by=time:hour,category&categories=Coal,Wind`.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregateParams {
    pub source: String,
    pub start: i64,
    pub end: i64,
    pub group_by: Option<String>,
    pub entities: Option<String>,
    pub categories: Option<String>,
    #[serde(default)]
    pub resolution: ResolutionChoice,
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_group_dimension(raw: &str) -> Result<GroupDimension, AppError> {
    let dim = match raw.to_ascii_lowercase().as_str() {
        "category" => GroupDimension::Category,
        "entity" => GroupDimension::Entity,
        "time" | "time:native" => GroupDimension::Time(TimeBucket::Native),
        "time:hour" | "hour" => GroupDimension::Time(TimeBucket::Hour),
        "time:day" | "day" => GroupDimension::Time(TimeBucket::Day),
        other => {
            return Err(AppError::BadRequest(format!(
                "unknown group_by dimension {other:?}"
            )));
        }
    };
    Ok(dim)
}

impl TryFrom<AggregateParams> for AggregateRequest {
    type Error = AppError;

    fn try_from(params: AggregateParams) -> Result<Self, Self::Error> {
        let source = SourceId::try_new(params.source.as_str())
            .ok_or_else(|| AppError::BadRequest(format!("invalid source {:?}", params.source)))?;

        let mut request = AggregateRequest::new(source, params.start, params.end)
            .resolution(params.resolution)
            .filters(
                Filters::default()
                    .with_entities(split_list(params.entities.as_deref()))
                    .with_categories(split_list(params.categories.as_deref())),
            );
        for raw in split_list(params.group_by.as_deref()) {
            request = request.group_by(parse_group_dimension(raw)?);
        }
        Ok(request)
    }
}

/// Body of `GET /v1/status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub scheduler: SchedulerState,
    pub sources: BTreeMap<String, SourceStatus>,
    pub counters: BTreeMap<String, u64>,
    pub cache: CacheStats,
}

/// JSON response over a shared value, serialized without cloning it.
pub struct SharedJson<T>(pub Arc<T>);

impl<T: Serialize> IntoResponse for SharedJson<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(self.0.as_ref()) {
            Ok(body) => ([(CONTENT_TYPE, "application/json")], body).into_response(),
            Err(err) => AppError::InternalError(err.into()).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(group_by: Option<&str>) -> AggregateParams {
        AggregateParams {
            source: "nem".into(),
            start: 0,
            end: 3_600,
            group_by: group_by.map(str::to_string),
            entities: Some("WIND1, BAT1,".into()),
            categories: None,
            resolution: ResolutionChoice::Auto,
        }
    }

    #[test]
    fn test_params_to_request() {
        let request = AggregateRequest::try_from(params(Some("time:hour,category"))).unwrap();
        assert_eq!(
            request.group_by,
            vec![GroupDimension::Time(TimeBucket::Hour), GroupDimension::Category]
        );
        assert_eq!(request.filters.entities.len(), 2);
        assert!(request.filters.categories.is_empty());
    }

    #[test]
    fn test_unknown_dimension_rejected() {
        assert!(matches!(
            AggregateRequest::try_from(params(Some("fuel"))),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_invalid_source_rejected() {
        let mut p = params(None);
        p.source = "../etc".into();
        assert!(matches!(AggregateRequest::try_from(p), Err(AppError::BadRequest(_))));
    }
}
