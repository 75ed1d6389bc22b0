use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use emotion_monitor_core::pipeline::PipelineError;
use emotion_monitor_core::store::StoreError;
use serde_json::json;

const INTERNAL_DETAIL: &str = "Internal server error";

/// Errors surfaced to HTTP clients as `{"detail": "..."}`.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    /// An extractor or body error that already knows its status.
    #[error("{detail}")]
    Rejected { status: StatusCode, detail: String },
    #[error("analysis failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("storage failed: {0}")]
    Store(#[source] StoreError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, .. } => Self::NotFound(not_found_detail(entity)),
            other => Self::Store(other),
        }
    }
}

fn not_found_detail(entity: &str) -> String {
    let mut chars = entity.chars();
    match chars.next() {
        Some(first) => format!("{}{} not found", first.to_ascii_uppercase(), chars.as_str()),
        None => "Not found".to_owned(),
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Rejected { status, .. } => *status,
            Self::Pipeline(_) | Self::Store(_) | Self::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            INTERNAL_DETAIL.to_owned()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emotion_monitor_core::features::FeatureError;

    #[test]
    fn store_not_found_maps_to_404_with_entity_name() {
        let err = ApiError::from(StoreError::NotFound {
            entity: "patient",
            id: 4,
        });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Patient not found");
    }

    #[test]
    fn pipeline_failures_are_internal() {
        let err = ApiError::from(PipelineError::Features(FeatureError::EmptySignal));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ApiError::BadRequest("bad".to_owned()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
