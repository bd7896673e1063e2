use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use playback_core::PlaybackError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("stream limit exceeded: at most {0} concurrent streams allowed")]
  CapacityExceeded(usize),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("upstream error: {0}")]
  BadGateway(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl From<PlaybackError> for ApiError {
  fn from(err: PlaybackError) -> Self {
    match err {
      PlaybackError::CapacityExceeded { limit } => ApiError::CapacityExceeded(limit),
      PlaybackError::SessionNotFound(_) => ApiError::NotFound(err.to_string()),
      PlaybackError::SessionExists(_) | PlaybackError::NotRetryable { .. } => {
        ApiError::Conflict(err.to_string())
      }
      PlaybackError::NoUsableEndpoint(_)
      | PlaybackError::Media(_)
      | PlaybackError::Resolver(_) => ApiError::BadGateway(err.to_string()),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    match self {
      ApiError::CapacityExceeded(limit) => {
        let body = Json(json!({
            "error": format!("stream limit exceeded: at most {limit} concurrent streams allowed"),
            "limit": limit,
        }));
        (StatusCode::TOO_MANY_REQUESTS, body).into_response()
      }
      other => {
        let status = match &other {
          ApiError::NotFound(_) => StatusCode::NOT_FOUND,
          ApiError::Conflict(_) => StatusCode::CONFLICT,
          ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
          _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": other.to_string() }));
        (status, body).into_response()
      }
    }
  }
}

impl From<anyhow::Error> for ApiError {
  fn from(err: anyhow::Error) -> Self {
    ApiError::Internal(err.to_string())
  }
}
