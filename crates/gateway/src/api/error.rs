//! Maps the shared [`sa_domain::error::Error`] taxonomy onto HTTP
//! responses per spec.md §7: one status code per error kind, and a body
//! shaped `{"error": {"kind", "message"}}` safe to display to a caller.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use sa_domain::error::Error as DomainError;

pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": {
                "kind": self.0.code(),
                "message": self.0.to_string(),
            }
        }));
        let mut response = (status, body).into_response();
        if status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from_static("1"));
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn not_found_maps_to_404_with_kind_and_message() {
        let response = ApiError(DomainError::NotFound("task x".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["kind"], "not_found");
        assert!(json["error"]["message"].as_str().unwrap().contains("task x"));
    }

    #[tokio::test]
    async fn busy_gets_a_retry_after_header() {
        let response = ApiError(DomainError::Busy("full".into())).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("retry-after").unwrap(), "1");
    }

    #[tokio::test]
    async fn conflict_has_no_retry_after_header() {
        let response = ApiError(DomainError::Conflict("terminal".into())).into_response();
        assert!(response.headers().get("retry-after").is_none());
    }
}
