use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use coach_core::hold::SeatConflict;
use coach_core::{BookingError, ErrorKind};
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub success: bool,
    pub error_code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<SeatConflict>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Booking(#[from] BookingError),
    #[error("{message}")]
    Unauthorized { code: &'static str, message: String },
    #[error("this endpoint requires the {role} role")]
    Forbidden { role: &'static str },
    #[error("{message}")]
    BadRequest { code: &'static str, message: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            code: "UNAUTHORIZED",
            message: message.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest {
            code: "INVALID_REQUEST_BODY",
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest {
            code: "INVALID_QUERY",
            message: rejection.body_text(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest {
            code: "INVALID_PATH",
            message: rejection.body_text(),
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

const INTERNAL_MESSAGE: &str = "Something went wrong on our side";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Booking(err) => {
                let status = status_for(err.kind());
                // Store and gateway details stay in the log
                let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(code = err.code(), error = %err, "Request failed");
                    INTERNAL_MESSAGE.to_string()
                } else {
                    err.to_string()
                };
                (
                    status,
                    ErrorBody {
                        success: false,
                        error_code: err.code(),
                        message,
                        suggestion: err.suggestion(),
                        conflicts: err.conflicts().to_vec(),
                    },
                )
            }
            ApiError::Unauthorized { code, message } => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    success: false,
                    error_code: code,
                    message,
                    suggestion: Some("Sign in again"),
                    conflicts: Vec::new(),
                },
            ),
            ApiError::Forbidden { role } => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    success: false,
                    error_code: "FORBIDDEN",
                    message: format!("This endpoint requires the {} role", role),
                    suggestion: None,
                    conflicts: Vec::new(),
                },
            ),
            ApiError::BadRequest { code, message } => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    success: false,
                    error_code: code,
                    message,
                    suggestion: None,
                    conflicts: Vec::new(),
                },
            ),
            ApiError::Internal(err) => {
                tracing::error!("Internal Server Error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        success: false,
                        error_code: "INTERNAL_ERROR",
                        message: INTERNAL_MESSAGE.to_string(),
                        suggestion: None,
                        conflicts: Vec::new(),
                    },
                )
            }
        };

        let code = body.error_code;
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use chrono::{TimeZone, Utc};
    use coach_core::StoreError;

    async fn render(err: ApiError) -> (StatusCode, HeaderValue, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let header = resp.headers().get("X-Error-Code").unwrap().clone();
        let body = to_bytes(resp.into_body(), 1024 * 8).await.unwrap();
        (status, header, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_seat_conflicts_render_409_with_every_seat() {
        let err = BookingError::SeatsUnavailable {
            seats: vec![SeatConflict {
                seat_id: 7,
                seat_name: "B07".into(),
                held_by: "Tran Thi B".into(),
                expires_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 8, 20, 0).unwrap()),
            }],
        };

        let (status, header, body) = render(err.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(header, "UNAVAILABLE_SEATS");
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "UNAVAILABLE_SEATS");
        assert_eq!(body["conflicts"][0]["seat_name"], "B07");
        assert_eq!(body["conflicts"][0]["held_by"], "Tran Thi B");
        assert!(body["suggestion"].is_string());
    }

    #[tokio::test]
    async fn test_store_failure_hides_details() {
        let err = BookingError::store("load booking")(StoreError::Unavailable(
            "pool timed out".into(),
        ));

        let (status, header, body) = render(err.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(header, "STORE_UNAVAILABLE");
        assert!(!body["message"].as_str().unwrap().contains("pool"));
    }

    #[tokio::test]
    async fn test_validation_without_extras() {
        let err = BookingError::validation("MISSING_VOUCHER_CODE", "Voucher code is required");

        let (status, _, body) = render(err.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Voucher code is required");
        assert!(body.get("conflicts").is_none());
        assert!(body.get("suggestion").is_none());
    }

    #[tokio::test]
    async fn test_invalid_signature_is_401() {
        let err = BookingError::InvalidSignature {
            reference: "BOOK1".into(),
        };
        let (status, header, _) = render(err.into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(header, "INVALID_SIGNATURE");
    }
}
