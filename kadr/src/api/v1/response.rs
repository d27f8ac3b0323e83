//! # V1 API Response Envelope & Error Contract
//!
//! Every v1 endpoint returns an [`ApiResponse<T>`] envelope:
//!
//! ```json
//! {
//!   "data": { ... },                                          // present on success
//!   "error": { "code": "unreadable_image", "message": "..." } // present on error
//! }
//! ```
//!
//! Recognition that degrades (best effort, no text found, skipped configurations) is a
//! success; only the hard failures and request problems produce an `error`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::KadrError;

/// Machine-readable error code included in every error response.
///
/// Serialized as a snake_case string on the wire (e.g. `"invalid_request"`).
/// Each variant maps to a fixed HTTP status code via [`ErrorCode::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed parameters or body. HTTP 400.
    InvalidRequest,
    /// The request was dropped before it finished. HTTP 408.
    Cancelled,
    /// The payload is not a decodable image, or its dimensions are out of bounds. HTTP 422.
    UnreadableImage,
    /// An unexpected server-side error occurred. Internal details are never
    /// leaked to the client. HTTP 500.
    InternalError,
    /// The feature is not configured on this deployment. HTTP 501.
    NotImplemented,
    /// An upstream catalog call failed. HTTP 502.
    UpstreamError,
    /// Every recognition configuration errored. HTTP 503.
    RecognitionFailed,
    /// A required model or engine is not installed. HTTP 503.
    Unavailable,
}

impl ErrorCode {
    /// Returns the HTTP status code corresponding to this error code.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Self::UnreadableImage => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::UpstreamError => StatusCode::BAD_GATEWAY,
            Self::RecognitionFailed | Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRequest => write!(f, "invalid_request"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::UnreadableImage => write!(f, "unreadable_image"),
            Self::InternalError => write!(f, "internal_error"),
            Self::NotImplemented => write!(f, "not_implemented"),
            Self::UpstreamError => write!(f, "upstream_error"),
            Self::RecognitionFailed => write!(f, "recognition_failed"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Structured error payload within the API envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    /// Safe to show to end users.
    pub message: String,
}

/// Canonical v1 API response envelope.
///
/// On success, `data` is present and `error` is absent. On error, `error` is
/// present and `data` is absent. The HTTP status is derived from the error code,
/// or set explicitly by constructors like [`ApiResponse::accepted`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,

    /// Not serialized on the wire.
    #[serde(skip)]
    status: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    /// Success response with data (HTTP 200).
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            status: StatusCode::OK,
        }
    }

    /// Accepted for background processing (HTTP 202).
    pub fn accepted(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            status: StatusCode::ACCEPTED,
        }
    }

    /// Error response. HTTP status is derived from the [`ErrorCode`].
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        let status = code.status();
        Self {
            data: None,
            error: Some(ApiError {
                code,
                message: message.into(),
            }),
            status,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = self.status;
        match serde_json::to_value(&self) {
            Ok(body) => (status, Json(body)).into_response(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize v1 response");
                let body = serde_json::json!({
                    "error": {
                        "code": "internal_error",
                        "message": "An internal error occurred"
                    }
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

impl<T: Serialize> From<KadrError> for ApiResponse<T> {
    /// Convert a [`KadrError`] into a v1 [`ApiResponse`].
    ///
    /// For `internal_error` responses a generic message is returned and the
    /// real error is logged.
    fn from(err: KadrError) -> Self {
        match err {
            KadrError::Decode(_) | KadrError::CorruptImage(_) => {
                ApiResponse::error(ErrorCode::UnreadableImage, err.to_string())
            }

            KadrError::AllConfigurationsFailed { .. } => {
                ApiResponse::error(ErrorCode::RecognitionFailed, err.to_string())
            }

            KadrError::EngineUnavailable(_)
            | KadrError::EmbeddingUnavailable(_)
            | KadrError::DeadlineExceeded { .. } => {
                ApiResponse::error(ErrorCode::Unavailable, err.to_string())
            }

            KadrError::RecognitionTimeout { .. } | KadrError::Cancelled => {
                ApiResponse::error(ErrorCode::Cancelled, err.to_string())
            }

            KadrError::Validation(ref msg) => {
                ApiResponse::error(ErrorCode::InvalidRequest, msg.clone())
            }

            KadrError::Json(ref e) => {
                ApiResponse::error(ErrorCode::InvalidRequest, format!("Invalid JSON: {e}"))
            }

            KadrError::Catalog(_) | KadrError::Http(_) => {
                tracing::warn!(error = %err, "Upstream error mapped to v1 response");
                ApiResponse::error(ErrorCode::UpstreamError, "Catalog lookup failed")
            }

            ref internal @ (KadrError::Embedding(_)
            | KadrError::Ocr(_)
            | KadrError::Io(_)
            | KadrError::Internal(_)) => {
                tracing::error!(error = %internal, "Internal error mapped to v1 response");
                ApiResponse::error(ErrorCode::InternalError, "An internal error occurred")
            }
        }
    }
}
