//! Domain errors and their HTTP status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors surfaced by the session graph and media plane, mapped onto the
/// status codes the relay's HTTP surface is expected to return.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Unknown session or viewer id.
    #[error("invalid session")]
    InvalidSession,

    /// No active stream for the requested key.
    #[error("no active stream found")]
    NoActiveStream,

    /// A live host already holds this stream key.
    #[error("a host is already streaming to this key")]
    HostExists,

    /// ICE restart was requested via PATCH; unsupported.
    #[error("ice restart not supported")]
    IceRestartUnsupported,

    /// The SDP offer could not be parsed or applied.
    #[error("invalid offer: {0}")]
    InvalidOffer(String),

    /// Chat text or display name outside the allowed length.
    #[error("invalid length: {0}")]
    LengthInvalid(&'static str),

    /// Stream key/token pair rejected by the authorization profile.
    #[error("unauthorized")]
    Unauthorized,

    /// HTTP method not allowed on this route.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// Underlying WebRTC stack error.
    #[error("webrtc error: {0}")]
    WebRtc(String),

    /// Anything else: serialization, I/O, internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::InvalidSession => (StatusCode::BAD_REQUEST, "invalid_session"),
            Self::NoActiveStream => (StatusCode::NOT_FOUND, "no_active_stream"),
            Self::HostExists => (StatusCode::CONFLICT, "host_exists"),
            Self::IceRestartUnsupported => (StatusCode::BAD_REQUEST, "ice_restart_unsupported"),
            Self::InvalidOffer(_) => (StatusCode::BAD_REQUEST, "invalid_offer"),
            Self::LengthInvalid(_) => (StatusCode::BAD_REQUEST, "length_invalid"),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed"),
            Self::WebRtc(_) => (StatusCode::INTERNAL_SERVER_ERROR, "webrtc_error"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<webrtc::Error> for RelayError {
    fn from(err: webrtc::Error) -> Self {
        Self::WebRtc(err.to_string())
    }
}
