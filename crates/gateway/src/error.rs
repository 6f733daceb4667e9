use {
    axum::{
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    serde_json::json,
};

use wagate_session::SessionError;

use crate::request_id::Rid;

/// An API failure: surface label + sanitized message + request id.
///
/// Serialized as the standard error body
/// `{"error": <kind>, "message": <human>, "request_id": <uuid>}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
    request_id: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
            request_id: String::new(),
        }
    }

    #[must_use]
    pub fn rid(mut self, rid: &Rid) -> Self {
        self.request_id = rid.0.clone();
        self
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.error
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }

    pub fn not_connected() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "not_connected",
            "account not connected",
        )
    }

    pub fn already_connected() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "already_connected",
            "account is already connected",
        )
    }

    pub fn client_error() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "client_error",
            "failed to get client",
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::REQUEST_TIMEOUT, "timeout", message)
    }

    /// 500 with an upstream-failure label (`send_failed`,
    /// `groups_fetch_failed`, ...). The message is already sanitized by the
    /// caller.
    pub fn upstream(error: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error, message)
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        tracing::error!(error = %err, "session acquisition failed");
        Self::client_error()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": self.error,
                "message": self.message,
                "request_id": self.request_id,
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_expected_status() {
        assert_eq!(ApiError::invalid_request("x").status, StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::not_connected().status, StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::already_connected().status, StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::client_error().status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::timeout("x").status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            ApiError::upstream("send_failed", "x").status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
