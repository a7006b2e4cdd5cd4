use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::{AuthError, Error, RequestError, SessionError, StoreError};

/// Error surfaced at the HTTP boundary.
///
/// Bodies use the same `{ok, error_code, error}` shape as job results. Internal
/// failures are logged in full and answered with a generic message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("envelope authentication failed")]
    SealedAuth,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Auth(AuthError::MissingField(_)) => StatusCode::BAD_REQUEST,
            Self::Auth(AuthError::InvalidToken) | Self::SealedAuth => StatusCode::UNAUTHORIZED,
            Self::Auth(AuthError::ExpiredDeadline { .. }) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Auth(e) => e.code(),
            Self::SealedAuth => "AUTHENTICATION_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::AuthenticationFailed => Self::SealedAuth,
            SessionError::DecodeError(msg) => Self::BadRequest(msg),
            SessionError::UnknownSession(id) => Self::NotFound(format!("session {id}")),
            SessionError::Crypto(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<RequestError> for ApiError {
    fn from(e: RequestError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::Auth(e) => e.into(),
            Error::Session(e) => e.into(),
            Error::Request(e) => e.into(),
            Error::Store(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let body = json!({
            "ok": false,
            "error_code": self.code(),
            "error": message,
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            ApiError::from(AuthError::InvalidToken).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(AuthError::MissingField("job_id")).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(AuthError::ExpiredDeadline { deadline_ts: 1, now: 2 }).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(SessionError::UnknownSession("s".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(SessionError::AuthenticationFailed).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn codes_follow_auth_errors() {
        let err: ApiError = Error::Auth(AuthError::InvalidToken).into();
        assert_eq!(err.code(), "INVALID_TOKEN");
        let err: ApiError = StoreError::Task("boom".into()).into();
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }
}
