//! Error taxonomy exposed at the service boundary.
//!
//! Internal layers keep detailed reasons (unknown user vs. wrong password,
//! expired vs. revoked session). Everything credential- or token-related is
//! collapsed into [`AuthError::Unauthorized`] before it leaves the facade.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

pub const UNAUTHORIZED_MESSAGE: &str = "Invalid credentials or token";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("User with this email already exists")]
    AlreadyExists,

    #[error("{}", UNAUTHORIZED_MESSAGE)]
    Unauthorized,

    #[error("Service temporarily unavailable: {0}")]
    Transient(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        AuthError::InvalidInput(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        AuthError::Transient(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AuthError::Internal(message.into())
    }

    /// Only transient failures are safe for the caller to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Transient(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidInput(_) => "INVALID_INPUT",
            AuthError::AlreadyExists => "USER_EXISTS",
            AuthError::Unauthorized => "UNAUTHORIZED",
            AuthError::Transient(_) => "UNAVAILABLE",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AuthError::AlreadyExists => StatusCode::CONFLICT,
            AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to a remote caller. Backend details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::InvalidInput(msg) => msg.clone(),
            AuthError::Transient(_) => "Service temporarily unavailable".to_string(),
            AuthError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<AuthError> for tonic::Status {
    fn from(err: AuthError) -> Self {
        let message = err.public_message();
        match err {
            AuthError::InvalidInput(_) => tonic::Status::invalid_argument(message),
            AuthError::AlreadyExists => tonic::Status::already_exists(message),
            AuthError::Unauthorized => tonic::Status::unauthenticated(message),
            AuthError::Transient(_) => tonic::Status::unavailable(message),
            AuthError::Internal(_) => tonic::Status::internal(message),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    #[schema(example = "Invalid credentials or token")]
    pub error: String,
    #[schema(example = "UNAUTHORIZED")]
    pub code: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }

    pub fn unauthorized() -> (StatusCode, Json<Self>) {
        (
            StatusCode::UNAUTHORIZED,
            Json(Self::new(UNAUTHORIZED_MESSAGE, "UNAUTHORIZED")),
        )
    }
}

impl From<&AuthError> for ApiError {
    fn from(err: &AuthError) -> Self {
        Self::new(err.public_message(), err.code())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ApiError::from(&self))).into_response()
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
