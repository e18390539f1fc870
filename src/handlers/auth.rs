//! Authentication handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{ApiError, AuthError, AuthResult},
    middleware::BearerToken,
    models::User,
    service::AuthTokens,
    AppState,
};

pub const TOKEN_TYPE: &str = "Bearer";

/// The email is trimmed and checked by the credential store, same as over gRPC.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "user@example.com")]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "securepassword123", min_length = 8)]
    pub password: String,
}

/// Deliberately not validated here: malformed emails fail like any other bad login.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "user@example.com")]
    pub email: String,
    #[schema(example = "securepassword123")]
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    #[schema(example = "rt_3q2-7wEvZ0b9kYx1sWbR4JtQy8nH5mLcVfUaDpGhK2o")]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyRequest {
    #[schema(example = "eyJhbGciOiJFZERTQSIsInR5cCI6IkpXVCJ9...")]
    pub access_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(length(min = 1, message = "New password is required"))]
    #[schema(min_length = 8)]
    pub new_password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    #[schema(example = "user@example.com")]
    pub email: String,
    pub created_at: chrono::NaiveDateTime,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub user: UserResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub user: UserResponse,
    #[schema(example = "eyJhbGciOiJFZERTQSIsInR5cCI6IkpXVCJ9...")]
    pub access_token: String,
    #[schema(example = "rt_3q2-7wEvZ0b9kYx1sWbR4JtQy8nH5mLcVfUaDpGhK2o")]
    pub refresh_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    #[schema(example = 3600)]
    pub expires_in: i64,
}

impl From<AuthTokens> for AuthResponse {
    fn from(tokens: AuthTokens) -> Self {
        Self {
            user: tokens.user.into(),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: tokens.expires_in,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    #[schema(example = 3600)]
    pub expires_in: i64,
}

impl From<AuthTokens> for RefreshResponse {
    fn from(tokens: AuthTokens) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: tokens.expires_in,
        }
    }
}

#[derive(Debug, Serialize, ToSchema, Default)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = 1718000000)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionsRevokedResponse {
    #[schema(example = 3)]
    pub revoked_sessions: usize,
}

fn validated<T: Validate>(payload: &T) -> AuthResult<()> {
    payload
        .validate()
        .map_err(|e| AuthError::invalid_input(format!("Validation error: {}", e)))
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Authentication",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = RegisterResponse),
        (status = 400, description = "Invalid email or password", body = ApiError),
        (status = 409, description = "User already exists", body = ApiError),
        (status = 503, description = "Storage unavailable, retry later", body = ApiError)
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AuthResult<(StatusCode, Json<RegisterResponse>)> {
    validated(&payload)?;

    let user = state
        .facade
        .register(&payload.email, &payload.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { user: user.into() }),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Authentication",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ApiError),
        (status = 503, description = "Storage unavailable, retry later", body = ApiError)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AuthResult<Json<AuthResponse>> {
    let tokens = state.facade.login(&payload.email, &payload.password).await?;
    Ok(Json(tokens.into()))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "Authentication",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Tokens rotated", body = RefreshResponse),
        (status = 401, description = "Invalid, expired, revoked or reused refresh token", body = ApiError),
        (status = 503, description = "Storage unavailable, retry later", body = ApiError)
    )
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AuthResult<Json<RefreshResponse>> {
    let tokens = state.facade.refresh_token(&payload.refresh_token).await?;
    Ok(Json(tokens.into()))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Authentication",
    request_body = RefreshRequest,
    responses(
        (status = 204, description = "Logged out, also for unknown or already-ended tokens"),
        (status = 503, description = "Storage unavailable, retry later", body = ApiError)
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AuthResult<StatusCode> {
    state.facade.logout(&payload.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/auth/verify",
    tag = "Authentication",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Verification result; `valid` is false for any bad token", body = VerifyResponse)
    )
)]
pub async fn verify_token(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> Json<VerifyResponse> {
    let response = match state.facade.validate_token(&payload.access_token).await {
        Ok(claims) => VerifyResponse {
            valid: true,
            user_id: claims.user_id(),
            email: Some(claims.email),
            scope: claims.scope,
            expires_at: Some(claims.exp),
        },
        Err(_) => VerifyResponse::default(),
    };
    Json(response)
}

#[utoipa::path(
    post,
    path = "/auth/password",
    tag = "Authentication",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed; all sessions revoked", body = SessionsRevokedResponse),
        (status = 400, description = "New password rejected by policy", body = ApiError),
        (status = 401, description = "Invalid access token or current password", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    BearerToken(access_token): BearerToken,
    Json(payload): Json<ChangePasswordRequest>,
) -> AuthResult<Json<SessionsRevokedResponse>> {
    validated(&payload)?;

    let revoked_sessions = state
        .facade
        .change_password(
            &access_token,
            &payload.current_password,
            &payload.new_password,
        )
        .await?;

    Ok(Json(SessionsRevokedResponse { revoked_sessions }))
}

#[utoipa::path(
    post,
    path = "/auth/logout-all",
    tag = "Authentication",
    responses(
        (status = 200, description = "Every session of the caller revoked", body = SessionsRevokedResponse),
        (status = 401, description = "Invalid access token", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout_all(
    State(state): State<AppState>,
    BearerToken(access_token): BearerToken,
) -> AuthResult<Json<SessionsRevokedResponse>> {
    let revoked_sessions = state.facade.logout_all(&access_token).await?;
    Ok(Json(SessionsRevokedResponse { revoked_sessions }))
}
