//! gRPC AuthService implementation.

use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::instrument;

use crate::models::User;
use crate::service::AuthFacade;

use super::proto::auth_service_server::AuthService;
use super::proto::{
    self, ChangePasswordRequest, ChangePasswordResponse, LoginRequest, LoginResponse,
    LogoutAllRequest, LogoutAllResponse, LogoutRequest, LogoutResponse, RefreshTokenRequest,
    RefreshTokenResponse, RegisterRequest, RegisterResponse, ValidateTokenRequest,
    ValidateTokenResponse,
};

impl From<User> for proto::User {
    fn from(user: User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email,
            created_at: user.created_at.and_utc().timestamp(),
        }
    }
}

pub struct AuthGrpcService {
    facade: Arc<AuthFacade>,
}

impl AuthGrpcService {
    pub fn new(facade: Arc<AuthFacade>) -> Self {
        Self { facade }
    }
}

fn revoked_count(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

#[tonic::async_trait]
impl AuthService for AuthGrpcService {
    #[instrument(skip(self, request))]
    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        let req = request.into_inner();
        let tokens = self.facade.login(&req.email, &req.password).await?;

        Ok(Response::new(LoginResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in,
            user: Some(tokens.user.into()),
        }))
    }

    #[instrument(skip(self, request))]
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let req = request.into_inner();
        let user = self.facade.register(&req.email, &req.password).await?;

        Ok(Response::new(RegisterResponse {
            user: Some(user.into()),
        }))
    }

    #[instrument(skip(self, request), fields(token_len = request.get_ref().refresh_token.len()))]
    async fn refresh_token(
        &self,
        request: Request<RefreshTokenRequest>,
    ) -> Result<Response<RefreshTokenResponse>, Status> {
        let req = request.into_inner();
        let tokens = self.facade.refresh_token(&req.refresh_token).await?;

        Ok(Response::new(RefreshTokenResponse {
            access_token: tokens.access_token,
            expires_in: tokens.expires_in,
            refresh_token: tokens.refresh_token,
        }))
    }

    #[instrument(skip(self, request), fields(token_len = request.get_ref().refresh_token.len()))]
    async fn logout(
        &self,
        request: Request<LogoutRequest>,
    ) -> Result<Response<LogoutResponse>, Status> {
        let req = request.into_inner();
        self.facade.logout(&req.refresh_token).await?;

        Ok(Response::new(LogoutResponse { success: true }))
    }

    /// Invalid tokens yield `valid: false` rather than an error status.
    #[instrument(skip(self, request), fields(token_len = request.get_ref().access_token.len()))]
    async fn validate_token(
        &self,
        request: Request<ValidateTokenRequest>,
    ) -> Result<Response<ValidateTokenResponse>, Status> {
        let req = request.into_inner();

        let response = match self.facade.validate_token(&req.access_token).await {
            Ok(claims) => ValidateTokenResponse {
                valid: true,
                user_id: claims.sub,
                email: claims.email,
                scope: claims.scope,
                expires_at: claims.exp,
            },
            Err(_) => ValidateTokenResponse {
                valid: false,
                ..Default::default()
            },
        };

        Ok(Response::new(response))
    }

    #[instrument(skip(self, request))]
    async fn change_password(
        &self,
        request: Request<ChangePasswordRequest>,
    ) -> Result<Response<ChangePasswordResponse>, Status> {
        let req = request.into_inner();
        let revoked = self
            .facade
            .change_password(&req.access_token, &req.current_password, &req.new_password)
            .await?;

        Ok(Response::new(ChangePasswordResponse {
            revoked_sessions: revoked_count(revoked),
        }))
    }

    #[instrument(skip(self, request))]
    async fn logout_all(
        &self,
        request: Request<LogoutAllRequest>,
    ) -> Result<Response<LogoutAllResponse>, Status> {
        let req = request.into_inner();
        let revoked = self.facade.logout_all(&req.access_token).await?;

        Ok(Response::new(LogoutAllResponse {
            revoked_sessions: revoked_count(revoked),
        }))
    }
}
