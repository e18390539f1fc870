//! The externally visible auth operations.
//!
//! Each operation records `auth_attempts_total` and, on success, publishes a
//! domain event. Event delivery never affects the result returned.

use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::auth::jwt::Claims;
use crate::clock::SharedClock;
use crate::credentials::{normalize_email, CredentialStore};
use crate::error::{AuthError, AuthResult};
use crate::events::{
    DomainEvent, EventPublisher, EventType, LoginFailedPayload, SessionsRevokedPayload,
    UserCreatedPayload,
};
use crate::models::User;
use crate::sessions::{SessionError, SessionRegistry};
use crate::telemetry::{record_auth_attempt, AuthOutcome};
use crate::tokens::{claims_for, TokenIssuer};

/// Tokens handed to a client after login or refresh.
#[derive(Debug, Clone)]
pub struct AuthTokens {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

pub struct AuthFacade {
    credentials: Arc<CredentialStore>,
    tokens: Arc<TokenIssuer>,
    sessions: Arc<SessionRegistry>,
    events: EventPublisher,
    clock: SharedClock,
}

impl AuthFacade {
    pub fn new(
        credentials: Arc<CredentialStore>,
        tokens: Arc<TokenIssuer>,
        sessions: Arc<SessionRegistry>,
        events: EventPublisher,
        clock: SharedClock,
    ) -> Self {
        Self {
            credentials,
            tokens,
            sessions,
            events,
            clock,
        }
    }

    #[instrument(skip_all)]
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<AuthTokens> {
        let result = self.try_login(email, password).await;
        record_auth_attempt("login", AuthOutcome::of(&result));

        match &result {
            Ok(tokens) => {
                info!(user_id = %tokens.user.id, "User logged in");
                self.emit(EventType::LoginSucceeded, Some(tokens.user.id), None::<&()>)
                    .await;
            }
            Err(AuthError::Unauthorized) => {
                self.emit(
                    EventType::LoginFailed,
                    None,
                    Some(&LoginFailedPayload {
                        email: normalize_email(email),
                    }),
                )
                .await;
            }
            Err(_) => {}
        }

        result
    }

    async fn try_login(&self, email: &str, password: &str) -> AuthResult<AuthTokens> {
        let user = self.credentials.verify_credentials(email, password).await?;
        let access = self.tokens.issue_access_token(user.id, claims_for(&user))?;
        let (refresh_token, _) = self.tokens.issue_refresh_token(user.id).await?;

        Ok(AuthTokens {
            user,
            access_token: access.token,
            refresh_token: refresh_token.into_string(),
            expires_in: access.expires_in,
        })
    }

    /// Creates the account only; clients log in afterwards.
    #[instrument(skip_all)]
    pub async fn register(&self, email: &str, password: &str) -> AuthResult<User> {
        let result = self.credentials.create_user(email, password).await;
        record_auth_attempt("register", AuthOutcome::of(&result));

        if let Ok(user) = &result {
            self.emit(
                EventType::UserCreated,
                Some(user.id),
                Some(&UserCreatedPayload {
                    email: user.email.clone(),
                }),
            )
            .await;
        }

        result
    }

    #[instrument(skip_all)]
    pub async fn refresh_token(&self, refresh_token: &str) -> AuthResult<AuthTokens> {
        let result = self
            .tokens
            .rotate_refresh_token(refresh_token)
            .await
            .map(|issued| AuthTokens {
                user: issued.user,
                access_token: issued.access.token,
                refresh_token: issued.refresh_token.into_string(),
                expires_in: issued.access.expires_in,
            });
        record_auth_attempt("refresh", AuthOutcome::of(&result));

        if let Ok(tokens) = &result {
            debug!(user_id = %tokens.user.id, "Refresh token rotated");
            self.emit(EventType::TokenRefreshed, Some(tokens.user.id), None::<&()>)
                .await;
        }

        result
    }

    /// Succeeds for unknown, malformed, expired or already-ended tokens.
    #[instrument(skip_all)]
    pub async fn logout(&self, refresh_token: &str) -> AuthResult<()> {
        let result = self.try_logout(refresh_token).await;
        record_auth_attempt("logout", AuthOutcome::of(&result));

        if let Ok(Some(user_id)) = result {
            info!(user_id = %user_id, "User logged out");
            self.emit(EventType::LogoutCompleted, Some(user_id), None::<&()>)
                .await;
        }

        result.map(|_| ())
    }

    async fn try_logout(&self, refresh_token: &str) -> AuthResult<Option<Uuid>> {
        let Some(session) = self.sessions.lookup(refresh_token).await? else {
            debug!("Logout with unknown refresh token");
            return Ok(None);
        };

        match self.sessions.revoke(session.id).await {
            Ok(()) | Err(SessionError::NotFound) => Ok(Some(session.user_id)),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip_all)]
    pub async fn validate_token(&self, access_token: &str) -> AuthResult<Claims> {
        let result = self
            .tokens
            .validate_access_token(access_token)
            .map_err(|e| {
                debug!(reason = %e, "Access token rejected");
                AuthError::Unauthorized
            });
        record_auth_attempt("validate", AuthOutcome::of(&result));
        result
    }

    /// Changes the password and revokes every session of the user.
    #[instrument(skip_all)]
    pub async fn change_password(
        &self,
        access_token: &str,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<usize> {
        let result = self
            .try_change_password(access_token, current_password, new_password)
            .await;
        record_auth_attempt("change_password", AuthOutcome::of(&result));

        if let Ok((user_id, revoked)) = &result {
            self.emit(EventType::PasswordChanged, Some(*user_id), None::<&()>)
                .await;
            self.emit_revoked(*user_id, *revoked, "password_changed").await;
        }

        result.map(|(_, revoked)| revoked)
    }

    async fn try_change_password(
        &self,
        access_token: &str,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<(Uuid, usize)> {
        let user_id = self.authenticate(access_token)?;
        self.credentials
            .change_password(user_id, current_password, new_password)
            .await?;
        let revoked = self.sessions.revoke_all_for_user(user_id).await?;
        Ok((user_id, revoked))
    }

    #[instrument(skip_all)]
    pub async fn logout_all(&self, access_token: &str) -> AuthResult<usize> {
        let result = match self.authenticate(access_token) {
            Ok(user_id) => self
                .sessions
                .revoke_all_for_user(user_id)
                .await
                .map(|revoked| (user_id, revoked))
                .map_err(AuthError::from),
            Err(e) => Err(e),
        };
        record_auth_attempt("logout_all", AuthOutcome::of(&result));

        if let Ok((user_id, revoked)) = &result {
            self.emit_revoked(*user_id, *revoked, "logout_all").await;
        }

        result.map(|(_, revoked)| revoked)
    }

    fn authenticate(&self, access_token: &str) -> AuthResult<Uuid> {
        let claims = self
            .tokens
            .validate_access_token(access_token)
            .map_err(|e| {
                debug!(reason = %e, "Access token rejected");
                AuthError::Unauthorized
            })?;
        claims.user_id().ok_or(AuthError::Unauthorized)
    }

    async fn emit_revoked(&self, user_id: Uuid, count: usize, reason: &str) {
        self.emit(
            EventType::SessionsRevoked,
            Some(user_id),
            Some(&SessionsRevokedPayload {
                count,
                reason: reason.to_string(),
            }),
        )
        .await;
    }

    async fn emit<P: serde::Serialize>(
        &self,
        event_type: EventType,
        user_id: Option<Uuid>,
        payload: Option<&P>,
    ) {
        let mut event = DomainEvent::new(event_type, self.clock.now());
        if let Some(user_id) = user_id {
            event = event.with_user(user_id);
        }
        if let Some(payload) = payload {
            event = event.with_payload(payload);
        }
        self.events.publish(event).await;
    }
}
