//! Access-token minting and refresh-token rotation.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

use crate::auth::jwt::{AccessClaims, Claims, JwtKeys, TokenError};
use crate::auth::refresh::RefreshSecret;
use crate::clock::SharedClock;
use crate::error::{AuthError, AuthResult};
use crate::models::User;
use crate::sessions::{SessionError, SessionRegistry};
use crate::store::{self, SharedUserRepository};

pub const DEFAULT_SCOPE: &str = "user";

#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub claims: Claims,
    pub expires_in: i64,
}

#[derive(Debug)]
pub struct IssuedTokens {
    pub user: User,
    pub access: IssuedAccessToken,
    pub refresh_token: RefreshSecret,
    pub session_id: Uuid,
}

pub fn claims_for(user: &User) -> AccessClaims {
    AccessClaims {
        email: user.email.clone(),
        scope: vec![DEFAULT_SCOPE.to_string()],
    }
}

pub struct TokenIssuer {
    keys: JwtKeys,
    access_ttl_secs: i64,
    clock: SharedClock,
    sessions: Arc<SessionRegistry>,
    users: SharedUserRepository,
    timeout: Duration,
}

impl TokenIssuer {
    pub fn new(
        keys: JwtKeys,
        access_ttl_secs: i64,
        clock: SharedClock,
        sessions: Arc<SessionRegistry>,
        users: SharedUserRepository,
        timeout: Duration,
    ) -> Self {
        Self {
            keys,
            access_ttl_secs,
            clock,
            sessions,
            users,
            timeout,
        }
    }

    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        claims: AccessClaims,
    ) -> AuthResult<IssuedAccessToken> {
        let (token, claims) = self
            .keys
            .sign(user_id, claims, self.clock.unix_now(), self.access_ttl_secs)
            .map_err(|e| {
                error!(error = %e, "Access token signing failed");
                AuthError::internal("token signing failed")
            })?;

        Ok(IssuedAccessToken {
            token,
            claims,
            expires_in: self.access_ttl_secs,
        })
    }

    pub async fn issue_refresh_token(&self, user_id: Uuid) -> AuthResult<(RefreshSecret, Uuid)> {
        let secret = RefreshSecret::generate();
        let session = self.sessions.create(user_id, secret.digest()).await?;
        Ok((secret, session.id))
    }

    /// Pure check of signature, issuer, audience and expiry against the injected clock.
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.keys.verify(token, self.clock.unix_now())
    }

    /// Consumes `old_token` and returns a fresh access/refresh pair.
    pub async fn rotate_refresh_token(&self, old_token: &str) -> AuthResult<IssuedTokens> {
        let session = self
            .sessions
            .resolve(old_token)
            .await
            .map_err(|e| reject(e, "resolve"))?;

        let user_id = session.user_id;
        let user = store::call(&self.users, self.timeout, move |r| r.find_by_id(user_id)).await?;
        let user = match user {
            Some(user) if user.is_active => user,
            _ => {
                warn!(user_id = %user_id, "Refresh rejected: user missing or inactive");
                if let Err(e) = self.sessions.revoke(session.id).await {
                    error!(session_id = %session.id, error = %e, "Failed to revoke orphaned session");
                    if let SessionError::Store(store_err) = e {
                        return Err(store_err.into());
                    }
                }
                return Err(AuthError::Unauthorized);
            }
        };

        let access = self.issue_access_token(user.id, claims_for(&user))?;
        let refresh_token = RefreshSecret::generate();

        let new_session = self
            .sessions
            .rotate(&session, refresh_token.digest())
            .await
            .map_err(|e| reject(e, "rotate"))?;

        Ok(IssuedTokens {
            user,
            access,
            refresh_token,
            session_id: new_session.id,
        })
    }
}

fn reject(err: SessionError, stage: &'static str) -> AuthError {
    if !matches!(err, SessionError::Store(_)) {
        warn!(reason = %err, stage, "Refresh token rejected");
    }
    err.into()
}
