//! User records and password verification.

use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::ValidateEmail;

use crate::auth::password::{PasswordPolicy, PasswordService, MAX_PASSWORD_LENGTH};
use crate::clock::SharedClock;
use crate::config::SecurityConfig;
use crate::error::{AuthError, AuthResult};
use crate::helpers::run_blocking;
use crate::models::{NewUser, User};
use crate::store::{self, SharedUserRepository};

const DUMMY_PASSWORD: &str = "timing-equalizer-not-a-real-password";

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct CredentialStore {
    users: SharedUserRepository,
    policy: PasswordPolicy,
    hash_cost: u32,
    timeout: Duration,
    clock: SharedClock,
    dummy_hash: OnceCell<String>,
}

impl CredentialStore {
    pub fn new(
        users: SharedUserRepository,
        policy: PasswordPolicy,
        hash_cost: u32,
        timeout: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            users,
            policy,
            hash_cost,
            timeout,
            clock,
            dummy_hash: OnceCell::new(),
        }
    }

    pub fn from_config(
        users: SharedUserRepository,
        security: &SecurityConfig,
        clock: SharedClock,
    ) -> Self {
        let policy = if security.require_password_complexity {
            PasswordPolicy::complex(security.min_password_length)
        } else {
            PasswordPolicy {
                min_length: security.min_password_length,
                ..Default::default()
            }
        };

        Self::new(
            users,
            policy,
            security.password_hash_cost,
            security.operation_timeout(),
            clock,
        )
    }

    pub async fn create_user(&self, email: &str, password: &str) -> AuthResult<User> {
        let email = normalize_email(email);
        if !email.validate_email() {
            return Err(AuthError::invalid_input("Invalid email format"));
        }

        self.policy
            .validate_for(&email, password)
            .map_err(|e| AuthError::invalid_input(e.to_string()))?;

        let password_hash = self.hash(password).await?;
        let now = self.clock.now_naive();
        let new_user = NewUser {
            id: Uuid::new_v4(),
            email,
            password_hash,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let user = store::commit(&self.users, move |r| r.insert(new_user))
            .await
            .map_err(|e| {
                if e == store::StoreError::UniqueViolation {
                    info!("Registration rejected: email already taken");
                }
                AuthError::from(e)
            })?;

        info!(user_id = %user.id, "User created");
        Ok(user)
    }

    /// Every failure reason collapses to [`AuthError::Unauthorized`]; the reason is logged only.
    pub async fn verify_credentials(&self, email: &str, password: &str) -> AuthResult<User> {
        let email = normalize_email(email);

        if password.chars().count() > MAX_PASSWORD_LENGTH {
            warn!("Rejected credentials: password exceeds maximum length");
            return Err(AuthError::Unauthorized);
        }

        let lookup = email.clone();
        let found = store::call(&self.users, self.timeout, move |r| r.find_by_email(&lookup))
            .await?;

        let Some(user) = found else {
            let dummy = self.dummy_hash().await?;
            let _ = self.verify_hash(password, dummy).await?;
            warn!(email = %email, "Rejected credentials: unknown email");
            return Err(AuthError::Unauthorized);
        };

        if !self.verify_hash(password, user.password_hash.clone()).await? {
            warn!(user_id = %user.id, "Rejected credentials: wrong password");
            return Err(AuthError::Unauthorized);
        }

        if !user.is_active {
            warn!(user_id = %user.id, "Rejected credentials: account inactive");
            return Err(AuthError::Unauthorized);
        }

        Ok(user)
    }

    pub async fn find_user(&self, user_id: Uuid) -> AuthResult<Option<User>> {
        Ok(store::call(&self.users, self.timeout, move |r| r.find_by_id(user_id)).await?)
    }

    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<User> {
        let Some(user) = self.find_user(user_id).await? else {
            warn!(user_id = %user_id, "Password change for unknown user");
            return Err(AuthError::Unauthorized);
        };

        if !user.is_active
            || !self
                .verify_hash(current_password, user.password_hash.clone())
                .await?
        {
            warn!(user_id = %user.id, "Password change rejected: current password mismatch");
            return Err(AuthError::Unauthorized);
        }

        self.policy
            .validate_for(&user.email, new_password)
            .map_err(|e| AuthError::invalid_input(e.to_string()))?;

        if current_password == new_password {
            return Err(AuthError::invalid_input(
                "New password must differ from the current password",
            ));
        }

        let password_hash = self.hash(new_password).await?;
        let now = self.clock.now_naive();
        let updated = store::commit(&self.users, move |r| {
            r.update_password_hash(user_id, &password_hash, now)
        })
        .await?;

        if !updated {
            return Err(AuthError::Unauthorized);
        }

        info!(user_id = %user.id, "Password changed");
        Ok(user)
    }

    async fn hash(&self, password: &str) -> AuthResult<String> {
        let password = password.to_string();
        let cost = self.hash_cost;

        run_blocking(self.timeout, move || {
            PasswordService::hash_password_with_cost(&password, cost)
        })
        .await?
        .map_err(|e| {
            error!(error = %e, "Password hashing failed");
            AuthError::internal("password hashing failed")
        })
    }

    async fn verify_hash(&self, password: &str, password_hash: String) -> AuthResult<bool> {
        let password = password.to_string();

        run_blocking(self.timeout, move || {
            PasswordService::verify_password(&password, &password_hash)
        })
        .await?
        .map_err(|e| {
            error!(error = %e, "Stored password hash could not be parsed");
            AuthError::internal("password verification failed")
        })
    }

    /// A hash with the configured cost, so unknown emails take as long as wrong passwords.
    async fn dummy_hash(&self) -> AuthResult<String> {
        self.dummy_hash
            .get_or_try_init(|| self.hash(DUMMY_PASSWORD))
            .await
            .cloned()
    }
}
