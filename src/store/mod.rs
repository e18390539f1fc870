//! Persistence for users and sessions.
//!
//! Repositories are synchronous and run on the blocking pool. Reads go through
//! [`call`] and give up after the operation timeout. Writes go through [`commit`]
//! and are always awaited: a write the caller stopped waiting for could still
//! commit, and reporting it as retryable would make the retry fail. Writes are
//! bounded by the backend instead (pool checkout timeout, `statement_timeout`).

pub mod memory;
pub mod postgres;

use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use uuid::Uuid;

use crate::error::AuthError;
use crate::helpers::{run_blocking, run_to_completion, BlockingError};
use crate::models::{NewSession, NewUser, Session, SessionState, User};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated")]
    UniqueViolation,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Backend(String),
}

impl From<BlockingError> for StoreError {
    fn from(err: BlockingError) -> Self {
        match err {
            BlockingError::TimedOut(_) => StoreError::Unavailable(err.to_string()),
            BlockingError::Join(msg) => StoreError::Backend(msg),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation => AuthError::AlreadyExists,
            StoreError::Unavailable(msg) => {
                error!(error = %msg, "Storage unavailable");
                AuthError::Transient(msg)
            }
            StoreError::Backend(msg) => {
                error!(error = %msg, "Storage error");
                AuthError::Internal(msg)
            }
        }
    }
}

/// Result of a compare-and-set on a session's state.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<T> {
    Applied(T),
    NotFound,
    AlreadyTerminal(SessionState),
}

pub trait UserRepository: Send + Sync {
    /// Fails with [`StoreError::UniqueViolation`] when the (lowercased) email is taken.
    fn insert(&self, user: NewUser) -> Result<User, StoreError>;

    fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    fn update_password_hash(
        &self,
        id: Uuid,
        password_hash: &str,
        now: NaiveDateTime,
    ) -> Result<bool, StoreError>;

    fn ping(&self) -> Result<(), StoreError>;
}

pub trait SessionRepository: Send + Sync {
    fn insert(&self, session: NewSession) -> Result<Session, StoreError>;

    fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, StoreError>;

    fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Moves an `Active` session to `to`. Exactly one concurrent caller wins.
    fn transition(&self, id: Uuid, to: SessionState) -> Result<Transition<()>, StoreError>;

    /// Consumes `old_id` and inserts `replacement` as one atomic step.
    fn rotate(
        &self,
        old_id: Uuid,
        replacement: NewSession,
        now: NaiveDateTime,
    ) -> Result<Transition<Session>, StoreError>;

    /// Revokes every active session of the user; returns how many changed.
    fn revoke_all_for_user(&self, user_id: Uuid) -> Result<usize, StoreError>;
}

pub type SharedUserRepository = Arc<dyn UserRepository>;
pub type SharedSessionRepository = Arc<dyn SessionRepository>;

/// Runs one repository call on the blocking pool, bounded by `limit`.
pub async fn call<R, T, F>(repo: &Arc<R>, limit: Duration, f: F) -> Result<T, StoreError>
where
    R: ?Sized + Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&R) -> Result<T, StoreError> + Send + 'static,
{
    let repo = Arc::clone(repo);
    run_blocking(limit, move || f(&repo)).await?
}

/// Runs one state-changing repository call on the blocking pool and waits for its outcome.
pub async fn commit<R, T, F>(repo: &Arc<R>, f: F) -> Result<T, StoreError>
where
    R: ?Sized + Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&R) -> Result<T, StoreError> + Send + 'static,
{
    let repo = Arc::clone(repo);
    run_to_completion(move || f(&repo)).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        assert_eq!(
            AuthError::from(StoreError::UniqueViolation),
            AuthError::AlreadyExists
        );
        assert!(AuthError::from(StoreError::Unavailable("pool".into())).is_retryable());
        assert!(matches!(
            AuthError::from(StoreError::Backend("x".into())),
            AuthError::Internal(_)
        ));
    }

    #[test]
    fn test_timeout_is_unavailable() {
        let err: StoreError = BlockingError::TimedOut(Duration::from_millis(5)).into();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_call_runs_against_trait_object() {
        let repo: SharedUserRepository = Arc::new(MemoryStore::new());
        let found = call(&repo, Duration::from_secs(1), |r| r.find_by_email("nobody@x.com"))
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
