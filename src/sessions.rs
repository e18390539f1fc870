//! Server-side refresh sessions and their state machine.
//!
//! A session starts `Active` and ends either `Consumed` (rotated) or `Revoked`.
//! Both end states are final. Presenting the secret of a consumed session is
//! treated as token theft: every session of that user is revoked.

use chrono::Duration as ChronoDuration;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::refresh::{hash_token, looks_like_refresh_token};
use crate::clock::SharedClock;
use crate::error::AuthError;
use crate::events::{DomainEvent, EventPublisher, EventType, SessionsRevokedPayload};
use crate::models::{NewSession, Session, SessionState};
use crate::store::{self, SharedSessionRepository, StoreError, Transition};
use crate::telemetry::record_refresh_reuse;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
    #[error("session revoked")]
    Revoked,
    #[error("consumed refresh token presented again; {revoked} sessions revoked")]
    Reused { user_id: Uuid, revoked: usize },
    #[error("session already {0}")]
    AlreadyTerminal(SessionState),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Store(e) => e.into(),
            _ => AuthError::Unauthorized,
        }
    }
}

pub struct SessionRegistry {
    sessions: SharedSessionRepository,
    ttl: ChronoDuration,
    timeout: Duration,
    clock: SharedClock,
    events: EventPublisher,
}

impl SessionRegistry {
    pub fn new(
        sessions: SharedSessionRepository,
        ttl_secs: i64,
        timeout: Duration,
        clock: SharedClock,
        events: EventPublisher,
    ) -> Self {
        Self {
            sessions,
            ttl: ChronoDuration::seconds(ttl_secs),
            timeout,
            clock,
            events,
        }
    }

    pub async fn create(&self, user_id: Uuid, token_digest: String) -> Result<Session, SessionError> {
        let now = self.clock.now_naive();
        let new_session = NewSession::active(user_id, token_digest, now, now + self.ttl);

        let session = store::commit(&self.sessions, move |r| r.insert(new_session)).await?;
        Ok(session)
    }

    /// Compare-and-set `Active -> Consumed`. Concurrent losers get `AlreadyTerminal`.
    pub async fn mark_consumed(&self, session_id: Uuid) -> Result<(), SessionError> {
        let transition = store::commit(&self.sessions, move |r| {
            r.transition(session_id, SessionState::Consumed)
        })
        .await?;

        match transition {
            Transition::Applied(()) => Ok(()),
            Transition::NotFound => Err(SessionError::NotFound),
            Transition::AlreadyTerminal(state) => Err(SessionError::AlreadyTerminal(state)),
        }
    }

    /// `Active -> Revoked`. A session that has already ended counts as revoked.
    pub async fn revoke(&self, session_id: Uuid) -> Result<(), SessionError> {
        let transition = store::commit(&self.sessions, move |r| {
            r.transition(session_id, SessionState::Revoked)
        })
        .await?;

        match transition {
            Transition::Applied(()) | Transition::AlreadyTerminal(_) => Ok(()),
            Transition::NotFound => Err(SessionError::NotFound),
        }
    }

    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<usize, SessionError> {
        let revoked = store::commit(&self.sessions, move |r| r.revoke_all_for_user(user_id)).await?;

        if revoked > 0 {
            info!(user_id = %user_id, revoked, "Revoked all sessions for user");
        }
        Ok(revoked)
    }

    /// Looks a session up by its secret without judging its state.
    pub async fn lookup(&self, token: &str) -> Result<Option<Session>, SessionError> {
        if !looks_like_refresh_token(token) {
            return Ok(None);
        }

        let digest = hash_token(token);
        let session = store::call(&self.sessions, self.timeout, move |r| {
            r.find_by_token_hash(&digest)
        })
        .await?;
        Ok(session)
    }

    /// Returns the session only if it is active and unexpired.
    pub async fn resolve(&self, token: &str) -> Result<Session, SessionError> {
        let session = self.lookup(token).await?.ok_or(SessionError::NotFound)?;

        match session.state() {
            SessionState::Active => {}
            SessionState::Revoked => return Err(SessionError::Revoked),
            SessionState::Consumed => return Err(self.handle_reuse(&session).await),
        }

        if session.is_expired_at(self.clock.now_naive()) {
            return Err(SessionError::Expired);
        }

        Ok(session)
    }

    /// Consumes `old` and creates its replacement in one step.
    pub async fn rotate(&self, old: &Session, token_digest: String) -> Result<Session, SessionError> {
        let now = self.clock.now_naive();
        let replacement = NewSession::active(old.user_id, token_digest, now, now + self.ttl);
        let old_id = old.id;

        let transition = store::commit(&self.sessions, move |r| {
            r.rotate(old_id, replacement, now)
        })
        .await?;

        match transition {
            Transition::Applied(session) => Ok(session),
            Transition::NotFound => Err(SessionError::NotFound),
            Transition::AlreadyTerminal(state) => Err(SessionError::AlreadyTerminal(state)),
        }
    }

    async fn handle_reuse(&self, session: &Session) -> SessionError {
        let user_id = session.user_id;
        warn!(
            user_id = %user_id,
            session_id = %session.id,
            "Consumed refresh token presented again, revoking all sessions"
        );
        record_refresh_reuse();

        let revoked = match self.revoke_all_for_user(user_id).await {
            Ok(revoked) => revoked,
            Err(e) => return e,
        };

        self.events
            .publish(
                DomainEvent::new(EventType::RefreshReuseDetected, self.clock.now())
                    .with_user(user_id)
                    .with_payload(&SessionsRevokedPayload {
                        count: revoked,
                        reason: "refresh_token_reuse".to_string(),
                    }),
            )
            .await;

        SessionError::Reused { user_id, revoked }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::refresh::RefreshSecret;
    use crate::clock::ManualClock;
    use crate::events::RecordingSink;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    struct Fixture {
        registry: Arc<SessionRegistry>,
        clock: ManualClock,
        sink: RecordingSink,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::starting_now();
        let sink = RecordingSink::new();
        let registry = SessionRegistry::new(
            Arc::new(MemoryStore::new()),
            3600,
            Duration::from_secs(5),
            Arc::new(clock.clone()),
            EventPublisher::new(Arc::new(sink.clone()), Duration::from_secs(1)),
        );
        Fixture {
            registry: Arc::new(registry),
            clock,
            sink,
        }
    }

    async fn open(registry: &SessionRegistry, user_id: Uuid) -> (RefreshSecret, Session) {
        let secret = RefreshSecret::generate();
        let session = registry.create(user_id, secret.digest()).await.unwrap();
        (secret, session)
    }

    #[tokio::test]
    async fn test_create_and_resolve() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let (secret, session) = open(&f.registry, user_id).await;

        assert_eq!(session.state(), SessionState::Active);
        assert_ne!(session.token_hash, secret.as_str());

        let resolved = f.registry.resolve(secret.as_str()).await.unwrap();
        assert_eq!(resolved.id, session.id);
    }

    #[tokio::test]
    async fn test_unknown_and_garbage_tokens() {
        let f = fixture();
        let unknown = RefreshSecret::generate();
        assert_eq!(
            f.registry.resolve(unknown.as_str()).await,
            Err(SessionError::NotFound)
        );
        assert_eq!(
            f.registry.resolve("not-a-token").await,
            Err(SessionError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_expired_session() {
        let f = fixture();
        let (secret, _) = open(&f.registry, Uuid::new_v4()).await;

        f.clock.advance(ChronoDuration::seconds(3601));
        assert_eq!(
            f.registry.resolve(secret.as_str()).await,
            Err(SessionError::Expired)
        );
    }

    #[tokio::test]
    async fn test_mark_consumed_once() {
        let f = fixture();
        let (_, session) = open(&f.registry, Uuid::new_v4()).await;

        assert_eq!(f.registry.mark_consumed(session.id).await, Ok(()));
        assert_eq!(
            f.registry.mark_consumed(session.id).await,
            Err(SessionError::AlreadyTerminal(SessionState::Consumed))
        );
        assert_eq!(
            f.registry.mark_consumed(Uuid::new_v4()).await,
            Err(SessionError::NotFound)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mark_consumed_single_winner() {
        let f = fixture();
        let (_, session) = open(&f.registry, Uuid::new_v4()).await;

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let registry = Arc::clone(&f.registry);
                tokio::spawn(async move { registry.mark_consumed(session.id).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => winners += 1,
                Err(SessionError::AlreadyTerminal(_)) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let f = fixture();
        let (secret, session) = open(&f.registry, Uuid::new_v4()).await;

        assert_eq!(f.registry.revoke(session.id).await, Ok(()));
        assert_eq!(f.registry.revoke(session.id).await, Ok(()));
        assert_eq!(
            f.registry.revoke(Uuid::new_v4()).await,
            Err(SessionError::NotFound)
        );
        assert_eq!(
            f.registry.resolve(secret.as_str()).await,
            Err(SessionError::Revoked)
        );
    }

    #[tokio::test]
    async fn test_rotation_then_reuse_revokes_everything() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let (old_secret, old) = open(&f.registry, user_id).await;
        let (other_secret, _) = open(&f.registry, user_id).await;

        let new_secret = RefreshSecret::generate();
        let new = f.registry.rotate(&old, new_secret.digest()).await.unwrap();
        assert_eq!(
            f.registry.resolve(new_secret.as_str()).await.unwrap().id,
            new.id
        );

        let err = f.registry.resolve(old_secret.as_str()).await.unwrap_err();
        assert_eq!(err, SessionError::Reused { user_id, revoked: 2 });

        assert_eq!(
            f.registry.resolve(new_secret.as_str()).await,
            Err(SessionError::Revoked)
        );
        assert_eq!(
            f.registry.resolve(other_secret.as_str()).await,
            Err(SessionError::Revoked)
        );

        let events = f.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::RefreshReuseDetected);
        assert_eq!(events[0].user_id, Some(user_id));
    }

    #[tokio::test]
    async fn test_rotate_lost_race() {
        let f = fixture();
        let (_, old) = open(&f.registry, Uuid::new_v4()).await;

        f.registry
            .rotate(&old, RefreshSecret::generate().digest())
            .await
            .unwrap();
        assert_eq!(
            f.registry
                .rotate(&old, RefreshSecret::generate().digest())
                .await,
            Err(SessionError::AlreadyTerminal(SessionState::Consumed))
        );
    }

    #[test]
    fn test_errors_collapse_to_unauthorized() {
        assert_eq!(AuthError::from(SessionError::Expired), AuthError::Unauthorized);
        assert_eq!(AuthError::from(SessionError::Revoked), AuthError::Unauthorized);
        assert!(AuthError::from(SessionError::Store(StoreError::Unavailable("x".into())))
            .is_retryable());
    }
}
