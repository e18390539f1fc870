//! Domain event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    UserCreated,
    LoginSucceeded,
    LoginFailed,
    TokenRefreshed,
    LogoutCompleted,
    SessionsRevoked,
    PasswordChanged,
    RefreshReuseDetected,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserCreated => "user.created",
            EventType::LoginSucceeded => "auth.login.success",
            EventType::LoginFailed => "auth.login.failed",
            EventType::TokenRefreshed => "auth.token.refreshed",
            EventType::LogoutCompleted => "auth.logout",
            EventType::SessionsRevoked => "auth.sessions.revoked",
            EventType::PasswordChanged => "auth.password.changed",
            EventType::RefreshReuseDetected => "auth.refresh.reuse_detected",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub event_type: EventType,
    pub user_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(event_type: EventType, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            user_id: None,
            payload: serde_json::Value::Null,
            occurred_at,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Serialization failures leave the payload as `null`.
    pub fn with_payload<P: Serialize>(mut self, payload: &P) -> Self {
        self.payload = serde_json::to_value(payload).unwrap_or_default();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreatedPayload {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginFailedPayload {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsRevokedPayload {
    pub count: usize,
    pub reason: String,
}
