//! Event sinks: Redis Streams when configured, structured logs otherwise.

use async_trait::async_trait;
use deadpool_redis::Pool as RedisPool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::types::DomainEvent;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Publish timed out after {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}

pub type SharedEventSink = Arc<dyn EventSink>;

/// Appends events to a Redis stream with `XADD`.
pub struct RedisStreamSink {
    pool: RedisPool,
    stream_name: String,
}

impl RedisStreamSink {
    pub fn new(pool: RedisPool, stream_name: impl Into<String>) -> Self {
        Self {
            pool,
            stream_name: stream_name.into(),
        }
    }
}

#[async_trait]
impl EventSink for RedisStreamSink {
    #[instrument(skip(self, event), fields(event_type = %event.event_type, event_id = %event.id))]
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        use redis::AsyncCommands;

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| PublishError::Redis(e.to_string()))?;

        let data = serde_json::to_string(event).map_err(|e| PublishError::Redis(e.to_string()))?;

        let _: String = conn
            .xadd(
                &self.stream_name,
                "*",
                &[("event_type", event.event_type.as_str()), ("data", &data)],
            )
            .await
            .map_err(|e| PublishError::Redis(e.to_string()))?;

        debug!(stream = %self.stream_name, "Published event to Redis Stream");
        Ok(())
    }
}

/// Writes events to the log. Used when no broker is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            user_id = ?event.user_id,
            "Domain event"
        );
        Ok(())
    }
}

/// Keeps published events in memory for inspection.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}

/// Best-effort delivery: failures and timeouts are logged, never returned.
#[derive(Clone)]
pub struct EventPublisher {
    sink: SharedEventSink,
    enabled: bool,
    timeout: Duration,
}

impl EventPublisher {
    pub fn new(sink: SharedEventSink, timeout: Duration) -> Self {
        Self {
            sink,
            enabled: true,
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self {
            sink: Arc::new(LogSink),
            enabled: false,
            timeout: Duration::ZERO,
        }
    }

    pub async fn publish(&self, event: DomainEvent) {
        if !self.enabled {
            return;
        }

        let result = tokio::time::timeout(self.timeout, self.sink.publish(&event))
            .await
            .unwrap_or(Err(PublishError::TimedOut(self.timeout)));

        if let Err(e) = result {
            warn!(
                error = %e,
                event_type = %event.event_type,
                event_id = %event.id,
                "Failed to publish event"
            );
        }
    }
}
