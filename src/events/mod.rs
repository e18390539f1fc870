//! Domain events emitted after successful state changes.

pub mod publisher;
pub mod types;

pub use publisher::{
    EventPublisher, EventSink, LogSink, PublishError, RecordingSink, RedisStreamSink,
    SharedEventSink,
};
pub use types::*;
