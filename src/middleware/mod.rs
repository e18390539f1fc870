//! Request middleware and extractors.

pub mod auth;
pub mod metrics;
pub mod request_id;

pub use auth::BearerToken;
pub use metrics::metrics_middleware;
pub use request_id::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
