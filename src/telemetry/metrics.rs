//! Prometheus metrics for auth operations and HTTP latency.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::AuthError;

static PROMETHEUS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

#[derive(Clone)]
pub struct MetricsState {
    handle: Option<PrometheusHandle>,
}

impl MetricsState {
    pub fn new(enabled: bool) -> Self {
        if !enabled {
            return Self::disabled();
        }

        let handle = PROMETHEUS_HANDLE.get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| tracing::error!(error = %e, "Failed to install Prometheus recorder"))
                .ok()
        });

        Self {
            handle: handle.clone(),
        }
    }

    pub fn disabled() -> Self {
        Self { handle: None }
    }

    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(|h| h.render())
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }
}

pub async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.render() {
        Some(metrics) => (StatusCode::OK, metrics),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not enabled".to_string(),
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    Unauthorized,
    InvalidInput,
    Conflict,
    Unavailable,
    Error,
}

impl AuthOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            AuthOutcome::Success => "success",
            AuthOutcome::Unauthorized => "unauthorized",
            AuthOutcome::InvalidInput => "invalid_input",
            AuthOutcome::Conflict => "conflict",
            AuthOutcome::Unavailable => "unavailable",
            AuthOutcome::Error => "error",
        }
    }

    pub fn of<T>(result: &Result<T, AuthError>) -> Self {
        match result {
            Ok(_) => AuthOutcome::Success,
            Err(AuthError::Unauthorized) => AuthOutcome::Unauthorized,
            Err(AuthError::InvalidInput(_)) => AuthOutcome::InvalidInput,
            Err(AuthError::AlreadyExists) => AuthOutcome::Conflict,
            Err(AuthError::Transient(_)) => AuthOutcome::Unavailable,
            Err(AuthError::Internal(_)) => AuthOutcome::Error,
        }
    }
}

pub fn record_auth_attempt(action: &'static str, outcome: AuthOutcome) {
    counter!(
        "auth_attempts_total",
        "action" => action,
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_refresh_reuse() {
    counter!("refresh_token_reuse_total").increment(1);
}

pub fn record_request_latency(method: &str, path: &str, status: u16, duration: Duration) {
    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());
}
