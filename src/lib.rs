//! Authentication service: credential store, token issuer and session registry
//! behind a gRPC and HTTP facade.

pub mod auth;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod grpc;
pub mod handlers;
pub mod helpers;
pub mod middleware;
pub mod models;
pub mod openapi;
pub mod schema;
pub mod service;
pub mod sessions;
pub mod store;
pub mod telemetry;
pub mod tokens;

use axum::{
    http::StatusCode,
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use deadpool_redis::{Config as RedisPoolConfig, Pool as RedisPool, Runtime};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

use auth::jwt::{JwtKeys, KeyError};
use clock::{SharedClock, SystemClock};
use config::RedisConfig;
use credentials::CredentialStore;
use events::{EventPublisher, LogSink, RedisStreamSink, SharedEventSink};
use middleware::{metrics_middleware, request_id_middleware};
use service::AuthFacade;
use sessions::SessionRegistry;
use store::{
    MemoryStore, PgStore, SharedSessionRepository, SharedUserRepository, StoreError,
};
use telemetry::MetricsState;
use tokens::TokenIssuer;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to open storage: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    SigningKey(#[from] KeyError),

    #[error("JWT_PRIVATE_KEY must be set in production")]
    MissingSigningKey,
}

#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<AuthFacade>,
    pub users: SharedUserRepository,
    pub storage_backend: &'static str,
    pub redis_pool: Option<RedisPool>,
    pub metrics: MetricsState,
    pub operation_timeout: Duration,
}

/// Storage chosen at startup: Postgres when `DATABASE_URL` is set, memory otherwise.
pub struct Storage {
    pub users: SharedUserRepository,
    pub sessions: SharedSessionRepository,
    pub backend: &'static str,
}

impl Storage {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            users: store.clone(),
            sessions: store,
            backend: "memory",
        }
    }

    pub fn from_config(config: &config::Config) -> Result<Self, StoreError> {
        let Some(url) = &config.database.url else {
            warn!("DATABASE_URL not set; users and sessions are kept in memory");
            return Ok(Self::memory());
        };

        info!(
            database_url = %url.split('@').next_back().unwrap_or("***"),
            max_connections = config.database.max_connections,
            "Connecting to database"
        );

        let store = Arc::new(PgStore::connect(url, &config.database)?);
        Ok(Self {
            users: store.clone(),
            sessions: store,
            backend: "postgres",
        })
    }
}

impl AppState {
    pub fn new(config: &config::Config, redis_pool: Option<RedisPool>) -> Result<Self, StartupError> {
        let keys = signing_keys(config)?;
        let storage = Storage::from_config(config)?;
        let events = event_publisher(config, redis_pool.as_ref());

        Ok(Self::assemble(
            config,
            keys,
            storage,
            events,
            Arc::new(SystemClock),
            redis_pool,
        ))
    }

    /// Memory-backed state with an ephemeral signing key and log-only events.
    pub fn in_memory(config: &config::Config) -> Self {
        let events = event_publisher(config, None);
        Self::assemble(
            config,
            configure_keys(JwtKeys::ephemeral(), config),
            Storage::memory(),
            events,
            Arc::new(SystemClock),
            None,
        )
    }

    /// Wires the credential store, session registry, token issuer and facade together.
    pub fn assemble(
        config: &config::Config,
        keys: JwtKeys,
        storage: Storage,
        events: EventPublisher,
        clock: SharedClock,
        redis_pool: Option<RedisPool>,
    ) -> Self {
        let timeout = config.security.operation_timeout();

        let sessions = Arc::new(SessionRegistry::new(
            storage.sessions,
            config.jwt.refresh_token_expiry_secs,
            timeout,
            clock.clone(),
            events.clone(),
        ));

        let tokens = Arc::new(TokenIssuer::new(
            keys,
            config.jwt.access_token_expiry_secs,
            clock.clone(),
            sessions.clone(),
            storage.users.clone(),
            timeout,
        ));

        let credentials = Arc::new(CredentialStore::from_config(
            storage.users.clone(),
            &config.security,
            clock.clone(),
        ));

        let facade = Arc::new(AuthFacade::new(
            credentials,
            tokens,
            sessions,
            events,
            clock,
        ));

        Self {
            facade,
            users: storage.users,
            storage_backend: storage.backend,
            redis_pool,
            metrics: MetricsState::new(config.telemetry.metrics_enabled),
            operation_timeout: timeout,
        }
    }
}

/// Loads the signing key. Only non-production environments fall back to an ephemeral key.
pub fn signing_keys(config: &config::Config) -> Result<JwtKeys, StartupError> {
    let keys = match &config.jwt.private_key {
        Some(key) => JwtKeys::from_base64(key)?,
        None if config.server.environment.is_production() => {
            return Err(StartupError::MissingSigningKey)
        }
        None => {
            warn!("JWT_PRIVATE_KEY not set; tokens will not survive a restart");
            JwtKeys::ephemeral()
        }
    };
    Ok(configure_keys(keys, config))
}

fn configure_keys(keys: JwtKeys, config: &config::Config) -> JwtKeys {
    keys.with_issuer(config.jwt.issuer.clone())
        .with_audience(config.jwt.audience.clone())
        .with_leeway(config.jwt.leeway_secs)
}

pub fn event_publisher(config: &config::Config, redis_pool: Option<&RedisPool>) -> EventPublisher {
    if !config.events.enabled {
        return EventPublisher::disabled();
    }

    let sink: SharedEventSink = match redis_pool {
        Some(pool) => Arc::new(RedisStreamSink::new(
            pool.clone(),
            config.events.stream_name.clone(),
        )),
        None => Arc::new(LogSink),
    };
    EventPublisher::new(sink, config.security.operation_timeout())
}

pub fn create_redis_pool(config: &RedisConfig) -> Option<RedisPool> {
    let url = config.url.as_ref()?;

    let timeout = Duration::from_secs(config.connection_timeout_secs);
    let pool = RedisPoolConfig::from_url(url).builder().ok().and_then(|b| {
        b.max_size(config.pool_size)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .ok()
    });

    match &pool {
        Some(_) => {
            info!(redis_url = %url.split('@').next_back().unwrap_or("***"), "Redis pool created")
        }
        None => warn!("Failed to create Redis pool; events fall back to the log"),
    }

    pool
}

pub fn create_router(state: AppState, config: &config::Config) -> Router {
    let cors = build_cors_layer(config);
    let body_limit = RequestBodyLimitLayer::new(config.server.max_body_size);

    #[allow(deprecated)]
    let timeout = TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let metrics_state = state.metrics.clone();
    let health_routes = Router::new()
        .route("/health", get(handlers::health::health_check_simple))
        .route("/health/status", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::ready_check))
        .route("/health/live", get(handlers::health::live_check))
        .route(
            "/metrics",
            get(telemetry::metrics::metrics_handler).with_state(metrics_state),
        )
        .with_state(state.clone());

    let auth_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh_token))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/verify", post(handlers::auth::verify_token))
        .route("/auth/password", post(handlers::auth::change_password))
        .route("/auth/logout-all", post(handlers::auth::logout_all))
        .with_state(state);

    Router::new()
        .merge(openapi::swagger_router())
        .merge(health_routes)
        .merge(auth_routes)
        .fallback(fallback_handler)
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(trace_layer)
        .layer(timeout)
        .layer(body_limit)
        .layer(cors)
}

async fn fallback_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(error::ApiError::new("Not found", "NOT_FOUND")),
    )
}

fn build_cors_layer(config: &config::Config) -> CorsLayer {
    use axum::http::header::HeaderName;
    use axum::http::Method;

    let methods: Vec<Method> = config
        .cors
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();

    let headers: Vec<HeaderName> = config
        .cors
        .allowed_headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();

    let is_wildcard_origin = config.cors.allowed_origins.is_empty()
        || config.cors.allowed_origins.iter().any(|o| o == "*");

    let cors = if is_wildcard_origin {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<_> = config
            .cors
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    cors.allow_methods(methods)
        .allow_headers(headers)
        .max_age(Duration::from_secs(config.cors.max_age_secs))
}

pub fn init_tracing(config: &config::Config) {
    telemetry::init_telemetry(config);
}

/// Drives the HTTP and gRPC servers until both have drained.
///
/// A server that stops first, whether from the shutdown signal or an error,
/// sends on `shutdown` so the other one stops too.
pub async fn run_servers<H, G, HE, GE>(http: H, grpc: Option<G>, shutdown: broadcast::Sender<()>)
where
    H: Future<Output = Result<(), HE>>,
    G: Future<Output = Result<(), GE>>,
    HE: Display,
    GE: Display,
{
    let http = {
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = http.await {
                tracing::error!(error = %e, "HTTP server error");
            }
            let _ = shutdown.send(());
        }
    };

    let grpc = async move {
        let Some(server) = grpc else {
            return;
        };
        if let Err(e) = server.await {
            tracing::error!(error = %e, "gRPC server error");
        }
        let _ = shutdown.send(());
    };

    tokio::join!(http, grpc);
}

pub use config::Config;
pub use error::{AuthError, AuthResult};
pub use telemetry::tracing::shutdown_telemetry;
