//! Shared harness for integration tests.
//!
//! Every `TestApp` runs its own HTTP and gRPC servers on ephemeral ports over
//! a fresh in-memory store, so tests never share users or sessions.

#![allow(dead_code)]

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use uuid::Uuid;

use auth_service::{
    auth::jwt::JwtKeys,
    clock::{ManualClock, SharedClock},
    create_router,
    events::{DomainEvent, EventPublisher, EventType, RecordingSink},
    grpc::{
        proto::{auth_service_client::AuthServiceClient, auth_service_server::AuthServiceServer},
        AuthGrpcService,
    },
    AppState, Config, Storage,
};

pub const PASSWORD: &str = "Secretp@ss1";

/// A running application with handles for steering time and inspecting events.
pub struct TestApp {
    pub client: Client,
    pub base_url: String,
    pub grpc_addr: SocketAddr,
    pub clock: ManualClock,
    pub events: RecordingSink,
    pub state: AppState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(Config::default_for_testing()).await
    }

    pub async fn spawn_with(config: Config) -> Self {
        let clock = ManualClock::starting_now();
        let events = RecordingSink::new();
        let shared_clock: SharedClock = Arc::new(clock.clone());

        let state = AppState::assemble(
            &config,
            JwtKeys::ephemeral().with_issuer(config.jwt.issuer.clone()),
            Storage::memory(),
            EventPublisher::new(Arc::new(events.clone()), Duration::from_secs(1)),
            shared_clock,
            None,
        );

        let app = create_router(state.clone(), &config);
        let http_listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind HTTP listener");
        let http_addr = http_listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                http_listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        let grpc_listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind gRPC listener");
        let grpc_addr = grpc_listener.local_addr().unwrap();
        let grpc_service = AuthServiceServer::new(AuthGrpcService::new(state.facade.clone()));
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(grpc_service)
                .serve_with_incoming(TcpListenerStream::new(grpc_listener))
                .await
                .unwrap();
        });

        Self {
            client: Client::new(),
            base_url: format!("http://{}", http_addr),
            grpc_addr,
            clock,
            events,
            state,
        }
    }

    pub fn unique_email() -> String {
        format!("test_{}@example.com", Uuid::new_v4())
    }

    pub async fn grpc_client(&self) -> AuthServiceClient<tonic::transport::Channel> {
        let endpoint = format!("http://{}", self.grpc_addr);
        for _ in 0..50 {
            if let Ok(client) = AuthServiceClient::connect(endpoint.clone()).await {
                return client;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("gRPC server did not come up at {}", endpoint);
    }

    pub async fn register(&self, email: &str, password: &str) -> reqwest::Response {
        self.post_public(
            "/auth/register",
            json!({ "email": email, "password": password }),
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.post_public("/auth/login", json!({ "email": email, "password": password }))
            .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> reqwest::Response {
        self.post_public("/auth/refresh", json!({ "refresh_token": refresh_token }))
            .await
    }

    pub async fn logout(&self, refresh_token: &str) -> reqwest::Response {
        self.post_public("/auth/logout", json!({ "refresh_token": refresh_token }))
            .await
    }

    /// Registers a fresh user and logs in.
    pub async fn signed_in_user(&self) -> AuthResponse {
        let email = Self::unique_email();
        let response = self.register(&email, PASSWORD).await;
        assert_eq!(response.status().as_u16(), 201, "registration failed");

        let response = self.login(&email, PASSWORD).await;
        assert_eq!(response.status().as_u16(), 200, "login failed");
        response.json().await.expect("Failed to parse login response")
    }

    pub async fn get_public(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Failed to send GET request")
    }

    pub async fn post_public(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .expect("Failed to send POST request")
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Failed to send POST request")
    }

    pub fn recorded(&self) -> Vec<DomainEvent> {
        self.events.events()
    }

    pub fn recorded_types(&self) -> Vec<EventType> {
        self.recorded().into_iter().map(|e| e.event_type).collect()
    }
}

#[macro_export]
macro_rules! assert_status {
    ($response:expr, $expected:expr) => {
        assert_eq!(
            $response.status().as_u16(),
            $expected,
            "Expected status {}, got {}",
            $expected,
            $response.status()
        );
    };
}

/// Every credential or token failure carries the same body.
pub async fn assert_unauthorized(response: reqwest::Response) {
    assert_status!(response, 401);
    let body: Value = response.json().await.expect("Failed to parse error body");
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert_eq!(body["error"], auth_service::error::UNAUTHORIZED_MESSAGE);
}
