//! OpenAPI documentation served through Swagger UI.

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::error::ApiError;
use crate::handlers::auth::{
    AuthResponse, ChangePasswordRequest, LoginRequest, RefreshRequest, RefreshResponse,
    RegisterRequest, RegisterResponse, SessionsRevokedResponse, UserResponse, VerifyRequest,
    VerifyResponse,
};
use crate::handlers::health::{
    ComponentStatus, HealthResponse, ReadinessChecks, ReadinessResponse,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Auth Service API",
        version = "1.0.0",
        description = "Email/password authentication with short-lived access tokens and rotating refresh tokens.\n\n\
        ## Tokens\n\
        - Access tokens are EdDSA-signed JWTs; send them as `Authorization: Bearer <token>`\n\
        - Refresh tokens are opaque and single-use; every refresh returns a new one\n\
        - Presenting an already-used refresh token revokes every session of its owner\n\n\
        ## Errors\n\
        All credential and token failures return the same 401 body. A 503 means the request may be retried.",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "/", description = "Current server")
    ),
    tags(
        (name = "Health", description = "Liveness and readiness"),
        (name = "Authentication", description = "Registration, login, refresh and logout")
    ),
    paths(
        crate::handlers::health::health_check_simple,
        crate::handlers::health::health_check,
        crate::handlers::health::ready_check,
        crate::handlers::health::live_check,

        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::auth::refresh_token,
        crate::handlers::auth::logout,
        crate::handlers::auth::verify_token,
        crate::handlers::auth::change_password,
        crate::handlers::auth::logout_all,
    ),
    components(
        schemas(
            RegisterRequest,
            RegisterResponse,
            LoginRequest,
            AuthResponse,
            RefreshRequest,
            RefreshResponse,
            VerifyRequest,
            VerifyResponse,
            ChangePasswordRequest,
            SessionsRevokedResponse,
            UserResponse,
            ApiError,
            HealthResponse,
            ReadinessResponse,
            ReadinessChecks,
            ComponentStatus,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("Access token returned by /auth/login or /auth/refresh"))
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_router() -> Router {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .into()
}
