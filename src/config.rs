//! Configuration management.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub grpc: GrpcConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub security: SecurityConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
    pub redis: RedisConfig,
    pub telemetry: TelemetryConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub request_timeout_secs: u64,
    pub max_body_size: usize,
}

#[derive(Debug, Clone)]
pub struct GrpcConfig {
    pub enabled: bool,
    pub port: u16,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

impl GrpcConfig {
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert_path.is_some() && self.tls_key_path.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// `url: None` selects the in-memory store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    /// Server-side `statement_timeout` applied to every pooled connection.
    pub statement_timeout_ms: u64,
}

#[derive(Clone)]
pub struct JwtConfig {
    pub private_key: Option<String>,
    pub access_token_expiry_secs: i64,
    pub refresh_token_expiry_secs: i64,
    pub leeway_secs: u64,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("access_token_expiry_secs", &self.access_token_expiry_secs)
            .field("refresh_token_expiry_secs", &self.refresh_token_expiry_secs)
            .field("leeway_secs", &self.leeway_secs)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub min_password_length: usize,
    pub require_password_complexity: bool,
    pub password_hash_cost: u32,
    pub operation_timeout_ms: u64,
}

impl SecurityConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub max_age_secs: u64,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub pool_size: usize,
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct EventsConfig {
    pub enabled: bool,
    pub stream_name: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let environment = Self::parse_environment();

        Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("HTTP_PORT", "8081"),
                environment: environment.clone(),
                request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS", "30"),
                max_body_size: parse_var("MAX_BODY_SIZE", "65536"),
            },
            grpc: Self::parse_grpc_config(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
                max_connections: parse_var("DATABASE_MAX_CONNECTIONS", "10"),
                min_connections: parse_var("DATABASE_MIN_CONNECTIONS", "2"),
                connection_timeout_secs: parse_var("DATABASE_CONNECTION_TIMEOUT_SECS", "5"),
                idle_timeout_secs: parse_var("DATABASE_IDLE_TIMEOUT_SECS", "600"),
                statement_timeout_ms: parse_var("DATABASE_STATEMENT_TIMEOUT_MS", "5000"),
            },
            jwt: Self::parse_jwt_config(),
            security: Self::parse_security_config(&environment),
            cors: Self::parse_cors_config(&environment),
            logging: Self::parse_logging_config(&environment),
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok(),
                pool_size: parse_var("REDIS_POOL_SIZE", "10"),
                connection_timeout_secs: parse_var("REDIS_CONNECTION_TIMEOUT_SECS", "5"),
            },
            telemetry: TelemetryConfig {
                otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
                service_name: env::var("OTEL_SERVICE_NAME")
                    .unwrap_or_else(|_| "auth-service".to_string()),
                metrics_enabled: parse_bool("METRICS_ENABLED", true),
            },
            events: EventsConfig {
                enabled: parse_bool("EVENTS_ENABLED", true),
                stream_name: env::var("EVENTS_STREAM_NAME")
                    .unwrap_or_else(|_| "auth:events".to_string()),
            },
        }
    }

    fn parse_environment() -> Environment {
        match env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            "staging" | "stage" => Environment::Staging,
            _ => Environment::Development,
        }
    }

    fn parse_grpc_config() -> GrpcConfig {
        GrpcConfig {
            enabled: parse_bool("GRPC_ENABLED", true),
            port: parse_var("GRPC_PORT", "8001"),
            tls_cert_path: env::var("GRPC_TLS_CERT_PATH").ok(),
            tls_key_path: env::var("GRPC_TLS_KEY_PATH").ok(),
        }
    }

    fn parse_jwt_config() -> JwtConfig {
        JwtConfig {
            private_key: env::var("JWT_PRIVATE_KEY").ok().filter(|k| !k.is_empty()),
            access_token_expiry_secs: parse_var("JWT_ACCESS_TOKEN_EXPIRY_SECS", "3600"),
            refresh_token_expiry_secs: parse_var("JWT_REFRESH_TOKEN_EXPIRY_SECS", "604800"),
            leeway_secs: parse_var("JWT_LEEWAY_SECS", "0"),
            issuer: env::var("JWT_ISSUER").ok(),
            audience: env::var("JWT_AUDIENCE").ok(),
        }
    }

    fn parse_security_config(environment: &Environment) -> SecurityConfig {
        let is_prod = environment.is_production();

        SecurityConfig {
            min_password_length: parse_var("MIN_PASSWORD_LENGTH", "8"),
            require_password_complexity: parse_bool("REQUIRE_PASSWORD_COMPLEXITY", is_prod),
            password_hash_cost: parse_var("PASSWORD_HASH_COST", "12"),
            operation_timeout_ms: parse_var("OPERATION_TIMEOUT_MS", "5000"),
        }
    }

    fn parse_cors_config(environment: &Environment) -> CorsConfig {
        let default_origins = if environment.is_development() {
            vec!["*".to_string()]
        } else {
            vec![]
        };

        CorsConfig {
            allowed_origins: parse_list("CORS_ALLOWED_ORIGINS").unwrap_or(default_origins),
            allowed_methods: parse_list("CORS_ALLOWED_METHODS").unwrap_or_else(|| {
                vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()]
            }),
            allowed_headers: parse_list("CORS_ALLOWED_HEADERS").unwrap_or_else(|| {
                vec![
                    "Content-Type".to_string(),
                    "Authorization".to_string(),
                    "X-Request-ID".to_string(),
                ]
            }),
            max_age_secs: parse_var("CORS_MAX_AGE_SECS", "3600"),
        }
    }

    fn parse_logging_config(environment: &Environment) -> LoggingConfig {
        let is_dev = environment.is_development();

        LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| {
                if is_dev {
                    "debug".to_string()
                } else {
                    "info".to_string()
                }
            }),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| if is_dev { "pretty" } else { "json" }.to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        }
    }

    pub fn validate_for_production(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.server.environment.is_production() {
            if self.jwt.private_key.is_none() {
                issues.push("JWT_PRIVATE_KEY must be set in production".to_string());
            }

            if self.jwt.access_token_expiry_secs > 3600 {
                issues
                    .push("Access token expiry should not exceed 1 hour in production".to_string());
            }

            if self.database.url.is_none() {
                issues.push(
                    "DATABASE_URL is not set; users and sessions are kept in memory".to_string(),
                );
            }

            if self.security.min_password_length < 8 {
                issues.push("Minimum password length should be at least 8".to_string());
            }

            if self.security.password_hash_cost < 14 {
                issues.push("Password hash cost below 14 is weak for production".to_string());
            }

            if self.cors.allowed_origins.contains(&"*".to_string()) {
                issues.push("CORS should not allow all origins (*) in production".to_string());
            }
        }

        issues
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn grpc_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.grpc.port)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> T {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or_else(|_| panic!("{} must be a valid value", name))
}

fn parse_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v.parse().unwrap_or(default))
        .unwrap_or(default)
}

fn parse_list(name: &str) -> Option<Vec<String>> {
    env::var(name)
        .ok()
        .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
}

impl Config {
    pub fn default_for_testing() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                environment: Environment::Development,
                request_timeout_secs: 30,
                max_body_size: 65536,
            },
            grpc: GrpcConfig {
                enabled: false,
                port: 0,
                tls_cert_path: None,
                tls_key_path: None,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
                min_connections: 1,
                connection_timeout_secs: 5,
                idle_timeout_secs: 300,
                statement_timeout_ms: 5000,
            },
            jwt: JwtConfig {
                private_key: None,
                access_token_expiry_secs: 3600,
                refresh_token_expiry_secs: 604800,
                leeway_secs: 0,
                issuer: Some("auth-service-test".to_string()),
                audience: None,
            },
            security: SecurityConfig {
                min_password_length: 8,
                require_password_complexity: false,
                password_hash_cost: 4,
                operation_timeout_ms: 5000,
            },
            cors: CorsConfig {
                allowed_origins: vec!["*".to_string()],
                allowed_methods: vec!["GET".to_string(), "POST".to_string()],
                allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
                max_age_secs: 3600,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: LogFormat::Pretty,
            },
            redis: RedisConfig {
                url: None,
                pool_size: 5,
                connection_timeout_secs: 5,
            },
            telemetry: TelemetryConfig {
                otlp_endpoint: None,
                service_name: "auth-service-test".to_string(),
                metrics_enabled: false,
            },
            events: EventsConfig {
                enabled: true,
                stream_name: "auth:events:test".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_environment_parsing() {
        assert!(Environment::Production.is_production());
        assert!(!Environment::Production.is_development());
        assert!(Environment::Development.is_development());
        assert!(!Environment::Development.is_production());
    }

    #[test]
    fn test_production_validation() {
        let mut config = Config::default_for_testing();
        config.server.environment = Environment::Production;
        config.jwt.access_token_expiry_secs = 7200;
        config.security.min_password_length = 6;

        let issues = config.validate_for_production();
        assert!(issues.iter().any(|i| i.contains("JWT_PRIVATE_KEY")));
        assert!(issues.iter().any(|i| i.contains("DATABASE_URL")));
        assert!(issues.iter().any(|i| i.contains("CORS")));
        assert!(issues.iter().any(|i| i.contains("1 hour")));
        assert!(issues.iter().any(|i| i.contains("at least 8")));
    }

    #[test]
    fn test_development_has_no_production_issues() {
        let config = Config::default_for_testing();
        assert!(config.validate_for_production().is_empty());
    }

    #[test]
    fn test_grpc_tls_enabled() {
        let config = GrpcConfig {
            enabled: true,
            port: 8001,
            tls_cert_path: Some("/path/to/cert.pem".to_string()),
            tls_key_path: Some("/path/to/key.pem".to_string()),
        };
        assert!(config.tls_enabled());

        let config_no_tls = GrpcConfig {
            tls_key_path: None,
            ..config
        };
        assert!(!config_no_tls.tls_enabled());
    }

    #[test]
    fn test_jwt_config_debug_redacts_key() {
        let mut config = Config::default_for_testing();
        config.jwt.private_key = Some("c2VjcmV0".to_string());
        let rendered = format!("{:?}", config.jwt);
        assert!(!rendered.contains("c2VjcmV0"));
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        for var in [
            "HTTP_PORT",
            "GRPC_PORT",
            "DATABASE_URL",
            "JWT_ACCESS_TOKEN_EXPIRY_SECS",
            "OPERATION_TIMEOUT_MS",
            "ENVIRONMENT",
        ] {
            std::env::remove_var(var);
        }

        let config = Config::from_env();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.grpc.port, 8001);
        assert!(config.database.url.is_none());
        assert_eq!(config.jwt.access_token_expiry_secs, 3600);
        assert_eq!(config.security.operation_timeout(), Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("GRPC_PORT", "9443");
        std::env::set_var("JWT_ACCESS_TOKEN_EXPIRY_SECS", "900");
        std::env::set_var("DATABASE_URL", "");

        let config = Config::from_env();
        assert_eq!(config.grpc.port, 9443);
        assert_eq!(config.jwt.access_token_expiry_secs, 900);
        assert!(config.database.url.is_none());

        std::env::remove_var("GRPC_PORT");
        std::env::remove_var("JWT_ACCESS_TOKEN_EXPIRY_SECS");
        std::env::remove_var("DATABASE_URL");
    }
}
