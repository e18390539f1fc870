use auth_service::{
    create_redis_pool, create_router,
    grpc::{proto::auth_service_server::AuthServiceServer, AuthGrpcService},
    init_tracing, run_servers, shutdown_telemetry, AppState, Config,
};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tonic::transport::{Identity, Server as TonicServer, ServerTlsConfig};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    init_tracing(&config);

    info!(
        service = "auth-service",
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.server.environment,
        "Starting server"
    );

    for issue in config.validate_for_production() {
        warn!(issue = %issue, "Configuration warning");
    }

    let redis_pool = create_redis_pool(&config.redis);
    let state = AppState::new(&config, redis_pool).unwrap_or_else(|e| {
        error!(error = %e, "Failed to initialize service");
        std::process::exit(1);
    });

    info!(storage = state.storage_backend, "Service initialized");

    let app = create_router(state.clone(), &config);

    let http_addr = config.http_addr();
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, address = %http_addr, "Failed to bind HTTP server");
            std::process::exit(1);
        });

    info!(
        http_address = %http_addr,
        docs_url = %format!("http://{}/swagger-ui", http_addr),
        "HTTP server ready"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_server = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
        }
    };

    let grpc_server = if config.grpc.enabled {
        let grpc_addr: SocketAddr = config.grpc_addr().parse().unwrap_or_else(|e| {
            error!(error = %e, "Invalid gRPC address");
            std::process::exit(1);
        });

        let tls_config = grpc_tls_config(&config).unwrap_or_else(|e| {
            error!(error = %e, "Failed to load gRPC TLS identity");
            std::process::exit(1);
        });

        let mut builder = TonicServer::builder();
        if let Some(tls) = tls_config {
            builder = builder.tls_config(tls).unwrap_or_else(|e| {
                error!(error = %e, "Invalid gRPC TLS config");
                std::process::exit(1);
            });
        }

        info!(
            grpc_address = %grpc_addr,
            tls = config.grpc.tls_enabled(),
            "gRPC server ready"
        );

        let service = AuthServiceServer::new(AuthGrpcService::new(state.facade.clone()));
        let mut shutdown_rx = shutdown_tx.subscribe();
        Some(async move {
            builder
                .layer(tower_http::trace::TraceLayer::new_for_grpc())
                .add_service(service)
                .serve_with_shutdown(grpc_addr, async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
        })
    } else {
        None
    };

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, draining in-flight requests");
        let _ = signal_tx.send(());
    });

    run_servers(http_server, grpc_server, shutdown_tx).await;

    shutdown_telemetry();

    info!("Server shutdown complete");
}

fn grpc_tls_config(config: &Config) -> std::io::Result<Option<ServerTlsConfig>> {
    let (Some(cert_path), Some(key_path)) = (&config.grpc.tls_cert_path, &config.grpc.tls_key_path)
    else {
        return Ok(None);
    };

    let cert = std::fs::read_to_string(cert_path)?;
    let key = std::fs::read_to_string(key_path)?;
    Ok(Some(
        ServerTlsConfig::new().identity(Identity::from_pem(cert, key)),
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
