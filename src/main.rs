use std::{sync::Arc, time::Duration};

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trail_service::{
    AppState, HttpAuthenticator,
    authenticator::AuthenticatorState,
    config::{AppConfig, Env},
    create_router,
    repository::{Repository, RepositoryState, SqlServerRepository, connect_pool},
};

/// main
///
/// Entry point: configuration, logging, database pool, Authenticator API
/// client, then the HTTP server until Ctrl-C / SIGTERM.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast)
    dotenv::dotenv().ok();
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    // 2. Logging: RUST_LOG wins, otherwise service debug + request summaries.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "trail_service=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("TrailService starting in {:?} mode", config.env);

    // 3. Database pool (SQL Server)
    let pool = connect_pool(&config.db_url, config.db_max_connections)
        .await
        .expect("FATAL: Failed to build the SQL Server pool. Check DATABASE_URL.");
    let repository = SqlServerRepository::new(pool);
    repository
        .ping()
        .await
        .expect("FATAL: SQL Server is unreachable. Check DATABASE_URL.");
    let repo = Arc::new(repository) as RepositoryState;

    // 4. Authenticator API client
    let authenticator = HttpAuthenticator::new(
        config.auth_api_url.clone(),
        Duration::from_secs(config.auth_api_timeout_secs),
    )
    .expect("FATAL: Failed to build the Authenticator API client.");
    let authenticator = Arc::new(authenticator) as AuthenticatorState;

    // 5. State, router, server
    let bind_addr = config.bind_addr.clone();
    let app = create_router(AppState::new(repo, authenticator, config));

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind the HTTP listener. Check BIND_ADDR.");
    tracing::info!("Listening on {}", bind_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("HTTP server error: {}", e);
    }

    // The pool is dropped with the router, closing idle connections.
    tracing::info!("TrailService stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections");
}
