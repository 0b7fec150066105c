use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use iproxy_config::ConfigStore;
use iproxy_core::{AppState, Engine};
use iproxy_logging::{LogLevel, Logger};
use iproxy_provider_core::ProviderRegistry;
use iproxy_provider_impl::register_builtin_providers;
use iproxy_storage::ArtifactStore;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let data_dir = PathBuf::from(&args.data_dir);

    let level = LogLevel::parse(&args.log_level).unwrap_or(LogLevel::Info);
    let logger = Logger::new(level, Some(data_dir.join("logs")));

    let config = ConfigStore::load(data_dir.clone(), logger.clone()).await;

    let mut registry = ProviderRegistry::new();
    register_builtin_providers(&mut registry);

    let artifacts = Arc::new(ArtifactStore::new(
        data_dir.join("storage"),
        logger.clone(),
    ));
    let state = AppState::new(
        config.clone(),
        Arc::new(registry),
        artifacts,
        logger.clone(),
        data_dir,
    );
    let engine = Engine::new(state);

    let app = axum::Router::new()
        .merge(iproxy_router::public_router(engine.clone()))
        .merge(iproxy_admin::admin_router(engine.clone()));

    let port = args.port.unwrap_or_else(|| config.get().system.port);
    let bind = format!("{}:{}", args.host, port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    logger.info("Server", format!("listening on {bind}"));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    // Ordered shutdown: stop accepting, then drain the log queue.
    logger.info("Server", "shutting down");
    logger.flush().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
