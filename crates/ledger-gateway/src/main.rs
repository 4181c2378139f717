use clap::Parser;
use ledger_gateway::server::{
    config::{CliArgs, ServerConfig},
    connector,
    http::{AppState, router},
    lifecycle::{Lifecycle, ShutdownCoordinator, ShutdownSignals},
    session::{LedgerTarget, SessionGuard},
    telemetry::init_telemetry,
};
use std::sync::Arc;
use tokio::net::TcpListener;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let ledger = connector::from_settings(&config.ledger)?;
    let sessions = SessionGuard::new(
        ledger,
        LedgerTarget {
            ledger_id: config.ledger.ledger_id.clone(),
            file_password: config.ledger.file_password.clone(),
        },
        config.ledger.data_dir.clone(),
    );
    let lifecycle = Arc::new(Lifecycle::new());
    let coordinator = Arc::new(ShutdownCoordinator::new(
        Arc::clone(&lifecycle),
        sessions.clone(),
        config.drain_timeout,
        config.release_timeout,
    ));

    let signals = ShutdownSignals::install()?;
    tokio::spawn(signals.run(coordinator));

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config);

    let app = router(AppState {
        sessions,
        lifecycle: Arc::clone(&lifecycle),
    });
    let server = axum::serve(listener, app).with_graceful_shutdown(lifecycle.stopped());
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        () = lifecycle.stopped() => {}
        joined = &mut server => {
            providers.shutdown();
            joined??;
            anyhow::bail!("HTTP server exited before shutdown was requested");
        }
    }

    // Once stopped, connections that are still open get a short grace period.
    match tokio::time::timeout(config.connection_grace, server).await {
        Ok(Ok(Ok(()))) => tracing::info!("HTTP server closed"),
        Ok(Ok(Err(e))) => tracing::error!("HTTP server error: {e}"),
        Ok(Err(e)) => tracing::error!("HTTP server task failed: {e}"),
        Err(_) => tracing::warn!(
            grace = ?config.connection_grace,
            "Connections still open after grace period; exiting anyway"
        ),
    }

    tracing::info!("Service shut down successfully");
    providers.shutdown();
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting ledger gateway on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            backend = ?config.ledger.backend,
            "Starting ledger gateway on {}",
            config.server_addr
        );
    }
}
