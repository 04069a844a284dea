use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use benchtrack::server::config::AppConfig;
use benchtrack::server::{build_router, AppState};
use benchtrack::storage::memory::InMemoryStorage;
use benchtrack::storage::Storage;
use benchtrack::ws::Hub;
use tracing::{error, info};

/// Exit codes: `0` normal shutdown (SIGTERM — an orchestrator asking the
/// process to stop), `1` fatal startup/configuration failure, `130`
/// interactive interrupt (Ctrl-C) after drain, matching the usual
/// `128 + SIGINT` shell convention.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "benchtrack=info,tower_http=info".into()),
        )
        .init();

    match run().await {
        Ok(Shutdown::Terminated) => ExitCode::SUCCESS,
        Ok(Shutdown::Interrupted) => ExitCode::from(130),
        Err(err) => {
            error!(error = ?err, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}

enum Shutdown {
    /// SIGTERM: an orchestrator or supervisor asked us to stop.
    Terminated,
    /// SIGINT (Ctrl-C): an interactive user asked us to stop.
    Interrupted,
}

async fn run() -> anyhow::Result<Shutdown> {
    let config = AppConfig::default();
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let (hub, runner) = Hub::new(config.hub_config());
    tokio::spawn(runner.run());

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(storage, hub.clone(), config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "bench-history-server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(await_shutdown(hub.clone(), shutdown_tx))
    .await
    .context("server exited with error")?;

    Ok(shutdown_rx
        .await
        .unwrap_or(Shutdown::Interrupted))
}

/// Races SIGTERM against Ctrl-C, drains the hub's WebSocket clients once
/// either fires, and reports which one it was on `reason` for `run` to turn
/// into the matching exit code.
async fn await_shutdown(hub: Hub, reason: tokio::sync::oneshot::Sender<Shutdown>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = ?err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    let shutdown = tokio::select! {
        _ = ctrl_c => Shutdown::Interrupted,
        _ = terminate => Shutdown::Terminated,
    };
    info!("shutdown signal received, draining websocket clients");
    hub.stop();
    let _ = reason.send(shutdown);
}
