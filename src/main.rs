use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use endpoint_controller::config::Config;
use endpoint_controller::controller::{
    run_controller, watch_managed_entities, ControllerState, KubeEventRecorder, KubeStore,
    NetProber,
};
use endpoint_controller::rest_api;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        info!("Shutdown signal received");
        shutdown.cancel();
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);

    info!(
        "Starting endpoint-controller v{} (block miss {}, status port {})",
        env!("CARGO_PKG_VERSION"),
        config.block_miss,
        config.status_port
    );

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let prober = NetProber::new(config.probe_timeout(), config.status_port)
        .context("Failed to build target prober")?;

    let state = Arc::new(ControllerState::new(
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(KubeEventRecorder::new(client.clone())),
        Arc::new(prober),
        config.block_miss,
    ));

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let server = {
        let state = state.clone();
        let shutdown = shutdown.clone();
        let addr = config.http_addr;
        tokio::spawn(async move {
            if let Err(e) = rest_api::run_server(state, addr, shutdown.clone()).await {
                error!("HTTP server failed: {}", e);
                shutdown.cancel();
            }
        })
    };

    let triggers = config.watch.then(|| watch_managed_entities(client.clone()));

    run_controller(state, config.resync_interval(), triggers, shutdown.clone()).await?;

    shutdown.cancel();
    let _ = server.await;

    info!("endpoint-controller stopped");
    Ok(())
}
