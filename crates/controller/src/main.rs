//! `flowcontrol` -- loop ComfyUI workflows on OSC command.
//!
//! Listens for OSC `/play <name>` and `/stop` messages, resubmits the
//! named workflow to ComfyUI with fresh `$RANDOM` values until stopped,
//! and reports loop status to the outbound OSC port.
//!
//! # Environment variables
//!
//! | Variable                 | Default          | Description                          |
//! |--------------------------|------------------|--------------------------------------|
//! | `OSC_BIND_ADDR`          | `0.0.0.0`        | Address for the OSC control socket   |
//! | `OSC_PORTIN`             | `9000`           | Inbound OSC control port             |
//! | `OSC_HOST_OUT`           | `127.0.0.1`      | Host receiving status notifications  |
//! | `OSC_PORTOUT`            | `9001`           | Outbound OSC status port             |
//! | `COMFYUI_SERVER`         | `127.0.0.1:8188` | ComfyUI `host:port` or base URL      |
//! | `WORKFLOW_PATH`          | `./workflows`    | Directory of `<name>.json` workflows |
//! | `QUEUE_POLL_INTERVAL_MS` | `200`            | Delay between queue polls            |

use std::sync::Arc;

use flowcontrol::config::ControllerConfig;
use flowcontrol::control::ControlServer;
use flowcontrol::controller::LoopController;
use flowcontrol::notify::StatusNotifier;
use flowcontrol_comfyui::api::ComfyUIApi;
use flowcontrol_core::templates::TemplateStore;
use flowcontrol_core::types::ClientId;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowcontrol=info,flowcontrol_comfyui=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ControllerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let client_id = ClientId::generate();
    let store = TemplateStore::new(config.workflow_path.clone());
    tracing::info!(
        client_id = %client_id,
        comfyui = %config.comfyui_url(),
        workflows = %store.root().display(),
        "Starting flowcontrol",
    );

    match store.list().await {
        Ok(names) => tracing::info!(count = names.len(), ?names, "Available workflows"),
        Err(e) => tracing::warn!(error = %e, "Cannot list workflow directory"),
    }

    // --- Loop controller ---
    let api = Arc::new(ComfyUIApi::new(config.comfyui_url()));
    let controller = Arc::new(LoopController::new(
        api,
        store,
        client_id,
        config.poll_interval,
    ));

    let server_cancel = CancellationToken::new();
    let notifier_cancel = CancellationToken::new();

    // --- Status notifier ---
    let notifier_handle = match StatusNotifier::bind(config.osc_notify_target()).await {
        Ok(notifier) => Some(tokio::spawn(
            notifier.run(controller.subscribe(), notifier_cancel.clone()),
        )),
        Err(e) => {
            tracing::warn!(error = %e, "OSC status notifier disabled");
            None
        }
    };

    // --- Control server ---
    let server = ControlServer::bind(config.osc_listen_addr(), Arc::clone(&controller))
        .await
        .unwrap_or_else(|e| {
            tracing::error!(addr = %config.osc_listen_addr(), error = %e, "Failed to bind OSC port");
            std::process::exit(1);
        });
    tracing::info!(port = config.osc_port_in, "OSC Server is listening");
    let server_handle = tokio::spawn(server.run(server_cancel.clone()));

    shutdown_signal().await;

    // --- Shutdown: stop taking commands, then drain the active loop ---
    server_cancel.cancel();
    let _ = server_handle.await;
    controller.stop().await;
    notifier_cancel.cancel();
    if let Some(handle) = notifier_handle {
        let _ = handle.await;
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
