use std::sync::Arc;

use relay_comfyui::api::ComfyUIApi;
use relay_comfyui::backend::ComfyUIBackend;
use relay_core::workflow::WorkflowTemplate;
use relay_worker::broker_client::BrokerClient;
use relay_worker::config::WorkerConfig;
use relay_worker::worker_loop::WorkerLoop;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_worker=debug,relay_comfyui=debug,relay_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();

    let template = WorkflowTemplate::from_file(&config.workflow_path, config.nodes.clone())
        .expect("Failed to load workflow template");

    let queue = Arc::new(BrokerClient::new(&config.broker_url));
    let backend = Arc::new(
        ComfyUIBackend::new(ComfyUIApi::new(config.comfyui_url.clone()))
            .with_input_dir(config.comfyui_input_dir.clone()),
    );

    tracing::info!(
        broker_url = %config.broker_url,
        comfyui_url = %config.comfyui_url,
        workflow = %config.workflow_path.display(),
        "Worker starting",
    );

    let cancel = CancellationToken::new();
    let worker = WorkerLoop::new(queue, backend, template, config.settings);

    let loop_cancel = cancel.clone();
    let handle = tokio::spawn(async move { worker.run(loop_cancel).await });

    shutdown_signal().await;
    cancel.cancel();
    if let Err(e) = handle.await {
        tracing::error!(error = %e, "Worker task ended abnormally");
    }

    tracing::info!("Worker shut down");
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
