use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_api::background::reaper::{self, ReaperSettings};
use relay_api::config::ServerConfig;
use relay_api::router::build_app_router;
use relay_api::state::AppState;
use relay_comfyui::api::ComfyUIApi;
use relay_comfyui::backend::ComfyUIBackend;
use relay_core::broker::JobBroker;
use relay_core::store::JobStore;
use relay_core::workflow::WorkflowTemplate;
use relay_worker::config::WorkerConfig;
use relay_worker::worker_loop::WorkerLoop;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_api=debug,relay_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Job table ---
    let store = Arc::new(JobStore::new());
    let broker = JobBroker::new(Arc::clone(&store), config.max_image_bytes);

    // --- Background tasks ---
    let cancel = CancellationToken::new();

    let reaper_handle = tokio::spawn(reaper::run(
        Arc::clone(&store),
        ReaperSettings {
            interval: Duration::from_secs(config.sweep_interval_secs),
            max_age: Duration::from_secs(config.job_max_age_secs),
            retention: Duration::from_secs(config.job_retention_secs),
        },
        cancel.clone(),
    ));

    let worker_handle = if config.embedded_worker {
        Some(spawn_embedded_worker(
            Arc::clone(&store),
            config.job_max_age_secs,
            cancel.clone(),
        ))
    } else {
        tracing::info!("No embedded worker; waiting for remote workers on /api/v1/queue/claim");
        None
    };

    // --- App state ---
    let state = AppState {
        broker,
        config: Arc::new(config.clone()),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), reaper_handle).await;
    tracing::info!("Job reaper stopped");

    if let Some(handle) = worker_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        tracing::info!("Embedded worker stopped");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Start a worker loop that claims straight from the in-process store.
fn spawn_embedded_worker(
    store: Arc<JobStore>,
    job_max_age_secs: u64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let worker_config = WorkerConfig::from_env();

    if worker_config.settings.job_timeout.as_secs() >= job_max_age_secs {
        tracing::warn!(
            job_timeout_secs = worker_config.settings.job_timeout.as_secs(),
            job_max_age_secs,
            "JOB_TIMEOUT_SECS should be shorter than JOB_MAX_AGE_SECS; the reaper may expire jobs the worker is still rendering",
        );
    }

    let template =
        WorkflowTemplate::from_file(&worker_config.workflow_path, worker_config.nodes.clone())
            .expect("Failed to load workflow template");

    let backend = ComfyUIBackend::new(ComfyUIApi::new(worker_config.comfyui_url.clone()))
        .with_input_dir(worker_config.comfyui_input_dir.clone());

    tracing::info!(
        comfyui_url = %worker_config.comfyui_url,
        workflow = %worker_config.workflow_path.display(),
        "Embedded worker starting",
    );

    let worker = WorkerLoop::new(store, Arc::new(backend), template, worker_config.settings);
    tokio::spawn(async move { worker.run(cancel).await })
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
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
        _ = ctrl_c => tracing::info!("Received Ctrl-C, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
