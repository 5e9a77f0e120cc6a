use std::sync::Arc;

use axum::Router;
use notify_worker::config::WorkerConfig;
use notify_worker::display::TracingDisplay;
use notify_worker::metrics;
use notify_worker::routes;
use notify_worker::state::AppState;
use notify_worker::telemetry::init_tracing;
use notify_worker::worker::NotificationWorker;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cfg = WorkerConfig::from_env();
    init_tracing(&cfg.log_filter);

    let (tx, rx) = mpsc::channel(cfg.queue_capacity);
    let worker = Arc::new(NotificationWorker::new(
        Arc::new(TracingDisplay),
        cfg.max_active,
    ));
    let _worker_task = worker.spawn(rx);

    let app: Router = routes::router(AppState::new(tx));

    info!(
        addr = %cfg.bind_addr,
        queue_capacity = cfg.queue_capacity,
        max_active = cfg.max_active,
        "starting notify-worker"
    );
    metrics::BOOT_COUNTER.inc();
    let listener = match tokio::net::TcpListener::bind(cfg.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(addr = %cfg.bind_addr, error = %err, "bind failed");
            std::process::exit(1);
        }
    };
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };
    if let Err(err) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %err, "server error");
    }
}
