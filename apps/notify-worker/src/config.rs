use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub queue_capacity: usize,
    pub max_active: usize,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let bind_addr: SocketAddr = std::env::var("NOTIFY_WORKER_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8090)));
        let log_filter =
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,notify_worker=debug".into());
        let queue_capacity = std::env::var("NOTIFY_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(256);
        let max_active = std::env::var("NOTIFY_MAX_ACTIVE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(20);
        Self {
            bind_addr,
            log_filter,
            queue_capacity,
            max_active,
        }
    }
}
