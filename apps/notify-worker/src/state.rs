use std::time::Instant;

use tokio::sync::mpsc;

use crate::worker::WorkerEvent;

#[derive(Clone)]
pub struct AppState {
    start: Instant,
    events: mpsc::Sender<WorkerEvent>,
}

impl AppState {
    pub fn new(events: mpsc::Sender<WorkerEvent>) -> Self {
        Self {
            start: Instant::now(),
            events,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn events(&self) -> &mpsc::Sender<WorkerEvent> {
        &self.events
    }
}
