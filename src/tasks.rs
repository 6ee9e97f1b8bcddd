//! Background task bookkeeping and ordered shutdown.
//!
//! Producers (HTTP server, MQTT ingest, sweeper) stop first. The history
//! writer has its own token and is cancelled only after every producer has
//! been joined, so points recorded during shutdown are still flushed.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct BackgroundTasks {
    producers: CancellationToken,
    history: CancellationToken,
    producer_handles: Vec<JoinHandle<()>>,
    history_handle: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a task that feeds the relay or the history sink.
    pub fn producer_token(&self) -> CancellationToken {
        self.producers.child_token()
    }

    /// Token for the history writer.
    pub fn history_token(&self) -> CancellationToken {
        self.history.child_token()
    }

    pub fn push_producer(&mut self, handle: JoinHandle<()>) {
        self.producer_handles.push(handle);
    }

    pub fn set_history(&mut self, handle: JoinHandle<()>) {
        self.history_handle = Some(handle);
    }

    /// Signal producers to stop. Idempotent.
    pub fn cancel_producers(&self) {
        self.producers.cancel();
    }

    /// Stop producers, join them, then stop and join the history writer.
    pub async fn shutdown(mut self) {
        self.producers.cancel();
        for handle in self.producer_handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.history.cancel();
        if let Some(handle) = self.history_handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "History writer ended abnormally");
            }
        }
    }
}
