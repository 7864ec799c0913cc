//! Background "last used" stamping for API keys.
//!
//! Validation only enqueues. One worker drains the bounded queue and gives
//! each write its own timeout, outside any caller's cancellation scope. A full
//! queue drops the touch. Drops and failures are logged and counted, never
//! returned.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::metrics::CredentialMetrics;
use super::repository::ApiKeyRepository;

#[derive(Debug, Clone, Copy)]
struct Touch {
    key_id: Uuid,
    used_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LastUsedTracker {
    sender: mpsc::Sender<Touch>,
    metrics: Arc<CredentialMetrics>,
}

impl LastUsedTracker {
    /// Start the worker on the current Tokio runtime. It exits once every
    /// tracker clone has been dropped and the queue is drained.
    pub fn spawn(
        repository: Arc<dyn ApiKeyRepository>,
        capacity: usize,
        write_timeout: Duration,
        metrics: Arc<CredentialMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(
            receiver,
            repository,
            write_timeout,
            metrics.clone(),
        ));
        (Self { sender, metrics }, handle)
    }

    pub fn record(&self, key_id: Uuid, used_at: DateTime<Utc>) {
        match self.sender.try_send(Touch { key_id, used_at }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(key_id = %key_id, "Last-used queue full, dropping touch");
                self.metrics.record_last_used_dropped();
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(key_id = %key_id, "Last-used worker stopped, dropping touch");
                self.metrics.record_last_used_dropped();
            }
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<Touch>,
    repository: Arc<dyn ApiKeyRepository>,
    write_timeout: Duration,
    metrics: Arc<CredentialMetrics>,
) {
    while let Some(touch) = receiver.recv().await {
        let write = repository.touch_api_key(touch.key_id, touch.used_at);
        match tokio::time::timeout(write_timeout, write).await {
            Ok(Ok(())) => {
                tracing::trace!(key_id = %touch.key_id, "Updated API key last_used_at");
            }
            Ok(Err(e)) => {
                tracing::warn!(key_id = %touch.key_id, error = %e, "Failed to update API key last_used_at");
                metrics.record_last_used_failed();
            }
            Err(_) => {
                tracing::warn!(key_id = %touch.key_id, "Timed out updating API key last_used_at");
                metrics.record_last_used_failed();
            }
        }
    }
    tracing::debug!("Last-used worker stopped");
}
