//! Persistence Coordinator - single-flight store writer
//!
//! Serializes all disk writes of the store document through one
//! worker task:
//!
//! - at most one physical write is in flight at a time;
//! - a save requested while a write is in flight leaves exactly one
//!   stored wakeup, so exactly one trailing write runs afterwards and
//!   picks up every mutation made in the meantime (`Notify` keeps at
//!   most one permit);
//! - a failed write is logged and never propagated to the caller.
//!
//! A periodic tick additionally requests a save on a fixed interval as
//! a safety net, and the worker flushes once more on shutdown.

use super::{Store, StoreError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Fire-and-forget save handle. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct PersistCoordinator {
    notify: Arc<Notify>,
    /// Physical writes performed by the worker, for observability
    writes: Arc<AtomicU64>,
}

impl PersistCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the current in-memory document be persisted.
    ///
    /// Idempotent and non-blocking; concurrent requests coalesce.
    pub fn request_save(&self) {
        self.notify.notify_one();
    }

    /// Writer worker. Register as `TaskKind::Worker`.
    pub async fn run_writer(self, store: Store, shutdown: CancellationToken) {
        tracing::info!(path = %store.path().display(), "Persist writer started");
        loop {
            tokio::select! {
                _ = self.notify.notified() => {
                    self.write_document(&store).await;
                }
                _ = shutdown.cancelled() => {
                    // Final flush so a clean shutdown never loses a
                    // trailing request.
                    self.write_document(&store).await;
                    tracing::info!("Persist writer stopped");
                    return;
                }
            }
        }
    }

    /// Interval safety net. Register as `TaskKind::Periodic`.
    pub async fn run_interval(self, interval_ms: u64, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.request_save(),
                _ = shutdown.cancelled() => return,
            }
        }
    }

    /// Total physical writes performed so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Serialize under the read lock, then write atomically (tmp +
    /// rename) so a crash mid-flush never leaves a truncated document.
    async fn write_document(&self, store: &Store) {
        let json = match store.serialize() {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize store document");
                return;
            }
        };

        if let Err(e) = write_atomic(store, &json).await {
            tracing::error!(path = %store.path().display(), error = %e, "Failed to persist store");
        } else {
            let writes = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(bytes = json.len(), writes, "Store persisted");
        }
    }
}

async fn write_atomic(store: &Store, json: &str) -> Result<(), StoreError> {
    let path = store.path();
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
