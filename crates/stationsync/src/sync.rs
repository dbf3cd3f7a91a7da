//! Sync engine: drains the unsynced queue to the remote authority.
//!
//! The engine is single-flight. A drain started while another is running
//! returns immediately, and the running drain keeps going until the queue is
//! empty or a push fails. Each iteration recounts the queue and publishes the
//! count to observers; once the count reaches zero the whole cache is cleared.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::observation::{ObservationRecord, SyncState};
use crate::remote::{ObservationTransport, TransportError};
use crate::storage::{self, SharedStore};

/// Default number of records pushed per request.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Receives the number of unsynced records whenever the engine counts them.
pub trait UnsyncedObserver: Send + Sync {
    /// Called with the current unsynced count.
    fn on_unsynced_count(&self, count: usize);
}

impl<F> UnsyncedObserver for F
where
    F: Fn(usize) + Send + Sync,
{
    fn on_unsynced_count(&self, count: usize) {
        self(count);
    }
}

/// How a drain ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Another drain was already running; nothing was done.
    AlreadySyncing,
    /// The queue was emptied and the cache cleared.
    Drained {
        /// Records pushed during this drain.
        pushed: usize,
        /// Requests made during this drain.
        batches: usize,
    },
    /// A push failed; the remaining queue is left for the next trigger.
    Failed {
        /// Records pushed before the failure.
        pushed: usize,
        /// Why the push failed.
        error: TransportError,
    },
}

/// Resets the syncing flag however the drain exits.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Pushes unsynced cache entries to the remote in bounded batches.
pub struct SyncEngine {
    store: SharedStore,
    transport: Arc<dyn ObservationTransport>,
    batch_size: usize,
    syncing: AtomicBool,
    observers: Mutex<Vec<Arc<dyn UnsyncedObserver>>>,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("batch_size", &self.batch_size)
            .field("syncing", &self.is_syncing())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create an engine over a shared store and a transport.
    ///
    /// A batch size of zero is treated as one.
    #[must_use]
    pub fn new(
        store: SharedStore,
        transport: Arc<dyn ObservationTransport>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            transport,
            batch_size: batch_size.max(1),
            syncing: AtomicBool::new(false),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// The store this engine drains.
    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Check if a drain is running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Register an observer of the unsynced count.
    pub fn subscribe(&self, observer: impl UnsyncedObserver + 'static) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.push(Arc::new(observer));
        }
    }

    /// Count unsynced records and tell every observer.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn publish_unsynced_count(&self) -> Result<usize> {
        let count = storage::lock(&self.store)?.count_where(SyncState::Unsynced)?;
        self.notify(count);
        Ok(count)
    }

    fn notify(&self, count: usize) {
        let observers: Vec<Arc<dyn UnsyncedObserver>> = match self.observers.lock() {
            Ok(observers) => observers.clone(),
            Err(_) => return,
        };
        for observer in observers {
            observer.on_unsynced_count(count);
        }
    }

    /// Drain the unsynced queue.
    ///
    /// # Errors
    ///
    /// Returns an error only for local store failures. Transport failures end
    /// the drain with [`SyncOutcome::Failed`].
    pub async fn sync(&self) -> Result<SyncOutcome> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync already in progress");
            return Ok(SyncOutcome::AlreadySyncing);
        }
        let _guard = SyncingGuard(&self.syncing);

        let mut pushed = 0;
        let mut batches = 0;

        loop {
            let count = self.publish_unsynced_count()?;
            if count == 0 {
                let cleared = storage::lock(&self.store)?.clear_all()?;
                debug!("Queue empty, cleared {} cached entries", cleared);
                if pushed > 0 {
                    info!("Synced {} observations in {} batches", pushed, batches);
                }
                return Ok(SyncOutcome::Drained { pushed, batches });
            }

            let snapshot = storage::lock(&self.store)?.oldest_unsynced(self.batch_size)?;
            let batch: Vec<ObservationRecord> =
                snapshot.iter().map(|entry| entry.record().clone()).collect();
            if batch.is_empty() {
                return Err(Error::internal(format!(
                    "{count} unsynced entries counted but none read"
                )));
            }

            debug!("Pushing batch of {} of {} unsynced", batch.len(), count);
            match self.transport.bulk_put(&batch).await {
                Ok(()) => {
                    storage::lock(&self.store)?.mark_synced(&snapshot)?;
                    pushed += batch.len();
                    batches += 1;
                }
                Err(error) => {
                    self.requeue_rejected(&error)?;
                    warn!("Sync stopped with {} unsynced: {}", count, error);
                    return Ok(SyncOutcome::Failed { pushed, error });
                }
            }
        }
    }

    /// Attach the server's message to the record it refused.
    fn requeue_rejected(&self, error: &TransportError) -> Result<()> {
        if let TransportError::Server {
            message,
            rejected: Some(record),
            ..
        } = error
        {
            warn!("Server rejected {}: {}", record.key(), message);
            storage::lock(&self.store)?.put_rejected(record, message)?;
        }
        Ok(())
    }

    /// Start a drain in the background.
    ///
    /// The outcome is logged; failures never reach the caller.
    pub fn trigger(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            match engine.sync().await {
                Ok(SyncOutcome::Drained { pushed, .. }) => {
                    debug!("Background sync drained ({} pushed)", pushed);
                }
                Ok(SyncOutcome::AlreadySyncing) => {}
                Ok(SyncOutcome::Failed { error, .. }) => {
                    debug!("Background sync deferred: {}", error);
                }
                Err(e) => warn!("Background sync failed: {}", e),
            }
        })
    }
}
