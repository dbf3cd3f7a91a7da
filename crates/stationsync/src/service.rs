//! Foreground save and fetch paths.
//!
//! Saves go to the remote first. When the remote cannot be reached the
//! records are cached as unsynced and the sync engine takes over; a save
//! therefore never fails because the network is down. Whatever the remote
//! returns or accepts is cached as synced, so fetches can fall back to the
//! cache later.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::observation::{CacheEntry, CompositeKey, ObservationRecord, SyncState};
use crate::remote::{EntryFormQuery, ObservationQuery, ObservationTransport};
use crate::storage::{self, SharedStore};
use crate::sync::SyncEngine;

/// Where a save ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The remote accepted the records.
    Saved,
    /// The remote was unreachable; the records are queued locally.
    SavedLocally,
}

/// Saves and fetches observations on behalf of entry forms.
#[derive(Debug)]
pub struct ObservationService {
    store: SharedStore,
    transport: Arc<dyn ObservationTransport>,
    engine: Arc<SyncEngine>,
    sync_after_save: bool,
}

impl ObservationService {
    /// Create a service sharing the engine's store.
    ///
    /// With `sync_after_save` set, every save also starts a background drain.
    #[must_use]
    pub fn new(
        engine: Arc<SyncEngine>,
        transport: Arc<dyn ObservationTransport>,
        sync_after_save: bool,
    ) -> Self {
        Self {
            store: Arc::clone(engine.store()),
            transport,
            engine,
            sync_after_save,
        }
    }

    /// The sync engine behind this service.
    #[must_use]
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Save entered records.
    ///
    /// On success the records are cached as synced. On a network error they
    /// are cached as unsynced and a background drain is started.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRecord`] for a record pairing a value with the
    /// missing flag, [`Error::Transport`] when the server rejects the save, or
    /// a store error.
    pub async fn save(&self, records: &[ObservationRecord]) -> Result<SaveOutcome> {
        for record in records {
            record
                .check_invariant()
                .map_err(|reason| Error::InvalidRecord {
                    key: record.key().to_string(),
                    reason,
                })?;
        }

        match self.transport.bulk_put(records).await {
            Ok(()) => {
                storage::lock(&self.store)?.put_many(records, SyncState::Synced)?;
                info!("Saved {} observations", records.len());
                if self.sync_after_save {
                    drop(self.engine.trigger());
                }
                Ok(SaveOutcome::Saved)
            }
            Err(e) if e.is_network() => {
                storage::lock(&self.store)?.put_many(records, SyncState::Unsynced)?;
                warn!("Saved {} observations locally: {}", records.len(), e);
                self.engine.publish_unsynced_count()?;
                drop(self.engine.trigger());
                Ok(SaveOutcome::SavedLocally)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch the records behind an entry form.
    ///
    /// When the remote answers, cached synced copies in the query range are
    /// evicted (the remote is authoritative, including for deletions), the
    /// remote records are cached as synced, and cached unsynced edits are laid
    /// over the remote values. When the remote is unreachable, every cached
    /// record in range is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] for a server error, or a store error.
    pub async fn find_entry_form_data(
        &self,
        query: &EntryFormQuery,
    ) -> Result<Vec<ObservationRecord>> {
        match self.transport.find_entry_form_data(query).await {
            Ok(remote) => {
                let store = storage::lock(&self.store)?;
                let local = store.find_for_query(query)?;
                let (synced, unsynced): (Vec<CacheEntry>, Vec<CacheEntry>) =
                    local.into_iter().partition(CacheEntry::is_synced);

                let stale: Vec<CompositeKey> =
                    synced.iter().map(|entry| entry.record().key()).collect();
                if !stale.is_empty() {
                    store.delete_many(&stale)?;
                }

                let pending: HashSet<CompositeKey> =
                    unsynced.iter().map(|entry| entry.record().key()).collect();
                let fresh: Vec<ObservationRecord> = remote
                    .iter()
                    .filter(|record| !pending.contains(&record.key()))
                    .filter(|record| record.check_invariant().is_ok())
                    .cloned()
                    .collect();
                store.put_many(&fresh, SyncState::Synced)?;
                drop(store);

                debug!(
                    "Fetched {} remote records, {} local edits pending",
                    remote.len(),
                    unsynced.len()
                );
                Ok(overlay(remote, unsynced))
            }
            Err(e) if e.is_network() => {
                warn!("Remote unavailable, reading form data from cache: {}", e);
                let local = storage::lock(&self.store)?.find_for_query(query)?;
                Ok(local.into_iter().map(CacheEntry::into_record).collect())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Search observations on the remote.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the remote call fails.
    pub async fn find(&self, query: &ObservationQuery) -> Result<Vec<ObservationRecord>> {
        Ok(self.transport.find(query).await?)
    }

    /// Restore soft-deleted records on the remote.
    ///
    /// Returns the number of records the remote restored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the remote call fails.
    pub async fn restore(&self, keys: &[CompositeKey]) -> Result<u64> {
        let restored = self.transport.restore(keys).await?;
        info!("Restored {} of {} observations", restored, keys.len());
        Ok(restored)
    }

    /// Soft-delete records on the remote and drop their cached copies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the remote call fails, or a store error.
    pub async fn soft_delete(&self, keys: &[CompositeKey]) -> Result<u64> {
        let deleted = self.transport.soft_delete(keys).await?;
        self.forget(keys)?;
        info!("Soft-deleted {} of {} observations", deleted, keys.len());
        Ok(deleted)
    }

    /// Permanently delete records on the remote and drop their cached copies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the remote call fails, or a store error.
    pub async fn hard_delete(&self, keys: &[CompositeKey]) -> Result<u64> {
        let deleted = self.transport.hard_delete(keys).await?;
        self.forget(keys)?;
        info!("Hard-deleted {} of {} observations", deleted, keys.len());
        Ok(deleted)
    }

    fn forget(&self, keys: &[CompositeKey]) -> Result<()> {
        storage::lock(&self.store)?.delete_many(keys)?;
        self.engine.publish_unsynced_count()?;
        Ok(())
    }
}

/// Replace remote records with pending local edits of the same key.
fn overlay(remote: Vec<ObservationRecord>, pending: Vec<CacheEntry>) -> Vec<ObservationRecord> {
    let mut pending: HashMap<CompositeKey, ObservationRecord> = pending
        .into_iter()
        .map(|entry| (entry.record().key(), entry.into_record()))
        .collect();

    let mut merged: Vec<ObservationRecord> = remote
        .into_iter()
        .map(|record| pending.remove(&record.key()).unwrap_or(record))
        .collect();

    let mut rest: Vec<ObservationRecord> = pending.into_values().collect();
    rest.sort_by_key(ObservationRecord::key);
    merged.extend(rest);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::tests::test_record;
    use crate::observation::Flag;
    use crate::remote::mock::MockTransport;
    use crate::remote::TransportError;
    use crate::storage::CacheStore;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn setup() -> (ObservationService, Arc<MockTransport>) {
        setup_with(false)
    }

    fn setup_with(sync_after_save: bool) -> (ObservationService, Arc<MockTransport>) {
        let store = CacheStore::open_in_memory().unwrap().into_shared();
        let transport = Arc::new(MockTransport::new());
        let engine = Arc::new(SyncEngine::new(store, transport.clone(), 1000));
        let service = ObservationService::new(engine, transport.clone(), sync_after_save);
        (service, transport)
    }

    /// Yield to background tasks until the queue is empty and no drain runs.
    async fn queue_settles(service: &ObservationService) -> bool {
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if !service.engine().is_syncing() && unsynced(service) == 0 {
                return true;
            }
        }
        false
    }

    fn form_query() -> EntryFormQuery {
        EntryFormQuery {
            station_id: "ST001".to_string(),
            source_id: 1,
            level: 0,
            element_ids: vec![1, 2, 3],
            from_date: Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(),
            to_date: Utc.with_ymd_and_hms(2024, 3, 5, 23, 0, 0).unwrap(),
        }
    }

    fn cache(service: &ObservationService, records: &[ObservationRecord], state: SyncState) {
        storage::lock(&service.store)
            .unwrap()
            .put_many(records, state)
            .unwrap();
    }

    fn unsynced(service: &ObservationService) -> usize {
        storage::lock(&service.store)
            .unwrap()
            .count_where(SyncState::Unsynced)
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_online_caches_synced_copy() {
        let (service, transport) = setup();
        let record = test_record(1, 6, Some(20.5));
        cache(&service, &[record.with_entry(Some(3.0), None, None)], SyncState::Unsynced);

        let outcome = service.save(&[record.clone()]).await.unwrap();

        assert_eq!(outcome, SaveOutcome::Saved);
        assert_eq!(transport.remote(), vec![record.clone()]);
        let entry = storage::lock(&service.store)
            .unwrap()
            .get(&record.key())
            .unwrap()
            .unwrap();
        assert!(entry.is_synced());
        assert_eq!(entry.record(), &record);
    }

    #[tokio::test]
    async fn test_save_offline_then_drain() {
        let (service, transport) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        service
            .engine()
            .subscribe(move |count| sink.lock().unwrap().push(count));

        transport.fail_puts_with(TransportError::network("offline"));
        let records = vec![
            test_record(1, 6, Some(20.5)),
            test_record(2, 6, None),
            test_record(3, 6, Some(0.0)),
        ];

        let outcome = service.save(&records).await.unwrap();
        assert_eq!(outcome, SaveOutcome::SavedLocally);
        assert_eq!(unsynced(&service), 3);
        assert_eq!(*seen.lock().unwrap(), vec![3]);

        transport.recover();
        assert!(queue_settles(&service).await);
        assert_eq!(transport.batches(), vec![3]);
        assert_eq!(transport.remote().len(), 3);
        assert_eq!(seen.lock().unwrap().last(), Some(&0));
    }

    #[tokio::test]
    async fn test_offline_save_with_sync_after_save_drains_once_online() {
        let (service, transport) = setup_with(true);
        transport.fail_puts_with(TransportError::network("offline"));
        let record = test_record(1, 6, Some(4.0));

        let outcome = service.save(&[record.clone()]).await.unwrap();
        assert_eq!(outcome, SaveOutcome::SavedLocally);
        assert_eq!(unsynced(&service), 1);

        transport.recover();
        assert!(queue_settles(&service).await);
        assert_eq!(transport.remote(), vec![record]);
        assert_eq!(storage::lock(&service.store).unwrap().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_online_save_with_sync_after_save_drains_earlier_queue() {
        let (service, transport) = setup_with(true);
        let queued = test_record(2, 6, Some(7.0));
        cache(&service, &[queued.clone()], SyncState::Unsynced);

        let outcome = service.save(&[test_record(1, 6, Some(1.0))]).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Saved);

        assert!(queue_settles(&service).await);
        assert_eq!(transport.batches(), vec![1, 1]);
        assert!(transport.remote().contains(&queued));
    }

    #[tokio::test]
    async fn test_online_save_without_sync_after_save_leaves_queue() {
        let (service, transport) = setup();
        cache(&service, &[test_record(2, 6, Some(7.0))], SyncState::Unsynced);

        service.save(&[test_record(1, 6, Some(1.0))]).await.unwrap();

        assert!(!queue_settles(&service).await);
        assert_eq!(transport.batches(), vec![1]);
        assert_eq!(unsynced(&service), 1);
    }

    #[tokio::test]
    async fn test_save_server_error_is_surfaced() {
        let (service, transport) = setup();
        transport.fail_puts_with(TransportError::server(400, "Element not allowed"));

        let err = service
            .save(&[test_record(1, 6, Some(1.0))])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport(TransportError::Server { status: 400, .. })));
        assert!(err.to_string().contains("Element not allowed"));
        assert_eq!(unsynced(&service), 0);
    }

    #[tokio::test]
    async fn test_save_refuses_invalid_record() {
        let (service, transport) = setup();
        let bad = test_record(1, 6, Some(1.0)).with_entry(Some(1.0), Some(Flag::Missing), None);

        let err = service.save(&[bad]).await.unwrap_err();

        assert!(matches!(err, Error::InvalidRecord { .. }));
        assert!(transport.batches().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_falls_back_to_cache_when_offline() {
        let (service, transport) = setup();
        transport.set_remote(vec![test_record(1, 6, Some(9.0))]);
        transport.fail_fetches_with(TransportError::network("offline"));
        cache(&service, &[test_record(1, 6, Some(1.0))], SyncState::Synced);
        cache(&service, &[test_record(2, 6, Some(2.0))], SyncState::Unsynced);

        let records = service.find_entry_form_data(&form_query()).await.unwrap();

        let values: Vec<_> = records.iter().map(|r| (r.element_id, r.value)).collect();
        assert_eq!(values, vec![(1, Some(1.0)), (2, Some(2.0))]);
    }

    #[tokio::test]
    async fn test_fetch_online_hides_synced_copies_missing_remotely() {
        let (service, _transport) = setup();
        cache(&service, &[test_record(1, 6, Some(1.0))], SyncState::Synced);
        cache(&service, &[test_record(2, 6, Some(2.0))], SyncState::Unsynced);

        let records = service.find_entry_form_data(&form_query()).await.unwrap();

        assert_eq!(records, vec![test_record(2, 6, Some(2.0))]);
        let store = storage::lock(&service.store).unwrap();
        assert_eq!(store.count_where(SyncState::Synced).unwrap(), 0);
        assert_eq!(store.count_where(SyncState::Unsynced).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fetch_online_overlays_pending_edits() {
        let (service, transport) = setup();
        transport.set_remote(vec![
            test_record(1, 6, Some(1.0)),
            test_record(3, 6, Some(3.0)),
        ]);
        cache(&service, &[test_record(1, 6, Some(1.5))], SyncState::Unsynced);

        let records = service.find_entry_form_data(&form_query()).await.unwrap();

        let values: Vec<_> = records.iter().map(|r| (r.element_id, r.value)).collect();
        assert_eq!(values, vec![(1, Some(1.5)), (3, Some(3.0))]);

        let store = storage::lock(&service.store).unwrap();
        let pending = store.get(&test_record(1, 6, None).key()).unwrap().unwrap();
        assert!(!pending.is_synced());
        assert_eq!(pending.record().value, Some(1.5));
        assert!(store.get(&test_record(3, 6, None).key()).unwrap().unwrap().is_synced());
    }

    #[tokio::test]
    async fn test_fetched_records_are_served_offline() {
        let (service, transport) = setup();
        transport.set_remote(vec![test_record(1, 6, Some(8.0))]);

        let online = service.find_entry_form_data(&form_query()).await.unwrap();
        transport.fail_fetches_with(TransportError::network("offline"));
        let offline = service.find_entry_form_data(&form_query()).await.unwrap();

        assert_eq!(online, vec![test_record(1, 6, Some(8.0))]);
        assert_eq!(offline, online);
    }

    #[tokio::test]
    async fn test_refetch_replaces_synced_copies() {
        let (service, transport) = setup();
        transport.set_remote(vec![test_record(1, 6, Some(8.0)), test_record(2, 6, Some(2.0))]);
        service.find_entry_form_data(&form_query()).await.unwrap();

        transport.set_remote(vec![test_record(1, 6, Some(9.0))]);
        service.find_entry_form_data(&form_query()).await.unwrap();

        transport.fail_fetches_with(TransportError::network("offline"));
        let offline = service.find_entry_form_data(&form_query()).await.unwrap();
        assert_eq!(offline, vec![test_record(1, 6, Some(9.0))]);
    }

    #[tokio::test]
    async fn test_fetch_server_error_is_surfaced() {
        let (service, transport) = setup();
        transport.fail_fetches_with(TransportError::server(500, "boom"));

        let err = service
            .find_entry_form_data(&form_query())
            .await
            .unwrap_err();
        assert!(!err.is_network_error());
    }

    #[tokio::test]
    async fn test_find_passes_through() {
        let (service, transport) = setup();
        transport.set_remote(vec![test_record(1, 6, Some(1.0))]);

        let found = service.find(&ObservationQuery::default()).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_soft_delete_then_restore() {
        let (service, transport) = setup();
        let kept = test_record(1, 6, Some(1.0));
        let removed = test_record(2, 6, Some(2.0));
        transport.set_remote(vec![kept.clone(), removed.clone()]);
        service.find_entry_form_data(&form_query()).await.unwrap();

        assert_eq!(service.soft_delete(&[removed.key()]).await.unwrap(), 1);
        assert_eq!(transport.remote(), vec![kept.clone()]);
        assert!(storage::lock(&service.store)
            .unwrap()
            .get(&removed.key())
            .unwrap()
            .is_none());

        assert_eq!(service.restore(&[removed.key()]).await.unwrap(), 1);
        let records = service.find_entry_form_data(&form_query()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.contains(&removed));
    }

    #[tokio::test]
    async fn test_hard_delete_cannot_be_restored() {
        let (service, transport) = setup();
        let record = test_record(1, 6, Some(1.0));
        transport.set_remote(vec![record.clone()]);
        cache(&service, &[record.clone()], SyncState::Unsynced);

        assert_eq!(service.hard_delete(&[record.key()]).await.unwrap(), 1);
        assert_eq!(unsynced(&service), 0);
        assert_eq!(service.restore(&[record.key()]).await.unwrap(), 0);
        assert!(transport.remote().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_key_counts_zero() {
        let (service, _transport) = setup();
        let key = test_record(1, 6, None).key();
        assert_eq!(service.soft_delete(&[key.clone()]).await.unwrap(), 0);
        assert_eq!(service.hard_delete(&[key]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_cached_copy() {
        let (service, transport) = setup();
        let record = test_record(1, 6, Some(1.0));
        cache(&service, &[record.clone()], SyncState::Synced);
        transport.fail_changes_with(TransportError::network("offline"));

        let err = service.soft_delete(&[record.key()]).await.unwrap_err();

        assert!(err.is_network_error());
        assert!(storage::lock(&service.store)
            .unwrap()
            .get(&record.key())
            .unwrap()
            .is_some());
    }
}
