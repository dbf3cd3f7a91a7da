//! In-memory transport for tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{EntryFormQuery, ObservationQuery, ObservationTransport, TransportError};
use crate::observation::{CompositeKey, ObservationRecord};

/// Plays the remote API from memory.
///
/// Successful puts upsert into `remote`; fetches read from it. Soft
/// deletes move records to `deleted`, where restores find them again.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    remote: Mutex<Vec<ObservationRecord>>,
    deleted: Mutex<Vec<ObservationRecord>>,
    change_error: Mutex<Option<TransportError>>,
    batches: Mutex<Vec<usize>>,
    put_error: Mutex<Option<TransportError>>,
    fetch_error: Mutex<Option<TransportError>>,
    succeed_puts: Mutex<Option<usize>>,
    delay: Option<Duration>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every put wait before answering.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn fail_puts_with(&self, error: TransportError) {
        *self.put_error.lock().unwrap() = Some(error);
    }

    /// Accept `count` more puts, then fail with `error`.
    pub(crate) fn fail_puts_after(&self, count: usize, error: TransportError) {
        *self.succeed_puts.lock().unwrap() = Some(count);
        self.fail_puts_with(error);
    }

    pub(crate) fn fail_fetches_with(&self, error: TransportError) {
        *self.fetch_error.lock().unwrap() = Some(error);
    }

    /// Fail restores and deletes with `error`.
    pub(crate) fn fail_changes_with(&self, error: TransportError) {
        *self.change_error.lock().unwrap() = Some(error);
    }

    pub(crate) fn recover(&self) {
        *self.put_error.lock().unwrap() = None;
        *self.fetch_error.lock().unwrap() = None;
        *self.change_error.lock().unwrap() = None;
    }

    pub(crate) fn set_remote(&self, records: Vec<ObservationRecord>) {
        *self.remote.lock().unwrap() = records;
    }

    pub(crate) fn remote(&self) -> Vec<ObservationRecord> {
        self.remote.lock().unwrap().clone()
    }

    /// Sizes of the accepted put batches, in order.
    pub(crate) fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    fn change_failure(&self) -> Result<(), TransportError> {
        match self.change_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn take_put_failure(&self) -> Option<TransportError> {
        let mut succeed = self.succeed_puts.lock().unwrap();
        match succeed.as_mut() {
            Some(0) | None => self.put_error.lock().unwrap().clone(),
            Some(remaining) => {
                *remaining -= 1;
                None
            }
        }
    }
}

#[async_trait]
impl ObservationTransport for MockTransport {
    async fn bulk_put(&self, records: &[ObservationRecord]) -> Result<(), TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.take_put_failure() {
            return Err(error);
        }

        let mut remote = self.remote.lock().unwrap();
        for record in records {
            remote.retain(|existing| !existing.has_key(&record.key()));
            remote.push(record.clone());
        }
        self.batches.lock().unwrap().push(records.len());
        Ok(())
    }

    async fn find_entry_form_data(
        &self,
        query: &EntryFormQuery,
    ) -> Result<Vec<ObservationRecord>, TransportError> {
        if let Some(error) = self.fetch_error.lock().unwrap().clone() {
            return Err(error);
        }

        Ok(self
            .remote()
            .into_iter()
            .filter(|r| {
                r.station_id == query.station_id
                    && r.source_id == query.source_id
                    && r.level == query.level
                    && query.element_ids.contains(&r.element_id)
                    && r.datetime >= query.from_date
                    && r.datetime <= query.to_date
            })
            .collect())
    }

    async fn find(&self, query: &ObservationQuery) -> Result<Vec<ObservationRecord>, TransportError> {
        if let Some(error) = self.fetch_error.lock().unwrap().clone() {
            return Err(error);
        }

        Ok(self
            .remote()
            .into_iter()
            .filter(|r| {
                query
                    .station_ids
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&r.station_id))
            })
            .collect())
    }

    async fn restore(&self, keys: &[CompositeKey]) -> Result<u64, TransportError> {
        self.change_failure()?;
        let mut deleted = self.deleted.lock().unwrap();
        let (restored, kept): (Vec<_>, Vec<_>) = deleted
            .drain(..)
            .partition(|r| keys.contains(&r.key()));
        *deleted = kept;
        let count = restored.len() as u64;
        self.remote.lock().unwrap().extend(restored);
        Ok(count)
    }

    async fn soft_delete(&self, keys: &[CompositeKey]) -> Result<u64, TransportError> {
        self.change_failure()?;
        let mut remote = self.remote.lock().unwrap();
        let (removed, kept): (Vec<_>, Vec<_>) =
            remote.drain(..).partition(|r| keys.contains(&r.key()));
        *remote = kept;
        let count = removed.len() as u64;
        self.deleted.lock().unwrap().extend(removed);
        Ok(count)
    }

    async fn hard_delete(&self, keys: &[CompositeKey]) -> Result<u64, TransportError> {
        self.change_failure()?;
        let mut count = 0;
        for store in [&self.remote, &self.deleted] {
            let mut records = store.lock().unwrap();
            let before = records.len();
            records.retain(|r| !keys.contains(&r.key()));
            count += (before - records.len()) as u64;
        }
        Ok(count)
    }
}
