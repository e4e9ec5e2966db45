use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;

use super::{AlarmFilter, AlarmStore, BucketStore, StoreError};
use crate::alarm::{AlarmDefinition, AlarmState};
use crate::bucket::AggregateBucket;

/// Process-local store for tests and database-less runs.
#[derive(Default)]
pub struct InMemoryStore {
    alarms: DashMap<String, AlarmDefinition>,
    buckets: Mutex<BTreeMap<i64, AggregateBucket>>,
    next_bucket_id: AtomicI64,
    failures: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` calls fail with `StoreError::Unavailable`.
    pub fn inject_failures(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub async fn bucket_count(&self) -> usize {
        self.buckets.lock().await.len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        let tripped = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Unavailable("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AlarmStore for InMemoryStore {
    async fn alarm_list(&self, filter: &AlarmFilter) -> Result<Vec<AlarmDefinition>, StoreError> {
        self.check_available()?;
        let mut alarms: Vec<_> = self
            .alarms
            .iter()
            .filter(|e| filter.accepts(e.value()))
            .map(|e| e.value().clone())
            .collect();
        alarms.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(alarms)
    }

    async fn alarm_get(&self, id: &str) -> Result<AlarmDefinition, StoreError> {
        self.check_available()?;
        self.alarms
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::alarm_not_found(id))
    }

    async fn alarm_add(&self, alarm: &AlarmDefinition) -> Result<(), StoreError> {
        self.check_available()?;
        match self.alarms.entry(alarm.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                kind: "alarm",
                id: alarm.id.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(alarm.clone());
                Ok(())
            }
        }
    }

    async fn alarm_update(&self, alarm: &AlarmDefinition) -> Result<(), StoreError> {
        self.check_available()?;
        let mut entry = self
            .alarms
            .get_mut(&alarm.id)
            .ok_or_else(|| StoreError::alarm_not_found(&alarm.id))?;
        *entry = alarm.clone();
        Ok(())
    }

    async fn alarm_delete(&self, id: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.alarms
            .remove(id)
            .ok_or_else(|| StoreError::alarm_not_found(id))?;
        self.buckets.lock().await.retain(|_, b| b.alarm_id != id);
        Ok(())
    }

    async fn alarm_update_state(
        &self,
        id: &str,
        state: AlarmState,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut entry = self
            .alarms
            .get_mut(id)
            .ok_or_else(|| StoreError::alarm_not_found(id))?;
        entry.state = state;
        entry.state_timestamp = at;
        Ok(())
    }
}

#[async_trait]
impl BucketStore for InMemoryStore {
    async fn bucket_list(
        &self,
        alarm_id: &str,
        limit: Option<usize>,
        earliest: Option<DateTime<Utc>>,
    ) -> Result<Vec<AggregateBucket>, StoreError> {
        self.check_available()?;
        let buckets = self.buckets.lock().await;
        let mut matching: Vec<_> = buckets
            .values()
            .filter(|b| b.alarm_id == alarm_id)
            .filter(|b| earliest.is_none_or(|t| b.start >= t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.start.cmp(&a.start).then(b.id.cmp(&a.id)));
        if let Some(limit) = limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn bucket_get(&self, id: i64) -> Result<AggregateBucket, StoreError> {
        self.check_available()?;
        self.buckets
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::bucket_not_found(id))
    }

    async fn bucket_add(&self, bucket: &AggregateBucket) -> Result<AggregateBucket, StoreError> {
        self.check_available()?;
        let id = self.next_bucket_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = bucket.clone();
        stored.id = Some(id);
        self.buckets.lock().await.insert(id, stored.clone());
        Ok(stored)
    }

    async fn bucket_update(&self, bucket: &AggregateBucket) -> Result<(), StoreError> {
        self.check_available()?;
        let id = bucket
            .id
            .ok_or_else(|| StoreError::Backend("bucket has no id".into()))?;
        let mut buckets = self.buckets.lock().await;
        let slot = buckets.get_mut(&id).ok_or_else(|| StoreError::bucket_not_found(id))?;
        *slot = bucket.clone();
        Ok(())
    }

    async fn bucket_delete(&self, id: i64) -> Result<(), StoreError> {
        self.check_available()?;
        self.buckets
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::bucket_not_found(id))
    }
}
