mod clock;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tripwire_common::{RetryConfig, Sample, retry_async};

use crate::alarm::{AlarmDefinition, AlarmState, WindowPolicy, evaluate_window, matches};
use crate::bucket::{AggregateBucket, IngestOutcome, ingest, prune};
use crate::cache::AlarmCache;
use crate::dispatch::ActionDispatcher;
use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::store::{AlarmFilter, Store, StoreError};

pub use clock::{Clock, ManualClock, SystemClock};

/// Outcome of evaluating one alarm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub alarm_id: String,
    pub state: AlarmState,
    pub transitioned: bool,
}

/// Result of [`EvaluationEngine::put_alarm`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredAlarm {
    pub definition: AlarmDefinition,
    pub created: bool,
}

pub struct EvaluationEngine {
    store: Arc<dyn Store>,
    cache: Arc<AlarmCache>,
    dispatcher: ActionDispatcher,
    metrics: Arc<EngineMetrics>,
    clock: Arc<dyn Clock>,
    policy: WindowPolicy,
    retry: RetryConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
    ready: AtomicBool,
}

impl EvaluationEngine {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<AlarmCache>,
        dispatcher: ActionDispatcher,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            cache,
            dispatcher,
            metrics,
            clock: Arc::new(SystemClock),
            policy: WindowPolicy::default(),
            retry: RetryConfig::default(),
            locks: DashMap::new(),
            ready: AtomicBool::new(false),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: WindowPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &Arc<AlarmCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// True once the first reload has published the cache.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Feeds one sample to every enabled alarm it matches. Alarms are
    /// processed concurrently; an alarm whose store writes fail is left out
    /// of the result.
    pub async fn record_sample(&self, sample: &Sample) -> Vec<Evaluation> {
        self.metrics.inc_samples_received();
        let matched = self.cache.matching(sample);
        if matched.is_empty() {
            return Vec::new();
        }
        self.metrics.add_samples_matched(matched.len() as u64);

        let work = matched.iter().map(|def| self.process_sample(&def.id, sample));
        futures::future::join_all(work)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn process_sample(&self, alarm_id: &str, sample: &Sample) -> Option<Evaluation> {
        let start = Instant::now();
        let lock = self.lock_for(alarm_id);
        let _guard = lock.lock().await;

        // The definition may have changed or gone while we waited.
        let def = self.cache.get(alarm_id)?;
        if !matches(&def, sample) {
            return None;
        }

        let result = self.ingest_and_evaluate(&def, sample).await;
        self.metrics.record_evaluation_latency(start);
        match result {
            Ok(evaluation) => Some(evaluation),
            Err(e) => {
                self.metrics.inc_updates_dropped();
                tracing::error!(alarm_id, error = %e, "dropping alarm update for sample");
                None
            }
        }
    }

    async fn ingest_and_evaluate(
        &self,
        def: &AlarmDefinition,
        sample: &Sample,
    ) -> Result<Evaluation, StoreError> {
        let now = self.clock.now();
        let mut buckets = self.load_buckets(&def.id).await?;

        match ingest(&def.id, sample, &buckets, now, def.aggregate_duration()) {
            IngestOutcome::Created(bucket) => {
                let stored = self.persist(|| self.store.bucket_add(&bucket)).await?;
                self.metrics.inc_buckets_created();
                tracing::debug!(alarm_id = %def.id, start = %stored.start, "opened bucket");
                buckets.insert(0, stored);
            }
            IngestOutcome::Updated(bucket) => {
                self.persist(|| self.store.bucket_update(&bucket)).await?;
                buckets[0] = bucket;
            }
        }
        self.cache.set_buckets(&def.id, buckets.clone());

        let buckets = self.prune_buckets(def, buckets).await;
        let state = evaluate_window(def, &buckets, self.policy);
        self.apply_state(def, state, now).await
    }

    /// Deletes buckets past the window, durably first. A bucket whose delete
    /// fails stays cached and is retried on the next ingest.
    async fn prune_buckets(
        &self,
        def: &AlarmDefinition,
        buckets: Vec<AggregateBucket>,
    ) -> Vec<AggregateBucket> {
        let keep = def.evaluation_period as usize;
        let stale = prune(&buckets, keep);
        if stale.is_empty() {
            return buckets;
        }

        let mut failed = Vec::new();
        for bucket in stale {
            let Some(id) = bucket.id else { continue };
            match self.persist(|| self.store.bucket_delete(id)).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::warn!(alarm_id = %def.id, bucket_id = id, error = %e, "bucket prune failed");
                    failed.push(bucket.clone());
                }
            }
        }
        let pruned = stale.len() - failed.len();
        self.metrics.add_buckets_pruned(pruned as u64);

        let mut retained = buckets;
        retained.truncate(keep);
        retained.extend(failed);
        self.cache.set_buckets(&def.id, retained.clone());
        retained
    }

    async fn apply_state(
        &self,
        def: &AlarmDefinition,
        state: AlarmState,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, StoreError> {
        let Some(next) = def.transitioned(state, now) else {
            return Ok(Evaluation {
                alarm_id: def.id.clone(),
                state,
                transitioned: false,
            });
        };

        self.persist(|| self.store.alarm_update_state(&def.id, state, now))
            .await?;
        self.cache.update_state(&def.id, state, now);
        self.metrics.inc_state_transitions();
        tracing::info!(
            alarm_id = %def.id,
            alarm = %def.name,
            from = %def.state,
            to = %state,
            "alarm state changed"
        );
        self.dispatcher.dispatch(&next, state);

        Ok(Evaluation {
            alarm_id: def.id.clone(),
            state,
            transitioned: true,
        })
    }

    /// Re-evaluates an alarm against its current buckets without ingesting.
    pub async fn evaluate_alarm(&self, alarm_id: &str) -> Result<Evaluation, EngineError> {
        let lock = self.lock_for(alarm_id);
        let _guard = lock.lock().await;

        let def = self
            .cache
            .get(alarm_id)
            .ok_or_else(|| StoreError::alarm_not_found(alarm_id))?;
        let buckets = self.load_buckets(alarm_id).await?;
        let state = evaluate_window(&def, &buckets, self.policy);
        Ok(self.apply_state(&def, state, self.clock.now()).await?)
    }

    async fn load_buckets(&self, alarm_id: &str) -> Result<Vec<AggregateBucket>, StoreError> {
        if let Some(buckets) = self.cache.buckets(alarm_id) {
            return Ok(buckets);
        }
        let buckets = self
            .persist(|| self.store.bucket_list(alarm_id, None, None))
            .await?;
        self.cache.set_buckets(alarm_id, buckets.clone());
        Ok(buckets)
    }

    pub async fn get_alarm(&self, alarm_id: &str) -> Result<AlarmDefinition, EngineError> {
        Ok(self.persist(|| self.store.alarm_get(alarm_id)).await?)
    }

    /// Stores `definition` (update, or add when unknown) and then replaces
    /// the cached copy. Buckets already collected are kept.
    pub async fn add_or_update_alarm(
        &self,
        definition: AlarmDefinition,
    ) -> Result<AlarmDefinition, EngineError> {
        Ok(self.put_alarm(definition, false).await?.definition)
    }

    /// Adds or updates `definition`. With `keep_state`, an alarm that is
    /// already stored keeps its current state and state timestamp; both are
    /// read under the alarm's lock, so a transition committed in between is
    /// never written back over.
    pub async fn put_alarm(
        &self,
        mut definition: AlarmDefinition,
        keep_state: bool,
    ) -> Result<StoredAlarm, EngineError> {
        let lock = self.lock_for(&definition.id);
        let _guard = lock.lock().await;

        let existing = match self.persist(|| self.store.alarm_get(&definition.id)).await {
            Ok(def) => Some(def),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        if let (true, Some(existing)) = (keep_state, &existing) {
            definition.state = existing.state;
            definition.state_timestamp = existing.state_timestamp;
        }

        if existing.is_some() {
            self.persist(|| self.store.alarm_update(&definition)).await?;
        } else {
            self.persist(|| self.store.alarm_add(&definition)).await?;
        }
        tracing::info!(
            alarm_id = %definition.id,
            enabled = definition.enabled,
            created = existing.is_none(),
            "alarm definition stored"
        );
        self.cache.upsert(definition.clone());
        Ok(StoredAlarm {
            definition,
            created: existing.is_none(),
        })
    }

    /// Deletes the alarm and its buckets from the store, then from the cache.
    pub async fn delete_alarm(&self, alarm_id: &str) -> Result<(), EngineError> {
        let lock = self.lock_for(alarm_id);
        {
            let _guard = lock.lock().await;
            self.persist(|| self.store.alarm_delete(alarm_id)).await?;
            self.cache.remove(alarm_id);
        }
        drop(lock);
        // A sample may still be queued on this mutex; it must stay the one
        // handed out for the id until nobody holds it.
        self.locks
            .remove_if(alarm_id, |_, lock| Arc::strong_count(lock) == 1);
        tracing::info!(alarm_id, "alarm deleted");
        Ok(())
    }

    /// Re-reads one definition after an out-of-band change.
    pub async fn refresh_alarm(&self, alarm_id: &str) -> Result<(), EngineError> {
        let lock = self.lock_for(alarm_id);
        let _guard = lock.lock().await;

        match self.persist(|| self.store.alarm_get(alarm_id)).await {
            Ok(def) => {
                self.cache.upsert(def);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                self.cache.remove(alarm_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rebuilds the cache from every enabled alarm in the store and
    /// publishes it in one swap. Alarms written through the engine while the
    /// list was being read keep their newer cached entry.
    pub async fn reload(&self) -> Result<usize, EngineError> {
        let filter = AlarmFilter::enabled();
        let mark = self.cache.revision();
        let definitions = self.persist(|| self.store.alarm_list(&filter)).await?;
        let count = definitions.len();
        self.cache.publish_since(definitions, mark);
        self.ready.store(true, Ordering::Release);
        tracing::info!(alarms = count, "alarm cache reloaded");
        Ok(count)
    }

    /// Adds seed definitions that the store does not know yet.
    pub async fn seed(&self, definitions: Vec<AlarmDefinition>) -> Result<usize, EngineError> {
        let mut added = 0;
        for def in definitions {
            match self.persist(|| self.store.alarm_add(&def)).await {
                Ok(()) => added += 1,
                Err(StoreError::Duplicate { .. }) => {
                    tracing::debug!(alarm_id = %def.id, "seed alarm already stored");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(added)
    }

    pub fn shutdown(&self) {
        self.ready.store(false, Ordering::Release);
        self.cache.clear();
        self.locks.clear();
        tracing::info!("evaluation engine stopped");
    }

    fn lock_for(&self, alarm_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(alarm_id.to_string()).or_default())
    }

    async fn persist<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let result = retry_async(&self.retry, StoreError::is_transient, op).await;
        if result.is_err() {
            self.metrics.inc_store_errors();
        }
        result
    }
}
