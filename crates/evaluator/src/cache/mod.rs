use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tripwire_common::Sample;

use crate::alarm::{AlarmDefinition, AlarmState, matches};
use crate::bucket::AggregateBucket;

type AlarmMap = HashMap<String, Arc<AlarmDefinition>>;

/// In-memory view of the enabled alarm definitions and the buckets loaded
/// for them so far.
///
/// Definitions are published as a whole snapshot; readers never observe a
/// half-applied reload. Buckets are keyed by alarm id, newest first, and
/// absent until first loaded from the store.
///
/// Every per-alarm write bumps a revision counter and records it against
/// the alarm id, so a reload built from an older store read can tell which
/// entries it must leave alone.
pub struct AlarmCache {
    alarms: ArcSwap<AlarmMap>,
    buckets: DashMap<String, Vec<AggregateBucket>>,
    revision: AtomicU64,
    touched: DashMap<String, u64>,
}

impl Default for AlarmCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmCache {
    pub fn new() -> Self {
        Self {
            alarms: ArcSwap::from_pointee(HashMap::new()),
            buckets: DashMap::new(),
            revision: AtomicU64::new(0),
            touched: DashMap::new(),
        }
    }

    /// Current write revision. Take it before reading the store for a
    /// reload and hand it to [`AlarmCache::publish_since`].
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    // Recorded before the map changes, so a concurrent publish either sees
    // the mark or runs before the write lands.
    fn touch(&self, id: &str) {
        let rev = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        self.touched.insert(id.to_string(), rev);
    }

    fn touched_after(&self, id: &str, mark: u64) -> bool {
        self.touched.get(id).is_some_and(|rev| *rev > mark)
    }

    pub fn get(&self, id: &str) -> Option<Arc<AlarmDefinition>> {
        self.alarms.load().get(id).cloned()
    }

    pub fn snapshot(&self) -> Arc<AlarmMap> {
        self.alarms.load_full()
    }

    /// Enabled definitions whose predicates accept `sample`, ordered by id.
    pub fn matching(&self, sample: &Sample) -> Vec<Arc<AlarmDefinition>> {
        let alarms = self.alarms.load();
        let mut hits: Vec<_> = alarms
            .values()
            .filter(|def| def.enabled && matches(def, sample))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        hits
    }

    /// Inserts or replaces one definition. Disabled definitions are removed
    /// instead; their buckets are kept for when they come back.
    pub fn upsert(&self, definition: AlarmDefinition) {
        let id = definition.id.clone();
        self.touch(&id);
        if !definition.enabled {
            self.alarms.rcu(|current| {
                let mut next = AlarmMap::clone(current);
                next.remove(&id);
                next
            });
            return;
        }
        let definition = Arc::new(definition);
        self.alarms.rcu(|current| {
            let mut next = AlarmMap::clone(current);
            next.insert(id.clone(), Arc::clone(&definition));
            next
        });
    }

    /// Moves a cached definition to `state`, leaving every other field as
    /// currently published. Returns `false` when the alarm is not cached.
    pub fn update_state(&self, id: &str, state: AlarmState, at: DateTime<Utc>) -> bool {
        self.touch(id);
        let mut found = false;
        self.alarms.rcu(|current| {
            let mut next = AlarmMap::clone(current);
            found = match next.get_mut(id) {
                Some(def) => {
                    let def = Arc::make_mut(def);
                    def.state = state;
                    def.state_timestamp = at;
                    true
                }
                None => false,
            };
            next
        });
        found
    }

    pub fn remove(&self, id: &str) -> Option<Arc<AlarmDefinition>> {
        self.touch(id);
        let mut removed = None;
        self.alarms.rcu(|current| {
            let mut next = AlarmMap::clone(current);
            removed = next.remove(id);
            next
        });
        self.buckets.remove(id);
        removed
    }

    /// Replaces the whole definition set at once. Buckets of alarms that
    /// are no longer present are dropped.
    pub fn publish(&self, definitions: Vec<AlarmDefinition>) {
        self.publish_since(definitions, u64::MAX);
    }

    /// Like [`AlarmCache::publish`] for a definition list read from the
    /// store after revision `mark`. Alarms written to the cache after `mark`
    /// keep their current entry (or stay absent), since those writes were
    /// committed durably after or while the list was read.
    pub fn publish_since(&self, definitions: Vec<AlarmDefinition>, mark: u64) {
        let loaded: AlarmMap = definitions
            .into_iter()
            .filter(|d| d.enabled)
            .map(|d| (d.id.clone(), Arc::new(d)))
            .collect();

        self.alarms.rcu(|current| {
            let mut next: AlarmMap = loaded
                .iter()
                .filter(|(id, _)| !self.touched_after(id, mark))
                .map(|(id, def)| (id.clone(), Arc::clone(def)))
                .collect();
            for (id, def) in current.iter() {
                if self.touched_after(id, mark) {
                    next.insert(id.clone(), Arc::clone(def));
                }
            }
            next
        });
        let live = self.alarms.load();
        self.buckets.retain(|id, _| live.contains_key(id));
        self.touched.retain(|_, rev| *rev > mark);
    }

    pub fn buckets(&self, alarm_id: &str) -> Option<Vec<AggregateBucket>> {
        self.buckets.get(alarm_id).map(|b| b.value().clone())
    }

    pub fn set_buckets(&self, alarm_id: &str, buckets: Vec<AggregateBucket>) {
        self.buckets.insert(alarm_id.to_string(), buckets);
    }

    pub fn len(&self) -> usize {
        self.alarms.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.alarms.store(Arc::new(HashMap::new()));
        self.buckets.clear();
        self.touched.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::test_support::definition;

    #[test]
    fn publish_replaces_everything() {
        let cache = AlarmCache::new();
        cache.publish(vec![definition(|_| {}), definition(|d| d.id = "a-2".into())]);
        assert_eq!(cache.len(), 2);

        cache.publish(vec![definition(|d| d.id = "a-3".into())]);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("a-1").is_none());
        assert!(cache.get("a-3").is_some());
    }

    #[test]
    fn publish_skips_disabled_and_drops_orphan_buckets() {
        let cache = AlarmCache::new();
        cache.set_buckets("a-1", vec![AggregateBucket::open("a-1", Utc::now(), 1.0, "")]);
        cache.set_buckets("a-2", vec![]);
        cache.publish(vec![definition(|_| {}), definition(|d| {
            d.id = "a-2".into();
            d.enabled = false;
        })]);
        assert_eq!(cache.len(), 1);
        assert!(cache.buckets("a-1").is_some());
        assert!(cache.buckets("a-2").is_none());
    }

    #[test]
    fn matching_filters_by_sample() {
        let cache = AlarmCache::new();
        cache.publish(vec![
            definition(|d| d.id = "b".into()),
            definition(|d| d.id = "a".into()),
            definition(|d| {
                d.id = "c".into();
                d.counter_name = "cpu".into();
            }),
        ]);
        let hits = cache.matching(&Sample::new("storage.objects", 1.0, ""));
        let ids: Vec<_> = hits.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn upsert_disabled_removes() {
        let cache = AlarmCache::new();
        cache.upsert(definition(|_| {}));
        assert_eq!(cache.len(), 1);
        cache.upsert(definition(|d| d.enabled = false));
        assert!(cache.is_empty());
    }

    #[test]
    fn update_state_keeps_other_fields() {
        let cache = AlarmCache::new();
        cache.upsert(definition(|_| {}));
        cache.upsert(definition(|d| d.threshold = 7.0));

        let at = Utc::now();
        assert!(cache.update_state("a-1", AlarmState::Alarm, at));
        let def = cache.get("a-1").unwrap();
        assert_eq!(def.state, AlarmState::Alarm);
        assert_eq!(def.state_timestamp, at);
        assert_eq!(def.threshold, 7.0);

        assert!(!cache.update_state("missing", AlarmState::Ok, at));
    }

    #[test]
    fn snapshot_is_stable_across_updates() {
        let cache = AlarmCache::new();
        cache.upsert(definition(|_| {}));
        let before = cache.snapshot();
        cache.remove("a-1");
        assert_eq!(before.len(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn publish_since_keeps_entries_written_after_the_mark() {
        let cache = AlarmCache::new();
        cache.publish(vec![
            definition(|_| {}),
            definition(|d| d.id = "a-2".into()),
            definition(|d| d.id = "a-3".into()),
        ]);
        let mark = cache.revision();
        let stale = vec![
            definition(|_| {}),
            definition(|d| d.id = "a-2".into()),
            definition(|d| d.id = "a-3".into()),
        ];

        let at = Utc::now();
        cache.update_state("a-1", AlarmState::Alarm, at);
        cache.remove("a-2");
        cache.upsert(definition(|d| d.id = "a-4".into()));

        cache.publish_since(stale, mark);
        assert_eq!(cache.get("a-1").unwrap().state, AlarmState::Alarm);
        assert!(cache.get("a-2").is_none());
        assert!(cache.get("a-3").is_some());
        assert!(cache.get("a-4").is_some());
    }

    #[test]
    fn publish_overrides_everything_written_before() {
        let cache = AlarmCache::new();
        cache.upsert(definition(|_| {}));
        cache.update_state("a-1", AlarmState::Alarm, Utc::now());
        cache.publish(vec![definition(|_| {})]);
        assert_eq!(cache.get("a-1").unwrap().state, AlarmState::InsufficientData);
    }

    #[test]
    fn remove_drops_buckets() {
        let cache = AlarmCache::new();
        cache.upsert(definition(|_| {}));
        cache.set_buckets("a-1", vec![]);
        assert!(cache.remove("a-1").is_some());
        assert!(cache.buckets("a-1").is_none());
    }
}
