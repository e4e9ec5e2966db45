mod error;
mod in_memory;
pub mod migrator;
mod pool;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::alarm::{AlarmDefinition, AlarmState};
use crate::bucket::AggregateBucket;

pub use error::StoreError;
pub use in_memory::InMemoryStore;
pub use pool::create_pool;
pub use postgres::PgStore;

/// Optional filters for `alarm_list`; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlarmFilter {
    pub name: Option<String>,
    pub counter_name: Option<String>,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub enabled: Option<bool>,
}

impl AlarmFilter {
    pub fn enabled() -> Self {
        Self {
            enabled: Some(true),
            ..Default::default()
        }
    }

    pub fn accepts(&self, def: &AlarmDefinition) -> bool {
        fn eq(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().is_none_or(|f| f == value)
        }
        fn eq_opt(filter: &Option<String>, value: &Option<String>) -> bool {
            filter.is_none() || filter == value
        }

        eq(&self.name, &def.name)
            && eq(&self.counter_name, &def.counter_name)
            && eq_opt(&self.user_id, &def.user_id)
            && eq_opt(&self.project_id, &def.project_id)
            && self.enabled.is_none_or(|e| e == def.enabled)
    }
}

#[async_trait]
pub trait AlarmStore: Send + Sync {
    async fn alarm_list(&self, filter: &AlarmFilter) -> Result<Vec<AlarmDefinition>, StoreError>;
    async fn alarm_get(&self, id: &str) -> Result<AlarmDefinition, StoreError>;
    async fn alarm_add(&self, alarm: &AlarmDefinition) -> Result<(), StoreError>;
    async fn alarm_update(&self, alarm: &AlarmDefinition) -> Result<(), StoreError>;
    /// Also deletes every bucket of the alarm.
    async fn alarm_delete(&self, id: &str) -> Result<(), StoreError>;
    async fn alarm_update_state(
        &self,
        id: &str,
        state: AlarmState,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Newest first. `earliest` excludes buckets that started before it.
    async fn bucket_list(
        &self,
        alarm_id: &str,
        limit: Option<usize>,
        earliest: Option<DateTime<Utc>>,
    ) -> Result<Vec<AggregateBucket>, StoreError>;
    async fn bucket_get(&self, id: i64) -> Result<AggregateBucket, StoreError>;
    /// Returns the stored bucket with its assigned id.
    async fn bucket_add(&self, bucket: &AggregateBucket) -> Result<AggregateBucket, StoreError>;
    async fn bucket_update(&self, bucket: &AggregateBucket) -> Result<(), StoreError>;
    async fn bucket_delete(&self, id: i64) -> Result<(), StoreError>;
}

pub trait Store: AlarmStore + BucketStore {}

impl<T: AlarmStore + BucketStore> Store for T {}
