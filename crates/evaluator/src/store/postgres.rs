use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use std::collections::BTreeMap;

use super::{AlarmFilter, AlarmStore, BucketStore, StoreError};
use crate::alarm::{AlarmDefinition, AlarmSpec, AlarmState, MatchValue};
use crate::bucket::AggregateBucket;

const ALARM_COLUMNS: &str = "id, name, description, enabled, counter_name, user_id, project_id, \
     matching_metadata, comparison_operator, threshold, statistic, evaluation_period, \
     aggregate_period, ok_actions, alarm_actions, insufficient_data_actions, state, \
     state_timestamp, updated_at";

const BUCKET_COLUMNS: &str = "id, alarm_id, unit, start_at, min_value, max_value, sum_value, \
     avg_value, sample_count";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AlarmRow {
    id: String,
    name: String,
    description: Option<String>,
    enabled: bool,
    counter_name: String,
    user_id: Option<String>,
    project_id: Option<String>,
    matching_metadata: Json<BTreeMap<String, MatchValue>>,
    comparison_operator: String,
    threshold: f64,
    statistic: String,
    evaluation_period: i32,
    aggregate_period: i64,
    ok_actions: Json<Vec<String>>,
    alarm_actions: Json<Vec<String>>,
    insufficient_data_actions: Json<Vec<String>>,
    state: String,
    state_timestamp: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AlarmRow> for AlarmDefinition {
    type Error = StoreError;

    fn try_from(row: AlarmRow) -> Result<Self, StoreError> {
        let state = AlarmState::parse(&row.state)
            .ok_or_else(|| StoreError::Backend(format!("alarm {}: bad state '{}'", row.id, row.state)))?;
        let spec = AlarmSpec {
            id: Some(row.id),
            name: row.name,
            description: row.description,
            enabled: row.enabled,
            counter_name: row.counter_name,
            user_id: row.user_id,
            project_id: row.project_id,
            matching_metadata: row.matching_metadata.0,
            comparison_operator: row.comparison_operator,
            threshold: row.threshold,
            statistic: row.statistic,
            evaluation_period: u32::try_from(row.evaluation_period).unwrap_or(0),
            aggregate_period: u64::try_from(row.aggregate_period).unwrap_or(0),
            ok_actions: row.ok_actions.0,
            alarm_actions: row.alarm_actions.0,
            insufficient_data_actions: row.insufficient_data_actions.0,
            state: Some(state),
            state_timestamp: Some(row.state_timestamp),
            timestamp: Some(row.updated_at),
        };
        AlarmDefinition::from_spec(spec).map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BucketRow {
    id: i64,
    alarm_id: String,
    unit: String,
    start_at: DateTime<Utc>,
    min_value: f64,
    max_value: f64,
    sum_value: f64,
    avg_value: f64,
    sample_count: i64,
}

impl From<BucketRow> for AggregateBucket {
    fn from(row: BucketRow) -> Self {
        Self {
            id: Some(row.id),
            alarm_id: row.alarm_id,
            unit: row.unit,
            start: row.start_at,
            min: row.min_value,
            max: row.max_value,
            sum: row.sum_value,
            avg: row.avg_value,
            sample_count: u64::try_from(row.sample_count).unwrap_or(0),
        }
    }
}

fn clamp_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[async_trait]
impl AlarmStore for PgStore {
    async fn alarm_list(&self, filter: &AlarmFilter) -> Result<Vec<AlarmDefinition>, StoreError> {
        let sql = format!(
            "SELECT {ALARM_COLUMNS} FROM alarms \
             WHERE ($1::text IS NULL OR name = $1) \
               AND ($2::text IS NULL OR counter_name = $2) \
               AND ($3::text IS NULL OR user_id = $3) \
               AND ($4::text IS NULL OR project_id = $4) \
               AND ($5::boolean IS NULL OR enabled = $5) \
             ORDER BY id"
        );
        let rows = sqlx::query_as::<_, AlarmRow>(&sql)
            .bind(&filter.name)
            .bind(&filter.counter_name)
            .bind(&filter.user_id)
            .bind(&filter.project_id)
            .bind(filter.enabled)
            .fetch_all(&self.pool)
            .await?;

        let mut alarms = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id.clone();
            match AlarmDefinition::try_from(row) {
                Ok(def) => alarms.push(def),
                Err(e) => tracing::warn!(alarm_id = %id, error = %e, "skipping invalid stored alarm"),
            }
        }
        Ok(alarms)
    }

    async fn alarm_get(&self, id: &str) -> Result<AlarmDefinition, StoreError> {
        let sql = format!("SELECT {ALARM_COLUMNS} FROM alarms WHERE id = $1");
        let row = sqlx::query_as::<_, AlarmRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::alarm_not_found(id))?;
        row.try_into()
    }

    async fn alarm_add(&self, alarm: &AlarmDefinition) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO alarms
               (id, name, description, enabled, counter_name, user_id, project_id,
                matching_metadata, comparison_operator, threshold, statistic,
                evaluation_period, aggregate_period, ok_actions, alarm_actions,
                insufficient_data_actions, state, state_timestamp, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                       $14, $15, $16, $17, $18, $19)
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(&alarm.id)
        .bind(&alarm.name)
        .bind(&alarm.description)
        .bind(alarm.enabled)
        .bind(&alarm.counter_name)
        .bind(&alarm.user_id)
        .bind(&alarm.project_id)
        .bind(Json(&alarm.matching_metadata))
        .bind(alarm.comparison_operator.as_str())
        .bind(alarm.threshold)
        .bind(alarm.statistic.as_str())
        .bind(i32::try_from(alarm.evaluation_period).unwrap_or(i32::MAX))
        .bind(clamp_i64(alarm.aggregate_period))
        .bind(Json(&alarm.ok_actions))
        .bind(Json(&alarm.alarm_actions))
        .bind(Json(&alarm.insufficient_data_actions))
        .bind(alarm.state.as_str())
        .bind(alarm.state_timestamp)
        .bind(alarm.timestamp)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate {
                kind: "alarm",
                id: alarm.id.clone(),
            });
        }
        Ok(())
    }

    async fn alarm_update(&self, alarm: &AlarmDefinition) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE alarms SET
                 name = $2, description = $3, enabled = $4, counter_name = $5,
                 user_id = $6, project_id = $7, matching_metadata = $8,
                 comparison_operator = $9, threshold = $10, statistic = $11,
                 evaluation_period = $12, aggregate_period = $13, ok_actions = $14,
                 alarm_actions = $15, insufficient_data_actions = $16, state = $17,
                 state_timestamp = $18, updated_at = $19
               WHERE id = $1"#,
        )
        .bind(&alarm.id)
        .bind(&alarm.name)
        .bind(&alarm.description)
        .bind(alarm.enabled)
        .bind(&alarm.counter_name)
        .bind(&alarm.user_id)
        .bind(&alarm.project_id)
        .bind(Json(&alarm.matching_metadata))
        .bind(alarm.comparison_operator.as_str())
        .bind(alarm.threshold)
        .bind(alarm.statistic.as_str())
        .bind(i32::try_from(alarm.evaluation_period).unwrap_or(i32::MAX))
        .bind(clamp_i64(alarm.aggregate_period))
        .bind(Json(&alarm.ok_actions))
        .bind(Json(&alarm.alarm_actions))
        .bind(Json(&alarm.insufficient_data_actions))
        .bind(alarm.state.as_str())
        .bind(alarm.state_timestamp)
        .bind(alarm.timestamp)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::alarm_not_found(&alarm.id));
        }
        Ok(())
    }

    async fn alarm_delete(&self, id: &str) -> Result<(), StoreError> {
        // aggregate_buckets rows go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM alarms WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::alarm_not_found(id));
        }
        Ok(())
    }

    async fn alarm_update_state(
        &self,
        id: &str,
        state: AlarmState,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE alarms SET state = $2, state_timestamp = $3 WHERE id = $1")
            .bind(id)
            .bind(state.as_str())
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::alarm_not_found(id));
        }
        Ok(())
    }
}

#[async_trait]
impl BucketStore for PgStore {
    async fn bucket_list(
        &self,
        alarm_id: &str,
        limit: Option<usize>,
        earliest: Option<DateTime<Utc>>,
    ) -> Result<Vec<AggregateBucket>, StoreError> {
        let sql = format!(
            "SELECT {BUCKET_COLUMNS} FROM aggregate_buckets \
             WHERE alarm_id = $1 AND ($2::timestamptz IS NULL OR start_at >= $2) \
             ORDER BY start_at DESC, id DESC \
             LIMIT $3"
        );
        let rows = sqlx::query_as::<_, BucketRow>(&sql)
            .bind(alarm_id)
            .bind(earliest)
            .bind(limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX)))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(AggregateBucket::from).collect())
    }

    async fn bucket_get(&self, id: i64) -> Result<AggregateBucket, StoreError> {
        let sql = format!("SELECT {BUCKET_COLUMNS} FROM aggregate_buckets WHERE id = $1");
        sqlx::query_as::<_, BucketRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(AggregateBucket::from)
            .ok_or_else(|| StoreError::bucket_not_found(id))
    }

    async fn bucket_add(&self, bucket: &AggregateBucket) -> Result<AggregateBucket, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO aggregate_buckets
               (alarm_id, unit, start_at, min_value, max_value, sum_value, avg_value, sample_count)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING id"#,
        )
        .bind(&bucket.alarm_id)
        .bind(&bucket.unit)
        .bind(bucket.start)
        .bind(bucket.min)
        .bind(bucket.max)
        .bind(bucket.sum)
        .bind(bucket.avg)
        .bind(clamp_i64(bucket.sample_count))
        .fetch_one(&self.pool)
        .await?;

        let mut stored = bucket.clone();
        stored.id = Some(id);
        Ok(stored)
    }

    async fn bucket_update(&self, bucket: &AggregateBucket) -> Result<(), StoreError> {
        let id = bucket
            .id
            .ok_or_else(|| StoreError::Backend("bucket has no id".into()))?;
        let result = sqlx::query(
            r#"UPDATE aggregate_buckets SET
                 unit = $2, min_value = $3, max_value = $4, sum_value = $5,
                 avg_value = $6, sample_count = $7
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(&bucket.unit)
        .bind(bucket.min)
        .bind(bucket.max)
        .bind(bucket.sum)
        .bind(bucket.avg)
        .bind(clamp_i64(bucket.sample_count))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::bucket_not_found(id));
        }
        Ok(())
    }

    async fn bucket_delete(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM aggregate_buckets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::bucket_not_found(id));
        }
        Ok(())
    }
}
