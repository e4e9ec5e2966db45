use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use tripwire_common::{RetryConfig, Sample};
use tripwire_evaluator::alarm::{AlarmDefinition, AlarmState, WindowPolicy, parse_definitions};
use tripwire_evaluator::cache::AlarmCache;
use tripwire_evaluator::dispatch::{
    Action, ActionDispatcher, ActionError, ActionExecutor, ActionFields, DefaultExecutor,
};
use tripwire_evaluator::engine::{Clock, ManualClock};
use tripwire_evaluator::metrics::EngineMetrics;
use tripwire_evaluator::store::{AlarmStore, BucketStore, InMemoryStore};
use tripwire_evaluator::{Evaluation, EvaluationEngine};

struct Recorder(mpsc::UnboundedSender<(Action, String)>);

#[async_trait]
impl ActionExecutor for Recorder {
    async fn execute(&self, action: &Action, fields: &ActionFields) -> Result<(), ActionError> {
        let _ = self.0.send((action.clone(), fields["state"].clone()));
        Ok(())
    }
}

const ALARMS: &str = r#"
- id: swift-objects
  name: SwiftObjectAlarm
  counter_name: storage.objects
  comparison_operator: ge
  threshold: 2.0
  statistic: average
  evaluation_period: 2
  aggregate_period: 60
  alarm_actions: ["notify alarm"]
  ok_actions: ["notify ok"]
"#;

struct Setup {
    engine: Arc<EvaluationEngine>,
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    fired: mpsc::UnboundedReceiver<(Action, String)>,
}

async fn setup(definitions: Vec<AlarmDefinition>, policy: WindowPolicy) -> Setup {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let metrics = EngineMetrics::new();
    let (tx, fired) = mpsc::unbounded_channel();

    let engine = EvaluationEngine::new(
        store.clone(),
        Arc::new(AlarmCache::new()),
        ActionDispatcher::new(Arc::new(Recorder(tx)), metrics.clone()),
        metrics,
    )
    .with_clock(clock.clone())
    .with_policy(policy)
    .with_retry(RetryConfig {
        max_attempts: 2,
        initial_delay: StdDuration::from_millis(1),
        backoff_factor: 1.0,
    });
    engine.seed(definitions).await.unwrap();
    engine.reload().await.unwrap();

    Setup {
        engine: Arc::new(engine),
        store,
        clock,
        fired,
    }
}

fn objects(volume: f64) -> Sample {
    Sample::new("storage.objects", volume, "object")
}

fn only(evals: Vec<Evaluation>) -> Evaluation {
    assert_eq!(evals.len(), 1, "{evals:?}");
    evals.into_iter().next().unwrap()
}

#[tokio::test]
async fn all_breach_goes_insufficient_alarm_ok() {
    let mut s = setup(parse_definitions(ALARMS).unwrap(), WindowPolicy::AllBreach).await;

    let e = only(s.engine.record_sample(&objects(3.0)).await);
    assert_eq!(e.state, AlarmState::InsufficientData);
    assert!(!e.transitioned);

    s.clock.advance(Duration::seconds(120));
    let e = only(s.engine.record_sample(&objects(3.0)).await);
    assert_eq!(e.state, AlarmState::Alarm);
    assert!(e.transitioned);
    assert_eq!(
        s.fired.recv().await.unwrap(),
        (Action::Command("notify alarm".into()), "alarm".into())
    );

    s.clock.advance(Duration::seconds(60));
    let e = only(s.engine.record_sample(&objects(1.0)).await);
    assert_eq!(e.state, AlarmState::Ok);
    assert!(e.transitioned);
    assert_eq!(
        s.fired.recv().await.unwrap(),
        (Action::Command("notify ok".into()), "ok".into())
    );

    let buckets = s.store.bucket_list("swift-objects", None, None).await.unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].avg, 1.0);
    assert_eq!(buckets[1].avg, 3.0);

    let stored = s.store.alarm_get("swift-objects").await.unwrap();
    assert_eq!(stored.state, AlarmState::Ok);
    assert_eq!(stored.state_timestamp, s.clock.now());
}

#[tokio::test]
async fn any_breach_holds_alarm_until_breach_leaves_window() {
    let mut s = setup(parse_definitions(ALARMS).unwrap(), WindowPolicy::AnyBreach).await;

    s.engine.record_sample(&objects(3.0)).await;
    s.clock.advance(Duration::seconds(120));
    assert_eq!(only(s.engine.record_sample(&objects(3.0)).await).state, AlarmState::Alarm);
    s.fired.recv().await.unwrap();

    s.clock.advance(Duration::seconds(60));
    let e = only(s.engine.record_sample(&objects(1.0)).await);
    assert_eq!(e.state, AlarmState::Alarm);
    assert!(!e.transitioned);

    s.clock.advance(Duration::seconds(60));
    let e = only(s.engine.record_sample(&objects(1.0)).await);
    assert_eq!(e.state, AlarmState::Ok);
    assert!(e.transitioned);
    assert_eq!(s.fired.recv().await.unwrap().1, "ok");
    assert!(s.fired.try_recv().is_err());
}

#[tokio::test]
async fn insufficient_data_until_window_fills() {
    let defs = parse_definitions(ALARMS)
        .unwrap()
        .into_iter()
        .map(|mut d| {
            d.evaluation_period = 3;
            d
        })
        .collect();
    let s = setup(defs, WindowPolicy::AnyBreach).await;

    for expected in [
        AlarmState::InsufficientData,
        AlarmState::InsufficientData,
        AlarmState::Alarm,
    ] {
        assert_eq!(only(s.engine.record_sample(&objects(5.0)).await).state, expected);
        s.clock.advance(Duration::seconds(60));
    }
}

#[tokio::test]
async fn at_most_evaluation_period_buckets_survive() {
    let defs = parse_definitions(ALARMS)
        .unwrap()
        .into_iter()
        .map(|mut d| {
            d.evaluation_period = 3;
            d
        })
        .collect();
    let s = setup(defs, WindowPolicy::AnyBreach).await;

    for i in 0..10 {
        s.engine.record_sample(&objects(i as f64)).await;
        let stored = s.store.bucket_list("swift-objects", None, None).await.unwrap();
        assert!(stored.len() <= 3, "after sample {i}: {} buckets", stored.len());
        s.clock.advance(Duration::seconds(61));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_samples_land_in_one_bucket() {
    let s = setup(parse_definitions(ALARMS).unwrap(), WindowPolicy::AnyBreach).await;
    const N: usize = 64;

    let handles: Vec<_> = (0..N)
        .map(|i| {
            let engine = s.engine.clone();
            tokio::spawn(async move { engine.record_sample(&objects(i as f64)).await })
        })
        .collect();
    for h in handles {
        assert_eq!(h.await.unwrap().len(), 1);
    }

    let buckets = s.store.bucket_list("swift-objects", None, None).await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].sample_count, N as u64);
    assert_eq!(buckets[0].sum, (0..N).sum::<usize>() as f64);
    assert_eq!(buckets[0].min, 0.0);
    assert_eq!(buckets[0].max, (N - 1) as f64);
}

#[tokio::test]
async fn set_predicate_selects_samples() {
    let defs = parse_definitions(
        r#"
- name: tagged
  counter_name: cpu
  comparison_operator: gt
  threshold: 0
  statistic: count
  evaluation_period: 1
  aggregate_period: 60
  matching_metadata:
    tag: [a, b]
"#,
    )
    .unwrap();
    let s = setup(defs, WindowPolicy::AnyBreach).await;
    let tagged = |tag: &str| Sample::new("cpu", 1.0, "%").with_metadata("tag", tag);

    assert_eq!(s.engine.record_sample(&tagged("a")).await.len(), 1);
    assert_eq!(s.engine.record_sample(&tagged("b")).await.len(), 1);
    assert!(s.engine.record_sample(&tagged("c")).await.is_empty());
    assert!(s.engine.record_sample(&Sample::new("cpu", 1.0, "%")).await.is_empty());
    assert!(
        s.engine
            .record_sample(&Sample::new("mem", 1.0, "%").with_metadata("tag", "a"))
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn one_failing_alarm_does_not_block_others() {
    let defs = parse_definitions(
        r#"
- {id: first, name: first, counter_name: cpu, comparison_operator: gt, threshold: 1, statistic: max, evaluation_period: 1, aggregate_period: 60}
- {id: second, name: second, counter_name: cpu, comparison_operator: gt, threshold: 1, statistic: max, evaluation_period: 1, aggregate_period: 60}
"#,
    )
    .unwrap();
    let s = setup(defs, WindowPolicy::AnyBreach).await;

    // three failures against two attempts per call: exactly one alarm runs
    // out of retries, the other gets through
    s.store.inject_failures(3);
    let evals = s.engine.record_sample(&Sample::new("cpu", 5.0, "%")).await;
    assert_eq!(evals.len(), 1);
    assert_eq!(evals[0].state, AlarmState::Alarm);
    assert_eq!(s.engine.metrics().updates_dropped_val(), 1);
}

#[tokio::test]
async fn shell_actions_see_alarm_fields() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("fired.log");
    let definition = AlarmDefinition::from_json(serde_json::json!({
        "id": "disk-full",
        "name": "DiskFull",
        "counter_name": "disk.usage",
        "comparison_operator": "ge",
        "threshold": 90.0,
        "statistic": "max",
        "evaluation_period": 1,
        "aggregate_period": 300,
        "alarm_actions": [format!("echo \"$TRIPWIRE_ALARM_NAME $TRIPWIRE_ALARM_STATE\" >> {}", out.display())],
    }))
    .unwrap();

    let store = Arc::new(InMemoryStore::new());
    store.alarm_add(&definition).await.unwrap();
    let metrics = EngineMetrics::new();
    let executor = DefaultExecutor::new(StdDuration::from_secs(5), None).unwrap();
    let engine = EvaluationEngine::new(
        store,
        Arc::new(AlarmCache::new()),
        ActionDispatcher::new(Arc::new(executor), metrics.clone()),
        metrics.clone(),
    );
    engine.reload().await.unwrap();

    let evals = engine.record_sample(&Sample::new("disk.usage", 95.0, "%")).await;
    assert!(evals[0].transitioned);

    let mut contents = String::new();
    for _ in 0..100 {
        contents = std::fs::read_to_string(&out).unwrap_or_default();
        if !contents.is_empty() {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    assert_eq!(contents.trim(), "DiskFull alarm");
    assert_eq!(metrics.actions_dispatched_val(), 1);
}
