use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use tokio::net::TcpListener;

use super::{alarms, health, metrics, samples};
use crate::engine::EvaluationEngine;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<EvaluationEngine>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/ready", get(health::ready))
        .route("/metrics", get(metrics::metrics))
        .route("/samples", post(samples::record_samples))
        .route("/alarms/reload", post(alarms::reload))
        .route(
            "/alarms/{alarm_id}",
            put(alarms::put_alarm).delete(alarms::delete_alarm),
        )
        .route("/alarms/{alarm_id}/refresh", post(alarms::refresh_alarm))
        .with_state(state)
}

pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::{AlarmState, test_support::definition};
    use crate::cache::AlarmCache;
    use crate::dispatch::ActionDispatcher;
    use crate::dispatch::testing::RecordingExecutor;
    use crate::metrics::EngineMetrics;
    use crate::store::{AlarmStore, InMemoryStore};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn app(store: Arc<InMemoryStore>, load: bool) -> Router {
        let metrics = EngineMetrics::new();
        let (executor, _rx) = RecordingExecutor::new();
        let engine = EvaluationEngine::new(
            store,
            Arc::new(AlarmCache::new()),
            ActionDispatcher::new(executor, metrics.clone()),
            metrics,
        );
        if load {
            engine.reload().await.unwrap();
        }
        router(ApiState {
            engine: Arc::new(engine),
        })
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, String) {
        let req = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(json) => req
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn spec() -> Value {
        json!({
            "name": "objects",
            "counter_name": "storage.objects",
            "comparison_operator": "ge",
            "threshold": 2.0,
            "statistic": "avg",
            "evaluation_period": 1,
            "aggregate_period": 60,
        })
    }

    #[tokio::test]
    async fn health_and_ready_respond() {
        let app = app(Arc::new(InMemoryStore::new()), true).await;

        let (status, body) = send(app.clone(), "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("ok"));

        let (status, _) = send(app.clone(), "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(app, "GET", "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("tripwire_evaluator_alarms_loaded 0"));
    }

    #[tokio::test]
    async fn not_ready_before_first_load() {
        let app = app(Arc::new(InMemoryStore::new()), false).await;
        let (status, _) = send(app.clone(), "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = send(app.clone(), "POST", "/alarms/reload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"alarms":0}"#);
        let (status, _) = send(app, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn put_creates_then_updates() {
        let store = Arc::new(InMemoryStore::new());
        let app = app(store.clone(), true).await;

        let (status, body) = send(app.clone(), "PUT", "/alarms/a-9", Some(spec())).await;
        assert_eq!(status, StatusCode::CREATED);
        let created: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(created["id"], "a-9");
        assert_eq!(created["state"], "insufficient data");

        store
            .alarm_update_state("a-9", AlarmState::Alarm, chrono::Utc::now())
            .await
            .unwrap();

        let mut changed = spec();
        changed["threshold"] = json!(5.0);
        let (status, body) = send(app, "PUT", "/alarms/a-9", Some(changed)).await;
        assert_eq!(status, StatusCode::OK);
        let updated: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(updated["threshold"], 5.0);
        assert_eq!(updated["state"], "alarm");
    }

    #[tokio::test]
    async fn put_rejects_invalid_definitions() {
        let app = app(Arc::new(InMemoryStore::new()), true).await;

        let mut bad = spec();
        bad["comparison_operator"] = json!("gte");
        let (status, body) = send(app.clone(), "PUT", "/alarms/x", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("gte"));

        let mut unknown = spec();
        unknown["colour"] = json!("red");
        let (status, _) = send(app.clone(), "PUT", "/alarms/x", Some(unknown)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut mismatched = spec();
        mismatched["id"] = json!("y");
        let (status, _) = send(app, "PUT", "/alarms/x", Some(mismatched)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_known_and_unknown() {
        let store = Arc::new(InMemoryStore::new());
        store.alarm_add(&definition(|_| {})).await.unwrap();
        let app = app(store.clone(), true).await;

        let (status, _) = send(app.clone(), "DELETE", "/alarms/a-1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(app, "DELETE", "/alarms/a-1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(store.alarm_get("a-1").await.is_err());
    }

    #[tokio::test]
    async fn samples_single_and_batch() {
        let store = Arc::new(InMemoryStore::new());
        store.alarm_add(&definition(|_| {})).await.unwrap();
        let app = app(store, true).await;

        let one = json!({"counter_name": "storage.objects", "volume": 3.0});
        let (status, body) = send(app.clone(), "POST", "/samples", Some(one)).await;
        assert_eq!(status, StatusCode::OK);
        let evals: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(evals[0]["alarm_id"], "a-1");
        assert_eq!(evals[0]["state"], "alarm");
        assert_eq!(evals[0]["transitioned"], true);

        let many = json!([
            {"counter_name": "storage.objects", "volume": 3.0},
            {"counter_name": "cpu", "volume": 3.0},
        ]);
        let (status, body) = send(app, "POST", "/samples", Some(many)).await;
        assert_eq!(status, StatusCode::OK);
        let evals: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(evals.as_array().unwrap().len(), 1);
        assert_eq!(evals[0]["transitioned"], false);
    }

    #[tokio::test]
    async fn refresh_picks_up_store_changes() {
        let store = Arc::new(InMemoryStore::new());
        let app = app(store.clone(), true).await;
        store.alarm_add(&definition(|_| {})).await.unwrap();

        let sample = json!({"counter_name": "storage.objects", "volume": 3.0});
        let (_, body) = send(app.clone(), "POST", "/samples", Some(sample.clone())).await;
        assert_eq!(body, "[]");

        let (status, _) = send(app.clone(), "POST", "/alarms/a-1/refresh", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = send(app, "POST", "/samples", Some(sample)).await;
        assert!(body.contains("a-1"));
    }
}
