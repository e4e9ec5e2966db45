mod action;
mod command;
mod signer;
mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::alarm::{AlarmDefinition, AlarmState};
use crate::metrics::EngineMetrics;

pub use action::{Action, ActionError, ActionExecutor, ActionFields};
pub use command::{ENV_PREFIX, run_command};
pub use signer::{SIGNATURE_HEADER, sign_payload};
pub use webhook::{UNKNOWN_PLACEHOLDER, send_webhook, substitute_placeholders};

/// Runs webhooks over a shared HTTP client and commands through `sh`.
/// Both are bounded by the same timeout.
pub struct DefaultExecutor {
    client: Client,
    secret: Option<Vec<u8>>,
    timeout: Duration,
}

impl DefaultExecutor {
    pub fn new(timeout: Duration, secret: Option<Vec<u8>>) -> Result<Self, ActionError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            secret,
            timeout,
        })
    }
}

#[async_trait]
impl ActionExecutor for DefaultExecutor {
    async fn execute(&self, action: &Action, fields: &ActionFields) -> Result<(), ActionError> {
        match action {
            Action::Webhook(url) => send_webhook(&self.client, url, fields, self.secret.as_deref()).await,
            Action::Command(line) => run_command(line, fields, self.timeout).await,
        }
    }
}

/// Fires the actions registered for a state without waiting on them.
#[derive(Clone)]
pub struct ActionDispatcher {
    executor: Arc<dyn ActionExecutor>,
    metrics: Arc<EngineMetrics>,
}

impl ActionDispatcher {
    pub fn new(executor: Arc<dyn ActionExecutor>, metrics: Arc<EngineMetrics>) -> Self {
        Self { executor, metrics }
    }

    /// Spawns one task per action configured for `state` on `definition`
    /// and returns how many were spawned. Failures are logged and counted.
    pub fn dispatch(&self, definition: &AlarmDefinition, state: AlarmState) -> usize {
        let actions: Vec<Action> = definition
            .actions_for(state)
            .iter()
            .filter_map(|raw| Action::parse(raw))
            .collect();
        if actions.is_empty() {
            return 0;
        }

        let fields = Arc::new(definition.fields());
        for action in &actions {
            let action = action.clone();
            let fields = Arc::clone(&fields);
            let executor = Arc::clone(&self.executor);
            let metrics = Arc::clone(&self.metrics);
            let alarm_id = definition.id.clone();

            self.metrics.inc_actions_dispatched();
            tokio::spawn(async move {
                match executor.execute(&action, &fields).await {
                    Ok(()) => tracing::debug!(
                        alarm_id = %alarm_id,
                        kind = action.kind(),
                        "action completed"
                    ),
                    Err(e) => {
                        metrics.inc_actions_failed();
                        tracing::warn!(
                            alarm_id = %alarm_id,
                            kind = action.kind(),
                            target = %action.target(),
                            error = %e,
                            "action failed"
                        );
                    }
                }
            });
        }
        actions.len()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingExecutor;
    use super::*;
    use crate::alarm::test_support::definition;

    #[tokio::test]
    async fn fires_only_actions_for_state() {
        let (executor, mut rx) = RecordingExecutor::new();
        let metrics = EngineMetrics::new();
        let dispatcher = ActionDispatcher::new(executor, metrics.clone());
        let def = definition(|d| {
            d.alarm_actions = vec!["http://hooks/{name}".into(), "touch /tmp/x".into(), " ".into()];
            d.ok_actions = vec!["echo ok".into()];
            d.state = AlarmState::Alarm;
        });

        assert_eq!(dispatcher.dispatch(&def, AlarmState::Alarm), 2);

        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort_by(|a, b| a.0.kind().cmp(b.0.kind()));
        assert_eq!(seen[0].0, Action::Command("touch /tmp/x".into()));
        assert_eq!(seen[1].0, Action::Webhook("http://hooks/{name}".into()));
        assert_eq!(seen[1].1["state"], "alarm");
        assert_eq!(metrics.actions_dispatched_val(), 2);
    }

    #[tokio::test]
    async fn no_actions_no_tasks() {
        let (executor, _rx) = RecordingExecutor::new();
        let dispatcher = ActionDispatcher::new(executor, EngineMetrics::new());
        assert_eq!(dispatcher.dispatch(&definition(|_| {}), AlarmState::Ok), 0);
    }

    #[tokio::test]
    async fn failures_are_counted_not_propagated() {
        let (executor, mut rx) = RecordingExecutor::failing();
        let metrics = EngineMetrics::new();
        let dispatcher = ActionDispatcher::new(executor, metrics.clone());
        let def = definition(|d| d.ok_actions = vec!["false".into()]);

        assert_eq!(dispatcher.dispatch(&def, AlarmState::Ok), 1);
        rx.recv().await.unwrap();
        for _ in 0..50 {
            if metrics.actions_failed_val() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(metrics.actions_failed_val(), 1);
    }

    #[tokio::test]
    async fn webhook_posts_signed_field_map() {
        use axum::{Router, body::Bytes, http::HeaderMap, routing::post};
        use tokio::sync::mpsc;

        let (tx, mut rx) = mpsc::unbounded_channel::<(String, HeaderMap, Bytes)>();
        let app = Router::new().route(
            "/hook/{name}",
            post(move |axum::extract::Path(name): axum::extract::Path<String>, headers: HeaderMap, body: Bytes| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send((name, headers, body));
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let executor =
            DefaultExecutor::new(Duration::from_secs(5), Some(b"s3cret".to_vec())).unwrap();
        let def = definition(|d| d.name = "disk".into());
        let action = Action::Webhook(format!("http://{addr}/hook/{{name}}"));
        executor.execute(&action, &def.fields()).await.unwrap();

        let (name, headers, body) = rx.recv().await.unwrap();
        assert_eq!(name, "disk");
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["name"], "disk");
        assert_eq!(json["counter_name"], "storage.objects");
        let sig = headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
        assert!(signer::verify_signature(b"s3cret", &body, sig));
    }

    #[tokio::test]
    async fn webhook_error_status_is_reported() {
        use axum::{Router, http::StatusCode, routing::post};

        let app = Router::new().route("/", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let executor = DefaultExecutor::new(Duration::from_secs(5), None).unwrap();
        let err = executor
            .execute(&Action::Webhook(format!("http://{addr}/")), &ActionFields::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Http(_)));
    }
}
