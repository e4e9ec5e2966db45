use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use super::ApiState;
use crate::alarm::{AlarmDefinition, AlarmSpec, ConfigurationError};
use crate::error::EngineError;
use crate::store::StoreError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

fn reject(status: StatusCode, error: impl ToString) -> ApiError {
    (status, Json(ErrorBody { error: error.to_string() }))
}

fn engine_error(e: EngineError) -> ApiError {
    let status = match &e {
        EngineError::Configuration(_) => StatusCode::BAD_REQUEST,
        EngineError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        EngineError::Store(StoreError::Duplicate { .. }) => StatusCode::CONFLICT,
        EngineError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Store(StoreError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "alarm management request failed");
    }
    reject(status, e)
}

/// Adds or replaces the definition stored under `alarm_id`. When the body
/// carries no state, the stored state is kept.
pub async fn put_alarm(
    State(state): State<ApiState>,
    Path(alarm_id): Path<String>,
    Json(mut body): Json<Value>,
) -> Result<(StatusCode, Json<AlarmDefinition>), ApiError> {
    let Some(fields) = body.as_object_mut() else {
        return Err(reject(StatusCode::BAD_REQUEST, "alarm definition must be a JSON object"));
    };
    if let Some(Value::String(id)) = fields.get("id") {
        if *id != alarm_id {
            return Err(reject(StatusCode::BAD_REQUEST, "body id does not match path"));
        }
    }
    fields.insert("id".into(), Value::String(alarm_id));

    let spec: AlarmSpec = serde_json::from_value(body)
        .map_err(|e| reject(StatusCode::BAD_REQUEST, ConfigurationError::Malformed(e.to_string())))?;
    let keep_state = spec.state.is_none();

    let definition = AlarmDefinition::from_spec(spec).map_err(|e| engine_error(e.into()))?;
    let stored = state
        .engine
        .put_alarm(definition, keep_state)
        .await
        .map_err(engine_error)?;

    let status = if stored.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(stored.definition)))
}

pub async fn delete_alarm(
    State(state): State<ApiState>,
    Path(alarm_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .delete_alarm(&alarm_id)
        .await
        .map_err(engine_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Notification that `alarm_id` changed in the store behind our back.
pub async fn refresh_alarm(
    State(state): State<ApiState>,
    Path(alarm_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .refresh_alarm(&alarm_id)
        .await
        .map_err(engine_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct ReloadResponse {
    pub alarms: usize,
}

pub async fn reload(State(state): State<ApiState>) -> Result<Json<ReloadResponse>, ApiError> {
    let alarms = state.engine.reload().await.map_err(engine_error)?;
    Ok(Json(ReloadResponse { alarms }))
}
