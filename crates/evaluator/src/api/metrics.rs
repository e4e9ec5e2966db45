use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use super::ApiState;
use crate::metrics::render_prometheus;

pub async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = render_prometheus(state.engine.metrics(), state.engine.cache().len());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
