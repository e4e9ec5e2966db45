use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use tripwire_common::Sample;

use super::ApiState;
use crate::engine::Evaluation;

#[derive(Deserialize)]
#[serde(untagged)]
pub enum SampleBatch {
    One(Sample),
    Many(Vec<Sample>),
}

impl SampleBatch {
    fn into_vec(self) -> Vec<Sample> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

/// Samples are applied in body order; the evaluations of all of them are
/// returned together.
pub async fn record_samples(
    State(state): State<ApiState>,
    Json(batch): Json<SampleBatch>,
) -> Json<Vec<Evaluation>> {
    let mut evaluations = Vec::new();
    for sample in batch.into_vec() {
        evaluations.extend(state.engine.record_sample(&sample).await);
    }
    Json(evaluations)
}
