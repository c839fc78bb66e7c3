use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An inference request as published under the worker's inference path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub data: InferenceData,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceData {
    /// JSON-encoded model input; submitters may quote it with `'`.
    pub input_vector: String,
    #[serde(default)]
    pub num_results_request: Option<u64>,
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default)]
    pub requested_at: u64,
}

/// A training request as published under the worker's training path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingRequest {
    pub job_type: String,
    pub epochs: u32,
    pub uid: String,
    pub file_name: String,
    pub user_address: String,
    #[serde(default)]
    pub requested_at: u64,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub train_id: String,
    #[serde(default)]
    pub need_save: bool,
    #[serde(default)]
    pub requested_at: u64,
}

/// Submission timestamp of a raw request record, `0` when absent.
///
/// Inference requests carry it under `data`, the other kinds at the top level. It is
/// read before decoding so replayed records are dropped even when malformed.
pub fn requested_at(value: &Value) -> u64 {
    value
        .pointer("/data/requestedAt")
        .or_else(|| value.get("requestedAt"))
        .and_then(Value::as_u64)
        .unwrap_or_default()
}
