use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outcome record of a single inference request.
///
/// `statusCode` is `0` on success and `1` on failure; exactly one of `result` and
/// `errMessage` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResult {
    pub status_code: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_message: Option<String>,
    pub params: Map<String, Value>,
}

impl InferenceResult {
    pub const SUCCESS: u8 = 0;
    pub const FAILURE: u8 = 1;

    pub fn success(result: Value, params: Map<String, Value>) -> Self {
        Self {
            status_code: Self::SUCCESS,
            result: Some(result),
            err_message: None,
            params,
        }
    }

    pub fn failure(err_message: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            status_code: Self::FAILURE,
            result: None,
            err_message: Some(err_message.into()),
            params,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == Self::SUCCESS
    }
}

/// Lifecycle status reported for a training job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

/// A write to a training job's result path.
///
/// Acceptance, progress and the final outcome all share this record; each update only
/// carries the fields it sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TrainStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl TrainingUpdate {
    /// The job was accepted and its container is up.
    pub fn running(started_at: u64) -> Self {
        Self {
            started_at: Some(started_at),
            status: Some(TrainStatus::Running),
            ..Default::default()
        }
    }

    /// The job was refused before anything was launched.
    pub fn rejected(err_message: impl Into<String>) -> Self {
        Self {
            err_message: Some(err_message.into()),
            ..Default::default()
        }
    }

    /// A chunk of container output, keyed by the time it was read.
    pub fn log_chunk(at_ms: u64, chunk: String) -> Self {
        Self {
            logs: Some(BTreeMap::from([(at_ms.to_string(), chunk)])),
            ..Default::default()
        }
    }

    /// Changed keys of the structured progress file.
    pub fn log_diff(diff: Value) -> Self {
        Self {
            log: Some(diff),
            ..Default::default()
        }
    }

    pub fn finished(status: TrainStatus, model_name: String, err_message: Option<String>) -> Self {
        Self {
            status: Some(status),
            model_name: Some(model_name),
            err_message,
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn inference_failure_omits_result() {
        let mut params = Map::new();
        params.insert("requestId".into(), json!("r1"));

        let value = serde_json::to_value(InferenceResult::failure("boom", params)).unwrap();
        assert_eq!(
            value,
            json!({ "statusCode": 1, "errMessage": "boom", "params": { "requestId": "r1" } })
        );
    }

    #[test]
    fn updates_only_serialize_what_they_set() {
        let value = serde_json::to_value(TrainingUpdate::running(99)).unwrap();
        assert_eq!(value, json!({ "startedAt": 99, "status": "running" }));

        let value = serde_json::to_value(TrainingUpdate::log_chunk(5, "epoch 1".into())).unwrap();
        assert_eq!(value, json!({ "logs": { "5": "epoch 1" } }));

        let value = serde_json::to_value(TrainingUpdate::finished(
            TrainStatus::Failed,
            "mnist".into(),
            Some("Failed to train".into()),
        ))
        .unwrap();
        assert_eq!(
            value,
            json!({ "status": "failed", "modelName": "mnist", "errMessage": "Failed to train" })
        );
    }
}
