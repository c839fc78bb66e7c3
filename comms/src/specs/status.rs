use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::JobKind;

/// One GPU as reported by the driver tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuInfo {
    pub gpu_name: String,
    pub driver_version: String,
    pub memory_used: String,
    pub memory_total: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utilization: Option<String>,
}

/// Heartbeat payload published under the worker's info path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub gpu_info: BTreeMap<String, GpuInfo>,
}

/// A balance-affecting event appended under the worker's transaction path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTransaction {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f64,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub tx_hash: Option<String>,
}
