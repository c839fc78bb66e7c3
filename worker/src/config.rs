//! Node configuration, read once at startup from a JSON env file.

use std::{
    collections::BTreeMap,
    fmt::Display,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use comms::specs::{Framework, HttpMethod, JobKind, JobTypeSpec};
use serde::{Deserialize, Deserializer, de::Error as _};

use crate::{Result, WorkerErr};

/// Which marketplace the node serves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeEnv {
    #[default]
    Prod,
    Staging,
}

impl NodeEnv {
    fn project(self) -> &'static str {
        match self {
            NodeEnv::Prod => "gpt2-ainetwork-prod",
            NodeEnv::Staging => "gpt2-ainetwork",
        }
    }
}

/// The role a node plays for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode<'a> {
    /// Serves one model behind a long-lived container.
    Inference(&'a str),
    /// Runs one training job at a time.
    Training,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct NodeConfig {
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default, deserialize_with = "flex::boolean")]
    pub train_mode: bool,
    #[serde(default, deserialize_with = "flex::string")]
    pub gpu_device_number: String,
    #[serde(default)]
    pub eth_address: String,
    #[serde(default)]
    pub node_env: NodeEnv,
    #[serde(default = "defaults::job_port", deserialize_with = "flex::number")]
    pub job_port: u16,
    #[serde(
        default = "defaults::enabled",
        alias = "ENABLE_AUTH_PAYOUT",
        deserialize_with = "flex::boolean"
    )]
    pub enable_auto_payout: bool,
    #[serde(default = "defaults::shared_root")]
    pub shared_root_path: PathBuf,
    #[serde(default)]
    pub host_root_path: Option<String>,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub database_auth: Option<String>,
    #[serde(default)]
    pub functions_url: Option<String>,
    #[serde(default)]
    pub storage_url: Option<String>,
    #[serde(default = "defaults::signer_url")]
    pub signer_url: String,
    #[serde(default = "defaults::max_image_count", deserialize_with = "flex::number")]
    pub max_image_count: usize,
    #[serde(default = "defaults::health_check_max_cnt", deserialize_with = "flex::number")]
    pub health_check_max_cnt: u32,
    #[serde(default = "defaults::health_check_delay_ms", deserialize_with = "flex::number")]
    pub health_check_delay_ms: u64,
    #[serde(default = "defaults::worker_info_update_ms", deserialize_with = "flex::number")]
    pub worker_info_update_ms: u64,
    #[serde(default = "defaults::request_payout_ms", deserialize_with = "flex::number")]
    pub request_payout_ms: u64,
    #[serde(default = "defaults::payout_threshold", deserialize_with = "flex::number")]
    pub payout_threshold: u64,
    #[serde(default = "defaults::log_poll_ms", deserialize_with = "flex::number")]
    pub log_poll_ms: u64,
    #[serde(default = "defaults::train_process_pattern")]
    pub train_process_pattern: String,
    #[serde(default = "defaults::job_types")]
    pub job_types: BTreeMap<String, JobTypeSpec>,
}

impl NodeConfig {
    /// Reads and validates the env file at `path`.
    ///
    /// # Arguments
    /// * `path` - Location of the JSON env file.
    ///
    /// # Returns
    /// A validated configuration or `WorkerErr::Config`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| WorkerErr::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|e| WorkerErr::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(WorkerErr::Config(msg));

        if self.eth_address.trim().is_empty() {
            return invalid("ETH_ADDRESS is required".into());
        }

        match (&self.model_name, self.train_mode) {
            (Some(_), true) => {
                return invalid("MODEL_NAME and TRAIN_MODE are mutually exclusive".into());
            }
            (None, false) => return invalid("one of MODEL_NAME or TRAIN_MODE must be set".into()),
            (Some(name), false) => match self.job_types.get(name) {
                None => return invalid(format!("unknown MODEL_NAME {name}")),
                Some(spec) if spec.kind != JobKind::Inference || spec.framework.is_none() => {
                    return invalid(format!("MODEL_NAME {name} is not a servable model"));
                }
                Some(_) => {}
            },
            (None, true) => {}
        }

        if self.gpu_devices().is_empty() {
            return invalid("GPU_DEVICE_NUMBER must list at least one device".into());
        }
        if self.health_check_max_cnt == 0 {
            return invalid("HEALTH_CHECK_MAX_CNT must be positive".into());
        }
        if self.max_image_count == 0 {
            return invalid("MAX_IMAGE_COUNT must be positive".into());
        }

        let pattern_ok = !self.train_process_pattern.is_empty()
            && self
                .train_process_pattern
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "._-/ ".contains(c));
        if !pattern_ok {
            return invalid(format!(
                "TRAIN_PROCESS_PATTERN {:?} contains unsupported characters",
                self.train_process_pattern
            ));
        }

        Ok(())
    }

    pub fn mode(&self) -> NodeMode<'_> {
        match &self.model_name {
            Some(name) if !self.train_mode => NodeMode::Inference(name),
            _ => NodeMode::Training,
        }
    }

    /// GPU devices the workloads may see.
    pub fn gpu_devices(&self) -> Vec<String> {
        self.gpu_device_number
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Root of the job directories as seen by the container runtime host.
    pub fn host_root(&self) -> String {
        match &self.host_root_path {
            Some(root) => root.clone(),
            None => self.shared_root_path.display().to_string(),
        }
    }

    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!("https://{}.firebaseio.com", self.node_env.project()),
        }
    }

    pub fn functions_url(&self) -> String {
        match &self.functions_url {
            Some(url) => url.clone(),
            None => format!("https://us-central1-{}.cloudfunctions.net", self.node_env.project()),
        }
    }

    pub fn storage_url(&self) -> String {
        match &self.storage_url {
            Some(url) => url.clone(),
            None => format!(
                "https://firebasestorage.googleapis.com/v0/b/{}.appspot.com/o",
                self.node_env.project()
            ),
        }
    }

    pub fn health_check_delay(&self) -> Duration {
        Duration::from_millis(self.health_check_delay_ms)
    }

    pub fn worker_info_interval(&self) -> Duration {
        Duration::from_millis(self.worker_info_update_ms)
    }

    pub fn payout_interval(&self) -> Duration {
        Duration::from_millis(self.request_payout_ms)
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_ms)
    }
}

mod defaults {
    use super::*;

    pub fn job_port() -> u16 {
        7777
    }

    pub fn enabled() -> bool {
        true
    }

    pub fn shared_root() -> PathBuf {
        PathBuf::from("/ain-worker")
    }

    pub fn signer_url() -> String {
        "http://127.0.0.1:3030".into()
    }

    pub fn max_image_count() -> usize {
        2
    }

    pub fn health_check_max_cnt() -> u32 {
        100
    }

    pub fn health_check_delay_ms() -> u64 {
        2_000
    }

    pub fn worker_info_update_ms() -> u64 {
        30_000
    }

    pub fn request_payout_ms() -> u64 {
        600_000
    }

    pub fn payout_threshold() -> u64 {
        100
    }

    pub fn log_poll_ms() -> u64 {
        1_000
    }

    pub fn train_process_pattern() -> String {
        "python".into()
    }

    fn serving(image: &str, port: u16, framework: Framework, api: &str, health: &str) -> JobTypeSpec {
        JobTypeSpec {
            kind: JobKind::Inference,
            image: image.into(),
            framework: Some(framework),
            port: Some(port),
            api_path: Some(api.into()),
            health_check_path: Some(health.into()),
            method: HttpMethod::Post,
        }
    }

    pub fn job_types() -> BTreeMap<String, JobTypeSpec> {
        BTreeMap::from([
            (
                "gpt-2-large-length-1".into(),
                serving(
                    "gkswjdzz/gpt-2-large-length-1",
                    8501,
                    Framework::Tensorflow,
                    "/v1/models/gpt-2-large:predict",
                    "/v1/models/gpt-2-large",
                ),
            ),
            (
                "gpt-2-large-torch-serving".into(),
                serving(
                    "gkswjdzz/gpt-2-large-torch-serving",
                    8080,
                    Framework::Pytorch,
                    "/predictions/gpt2-large",
                    "/ping",
                ),
            ),
            (
                "gpt-2-trump-torch-serving".into(),
                serving(
                    "gkswjdzz/gpt-2-trump-torch-serving",
                    8080,
                    Framework::Pytorch,
                    "/predictions/gpt2-trump",
                    "/ping",
                ),
            ),
        ])
    }
}

/// Env files written by hand mix strings, numbers and booleans freely.
mod flex {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Num(u64),
        Str(String),
    }

    pub fn boolean<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Bool(b) => Ok(b),
            Raw::Num(n) => Ok(n != 0),
            Raw::Str(s) => match s.trim() {
                "true" | "1" => Ok(true),
                "false" | "0" | "" => Ok(false),
                other => Err(D::Error::custom(format!("expected a boolean, got {other:?}"))),
            },
        }
    }

    pub fn number<'de, D, T>(d: D) -> std::result::Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr + TryFrom<u64>,
        <T as FromStr>::Err: Display,
        <T as TryFrom<u64>>::Error: Display,
    {
        match Raw::deserialize(d)? {
            Raw::Num(n) => T::try_from(n).map_err(D::Error::custom),
            Raw::Str(s) => s.trim().parse().map_err(D::Error::custom),
            Raw::Bool(_) => Err(D::Error::custom("expected a number, got a boolean")),
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Str(s) => Ok(s),
            Raw::Num(n) => Ok(n.to_string()),
            Raw::Bool(_) => Err(D::Error::custom("expected a string, got a boolean")),
        }
    }
}
