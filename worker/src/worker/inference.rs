use comms::{
    ChildAdded,
    specs::{InferenceRequest, InferenceResult},
};
use log::{debug, error, info, warn};
use serde_json::{Value, json};

use super::Worker;
use crate::{
    Result, WorkerErr,
    container::ContainerSpec,
    probe::HealthCheck,
    workload::WorkloadClient,
};

impl Worker {
    /// Brings up the model container and waits for it to report healthy.
    pub(super) async fn start_inference(&self, model_name: &str) -> Result<WorkloadClient> {
        let spec = self
            .config
            .job_types
            .get(model_name)
            .ok_or_else(|| WorkerErr::Config(format!("unknown model {model_name}")))?;
        let port = spec
            .port
            .ok_or_else(|| WorkerErr::Config(format!("{model_name} has no serving port")))?;

        let workload =
            WorkloadClient::new(format!("http://127.0.0.1:{}", self.config.job_port), spec)?;
        let container = ContainerSpec::new(&spec.image)
            .gpus(self.config.gpu_devices())
            .port(self.config.job_port, port)
            .label("ain-worker.job", model_name);

        self.containers.run(model_name, container).await?;

        let health = HealthCheck::new(
            self.config.health_check_max_cnt,
            self.config.health_check_delay(),
        );
        match health.wait_until_healthy(|| workload.is_healthy()).await {
            Some(attempts) => {
                info!(model = model_name, attempts = attempts; "model server is healthy");
                Ok(workload)
            }
            None => {
                if let Err(e) = self.containers.kill(model_name).await {
                    warn!("failed to remove unhealthy {model_name}: {e}");
                }
                Err(WorkerErr::Unhealthy {
                    name: model_name.to_string(),
                    attempts: health.max_attempts(),
                })
            }
        }
    }

    /// Answers one inference request.
    ///
    /// Requests submitted before this process started are replays and get no answer.
    /// Every other request gets exactly one result, success or failure.
    pub(super) async fn handle_inference(&self, workload: &WorkloadClient, child: ChildAdded) {
        let ChildAdded {
            key: request_id,
            value,
        } = child;
        if !self.is_fresh(&value) {
            debug!(request_id = request_id.as_str(); "skipping replayed request");
            return;
        }

        let mut params = value
            .get("params")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        params.insert("address".into(), json!(self.address()));
        params.insert("requestId".into(), json!(request_id));

        let outcome = match serde_json::from_value::<InferenceRequest>(value) {
            Ok(request) => workload.predict(&request.data).await,
            Err(e) => Err(WorkerErr::InvalidRequest(format!("malformed request: {e}"))),
        };

        let result = match outcome {
            Ok(result) => InferenceResult::success(result, params),
            Err(e) => {
                warn!(request_id = request_id.as_str(); "inference failed: {e}");
                InferenceResult::failure(e.to_string(), params)
            }
        };

        if let Err(e) = self.channel.send_inference_result(&request_id, &result).await {
            error!(request_id = request_id.as_str(); "failed to publish inference result: {e}");
        }
    }
}
