use std::{path::PathBuf, sync::Arc};

use comms::{
    ChildAdded, now_ms, paths,
    specs::{CancelRequest, JobKind, JobTypeSpec, TrainStatus, TrainingRequest, TrainingUpdate},
    storage::Progress,
};
use futures::StreamExt;
use log::{debug, error, info, warn};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use super::Worker;
use crate::{
    Result, WorkerErr,
    container::{ContainerErr, ContainerSpec, LogStream, SlotStatus},
    shell,
    train::{CancelMark, CancelPhase, TRAIN_SLOT, resolve_status},
    watch::JsonWatcher,
};

/// Paths and identity of one training job.
#[derive(Debug, Clone)]
pub(super) struct TrainContext {
    train_id: String,
    user_addr: String,
    job_type: String,
    epochs: u32,
    file_name: String,
    model_name: String,
    worker_root: PathBuf,
    dataset_remote: String,
    dataset_local: PathBuf,
    output_local: PathBuf,
    log_file: PathBuf,
    upload_path: String,
    params: Map<String, Value>,
}

impl TrainContext {
    fn new(worker: &Worker, train_id: &str, request: &TrainingRequest) -> Self {
        let worker_root = worker
            .config
            .shared_root_path
            .join("train")
            .join(train_id);
        let model_name = format!("{}.mar", request.job_type);

        let mut params = request.params.clone();
        params.insert("address".into(), json!(worker.address()));
        params.insert("trainId".into(), json!(train_id));

        Self {
            train_id: train_id.to_string(),
            user_addr: request.user_address.clone(),
            job_type: request.job_type.clone(),
            epochs: request.epochs,
            file_name: request.file_name.clone(),
            dataset_remote: paths::dataset(&request.uid, train_id, &request.file_name),
            dataset_local: worker_root.join(&request.file_name),
            output_local: worker_root.join(&model_name),
            log_file: worker_root.join("logs").join("log.json"),
            upload_path: paths::train_result(train_id, worker.address(), &model_name),
            worker_root,
            model_name,
            params,
        }
    }

    fn container_spec(&self, image: &str, gpus: Vec<String>, host_root: &str) -> ContainerSpec {
        let root = format!("/train/{}", self.train_id);
        ContainerSpec::new(image)
            .gpus(gpus)
            .env(format!("epochs={}", self.epochs))
            .env(format!("jobType={}", self.job_type))
            .env(format!("mountedDataPath={root}/{}", self.file_name))
            .env(format!("outputPath={root}/{}", self.model_name))
            .env(format!("logDirectory={root}/logs"))
            .env(format!("logPath={root}/logs/log.json"))
            .bind(format!("{host_root}/train/{}:{root}", self.train_id))
            .label("ain-worker.train-id", self.train_id.as_str())
    }
}

impl Worker {
    /// Handles one training request, always answering it unless it is a replay.
    pub(super) async fn handle_training(&self, child: ChildAdded) {
        let ChildAdded {
            key: train_id,
            value,
        } = child;
        if !self.is_fresh(&value) {
            debug!(train_id = train_id.as_str(); "skipping replayed training request");
            return;
        }

        let request = match serde_json::from_value::<TrainingRequest>(value.clone()) {
            Ok(request) => request,
            Err(e) => {
                warn!(train_id = train_id.as_str(); "malformed training request: {e}");
                if let Some(user) = value.get("userAddress").and_then(Value::as_str) {
                    let update = TrainingUpdate::rejected("Invalid Params");
                    self.report_training(&train_id, user, &update).await;
                }
                return;
            }
        };

        let ctx = TrainContext::new(self, &train_id, &request);
        let update = match self.accept_training(&ctx).await {
            Ok(update) => update,
            Err(e) => {
                warn!(train_id = train_id.as_str(); "training request refused: {e}");
                TrainingUpdate::rejected(e.to_string())
            }
        };

        let update = update.with_params(ctx.params.clone());
        self.report_training(&ctx.train_id, &ctx.user_addr, &update)
            .await;
    }

    /// Claims the training slot and launches the job.
    ///
    /// # Returns
    /// The acceptance update, or a canceled outcome when a cancel landed before the
    /// container came up.
    ///
    /// # Errors
    /// `Busy` while another job holds the slot, `InvalidRequest` for an unknown job type,
    /// or the failure of the launch step that broke. Nothing is left behind on error.
    async fn accept_training(&self, ctx: &TrainContext) -> Result<TrainingUpdate> {
        if self.train.lock().is_busy() {
            return Err(WorkerErr::Busy);
        }

        let job_type = self.training_job_type(&ctx.job_type).await?;
        // the lookup yielded, so the slot may have been taken since
        self.train.lock().begin(&ctx.train_id, &ctx.user_addr)?;

        match self.launch_training(ctx, &job_type).await {
            Ok(()) => {
                info!(train_id = ctx.train_id.as_str(); "training started");
                Ok(TrainingUpdate::running(now_ms()))
            }
            Err(e) => {
                if let Err(err) = shell::remove_dir(&ctx.worker_root).await {
                    warn!("failed to remove {}: {err}", ctx.worker_root.display());
                }
                self.train.lock().finish(&ctx.train_id);

                if e.is_terminate() {
                    info!(train_id = ctx.train_id.as_str(); "training canceled before start");
                    return Ok(TrainingUpdate::finished(
                        TrainStatus::Canceled,
                        ctx.model_name.clone(),
                        None,
                    ));
                }
                Err(e)
            }
        }
    }

    async fn training_job_type(&self, name: &str) -> Result<JobTypeSpec> {
        let remote = match self.channel.job_type(name).await {
            Ok(spec) => spec,
            Err(e) => {
                warn!("job type lookup for {name} failed: {e}");
                None
            }
        };

        remote
            .or_else(|| self.config.job_types.get(name).cloned())
            .filter(|spec| spec.kind == JobKind::Training)
            .ok_or_else(|| WorkerErr::InvalidRequest("Invalid Params".into()))
    }

    async fn launch_training(&self, ctx: &TrainContext, job_type: &JobTypeSpec) -> Result<()> {
        shell::make_dir(&ctx.worker_root).await?;
        self.storage
            .download(&ctx.dataset_remote, &ctx.dataset_local)
            .await?;
        let watcher = JsonWatcher::create(&ctx.log_file, self.config.log_poll_interval()).await?;

        self.train.lock().mark_running(&ctx.train_id)?;

        let spec = ctx.container_spec(
            &job_type.image,
            self.config.gpu_devices(),
            &self.config.host_root(),
        );
        self.containers.run(TRAIN_SLOT, spec).await?;

        let logs = match self.containers.logs(TRAIN_SLOT) {
            Ok(logs) => logs,
            Err(e) => {
                if let Err(err) = self.containers.kill(TRAIN_SLOT).await {
                    warn!("failed to remove {TRAIN_SLOT}: {err}");
                }
                return Err(e.into());
            }
        };

        // a cancel may have been recorded while the container was starting
        if self.train.lock().cancel_mark(&ctx.train_id).is_some() {
            self.interrupt_training().await;
        }

        tokio::spawn(self.clone().monitor_training(ctx.clone(), logs, watcher));
        Ok(())
    }

    /// Forwards output and progress of the running job until its container exits.
    async fn monitor_training(self, ctx: TrainContext, mut logs: LogStream, watcher: JsonWatcher) {
        let stop = CancellationToken::new();
        let mut diffs = watcher.spawn(stop.clone());
        let mut stream_err = None;

        loop {
            tokio::select! {
                chunk = logs.next() => match chunk {
                    Some(Ok(text)) => {
                        let update = TrainingUpdate::log_chunk(now_ms(), text);
                        self.report_training(&ctx.train_id, &ctx.user_addr, &update).await;
                    }
                    Some(Err(e)) => {
                        stream_err = Some(e);
                        break;
                    }
                    None => break,
                },
                Some(diff) = diffs.recv() => {
                    let update = TrainingUpdate::log_diff(diff);
                    self.report_training(&ctx.train_id, &ctx.user_addr, &update).await;
                }
            }
        }

        stop.cancel();
        while let Some(diff) = diffs.recv().await {
            let update = TrainingUpdate::log_diff(diff);
            self.report_training(&ctx.train_id, &ctx.user_addr, &update)
                .await;
        }

        self.finalize_training(&ctx, stream_err).await;
    }

    /// Publishes the final status, uploads the model when kept, and frees the slot.
    async fn finalize_training(&self, ctx: &TrainContext, stream_err: Option<ContainerErr>) {
        let job = self.train.lock().begin_finalizing(&ctx.train_id);
        let Some(job) = job else {
            warn!(train_id = ctx.train_id.as_str(); "finalizing a job that is not running");
            return;
        };

        let output_exists = shell::file_exists(&ctx.output_local).await;
        let mut status = match (&stream_err, &job.cancel) {
            (Some(e), None) => {
                warn!(train_id = ctx.train_id.as_str(); "log stream failed: {e}");
                TrainStatus::Failed
            }
            _ => resolve_status(job.cancel.as_ref(), output_exists),
        };

        let mut err_message = None;
        if status == TrainStatus::Completed {
            let train_id = ctx.train_id.clone();
            let progress: Progress = Arc::new(move |fraction: f32| {
                debug!(train_id = train_id.as_str(); "model upload {:.0}%", fraction * 100.0);
            });
            if let Err(e) = self
                .storage
                .upload(&ctx.upload_path, &ctx.output_local, Some(progress))
                .await
            {
                error!(train_id = ctx.train_id.as_str(); "model upload failed: {e}");
                status = TrainStatus::Failed;
                err_message = Some(format!("Failed to upload model: {e}"));
            }
        }
        if status == TrainStatus::Failed && err_message.is_none() {
            err_message = Some("Failed to train".into());
        }

        info!(train_id = ctx.train_id.as_str(); "training finished as {status:?}");
        let update = TrainingUpdate::finished(status, ctx.model_name.clone(), err_message);
        self.report_training(&ctx.train_id, &ctx.user_addr, &update)
            .await;

        if let Err(e) = self.containers.kill(TRAIN_SLOT).await {
            warn!("failed to remove {TRAIN_SLOT}: {e}");
        }
        if let Err(e) = self.containers.auto_remove_images(None).await {
            warn!("image cleanup failed: {e}");
        }
        if let Err(e) = shell::remove_dir(&ctx.worker_root).await {
            warn!("failed to remove {}: {e}", ctx.worker_root.display());
        }
        self.train.lock().finish(&ctx.train_id);
    }

    /// Handles one cancel request for the current training job.
    pub(super) async fn handle_cancel(&self, child: ChildAdded) {
        let ChildAdded {
            key: cancel_id,
            value,
        } = child;
        if !self.is_fresh(&value) {
            debug!(cancel_id = cancel_id.as_str(); "skipping replayed cancel");
            return;
        }

        let request: CancelRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                warn!(cancel_id = cancel_id.as_str(); "malformed cancel request: {e}");
                return;
            }
        };

        let mark = CancelMark {
            cancel_id,
            need_save: request.need_save,
        };
        let phase = self.train.lock().request_cancel(&request.train_id, mark);

        match phase {
            CancelPhase::Unknown => {
                info!(train_id = request.train_id.as_str(); "no cancellable training job")
            }
            CancelPhase::Downloading => {
                info!(train_id = request.train_id.as_str(); "cancel noted, dataset still downloading")
            }
            CancelPhase::Running => {
                info!(train_id = request.train_id.as_str(); "canceling training");
                self.interrupt_training().await;
            }
        }
    }

    /// Stops the training workload: a started container is asked to exit, anything
    /// still being prepared is killed outright.
    async fn interrupt_training(&self) {
        let result = match self.containers.status(TRAIN_SLOT) {
            Some(SlotStatus::Running) => {
                self.containers
                    .terminate_process(TRAIN_SLOT, &self.config.train_process_pattern)
                    .await
            }
            _ => self.containers.kill(TRAIN_SLOT).await,
        };

        if let Err(e) = result {
            warn!("failed to interrupt training: {e}");
        }
    }

    async fn report_training(&self, train_id: &str, user_addr: &str, update: &TrainingUpdate) {
        if let Err(e) = self
            .channel
            .update_training(train_id, user_addr, update)
            .await
        {
            error!(train_id = train_id; "failed to publish training update: {e}");
        }
    }
}
