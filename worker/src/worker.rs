mod inference;
mod ledger;
mod training;

use std::{future::Future, sync::Arc};

use comms::{
    ChildAdded, JobChannel, ObjectStorage, Subscription, Topic, Wallet,
    specs::{JobKind, WorkerStatus, requested_at},
};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use ledger::RewardLedger;

use crate::{
    NodeConfig, Result, WorkerErr,
    config::NodeMode,
    container::ContainerManager,
    probe::gpu,
    train::TrainState,
};

/// The node agent.
///
/// Cheap to clone; every clone drives the same containers and training slot.
#[derive(Clone)]
pub struct Worker {
    config: Arc<NodeConfig>,
    containers: Arc<ContainerManager>,
    channel: Arc<dyn JobChannel>,
    storage: Arc<dyn ObjectStorage>,
    wallet: Arc<dyn Wallet>,
    train: Arc<Mutex<TrainState>>,
    ledger: Arc<Mutex<RewardLedger>>,
    started_at: u64,
    shutdown: CancellationToken,
}

impl Worker {
    pub(crate) fn new(
        config: NodeConfig,
        containers: ContainerManager,
        channel: Arc<dyn JobChannel>,
        storage: Arc<dyn ObjectStorage>,
        wallet: Arc<dyn Wallet>,
        started_at: u64,
    ) -> Self {
        Self {
            config: Arc::new(config),
            containers: Arc::new(containers),
            channel,
            storage,
            wallet,
            train: Arc::default(),
            ledger: Arc::default(),
            started_at,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn address(&self) -> &str {
        self.channel.address()
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    pub fn containers(&self) -> &ContainerManager {
        &self.containers
    }

    pub fn train_state(&self) -> TrainState {
        self.train.lock().clone()
    }

    pub fn ledger(&self) -> RewardLedger {
        *self.ledger.lock()
    }

    /// Cancelling the token makes `serve` tear everything down and return.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Starts the worker in its configured role and spawns its listeners.
    ///
    /// In inference mode this brings the model container up and waits for it to pass
    /// its health check before subscribing to requests.
    ///
    /// # Returns
    /// The spawned background tasks.
    ///
    /// # Errors
    /// `GpuUnavailable` when the runtime cannot run GPU containers, `Unhealthy` when the
    /// model server never became ready, or any container or channel failure.
    pub async fn start(&self) -> Result<JoinSet<()>> {
        info!(address = self.address(); "starting worker");
        if !self.containers.gpu_capable().await? {
            return Err(WorkerErr::GpuUnavailable);
        }

        let mut tasks = JoinSet::new();
        match self.config.mode() {
            NodeMode::Inference(model_name) => {
                let workload = Arc::new(self.start_inference(model_name).await?);
                let requests = self.channel.subscribe(Topic::Inference).await?;
                tasks.spawn(self.clone().listen(requests, move |worker, child| {
                    let workload = workload.clone();
                    async move { worker.handle_inference(&workload, child).await }
                }));
            }
            NodeMode::Training => {
                let requests = self.channel.subscribe(Topic::Training).await?;
                let cancels = self.channel.subscribe(Topic::TrainingCancel).await?;
                tasks.spawn(self.clone().listen(requests, |worker, child| async move {
                    worker.handle_training(child).await
                }));
                tasks.spawn(self.clone().listen(cancels, |worker, child| async move {
                    worker.handle_cancel(child).await
                }));
            }
        }

        let transactions = self.channel.subscribe(Topic::Transactions).await?;
        tasks.spawn(self.clone().listen(transactions, |worker, child| async move {
            worker.handle_transaction(child)
        }));
        tasks.spawn(self.clone().heartbeat_loop());
        if self.config.enable_auto_payout {
            tasks.spawn(self.clone().payout_loop());
        }

        Ok(tasks)
    }

    /// Runs the worker until the shutdown token fires, then removes its containers.
    pub async fn serve(self) -> Result<()> {
        let mut tasks = match self.start().await {
            Ok(tasks) => tasks,
            Err(e) => {
                self.containers.kill_all().await;
                return Err(e);
            }
        };
        info!("worker is ready");

        self.shutdown.cancelled().await;
        info!("shutting down");
        tasks.shutdown().await;
        self.containers.kill_all().await;
        Ok(())
    }

    /// Whether a request was submitted after this process started.
    fn is_fresh(&self, value: &Value) -> bool {
        requested_at(value) >= self.started_at
    }

    /// Feeds each child of `sub` to `handle` in its own task until shutdown.
    async fn listen<F, Fut>(self, mut sub: Subscription, handle: F)
    where
        F: Fn(Worker, ChildAdded) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut inflight = JoinSet::new();
        loop {
            let child = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                child = sub.next() => child,
            };
            let Some(child) = child else {
                warn!("subscription ended");
                break;
            };

            inflight.spawn(handle(self.clone(), child));
            while inflight.try_join_next().is_some() {}
        }
    }

    /// Publishes the worker's role and GPU telemetry.
    pub async fn heartbeat(&self) -> Result<()> {
        let gpu_info = gpu::sample().await.unwrap_or_else(|e| {
            warn!("gpu telemetry unavailable: {e}");
            Default::default()
        });

        let status = match self.config.mode() {
            NodeMode::Inference(model_name) => WorkerStatus {
                job_type: Some(model_name.to_string()),
                kind: JobKind::Inference,
                gpu_info,
            },
            NodeMode::Training => WorkerStatus {
                job_type: None,
                kind: JobKind::Training,
                gpu_info,
            },
        };

        self.channel.set_worker_status(&status).await?;
        Ok(())
    }

    async fn heartbeat_loop(self) {
        let mut ticker = tokio::time::interval(self.config.worker_info_interval());
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            match self.heartbeat().await {
                Ok(()) => debug!("heartbeat sent"),
                Err(e) => error!("failed to publish worker status: {e}"),
            }
        }
    }
}
