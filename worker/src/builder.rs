use std::sync::Arc;

use comms::{JobChannel, ObjectStorage, Wallet, now_ms};

use crate::{
    NodeConfig, Result, Worker, WorkerErr,
    container::{ContainerManager, ContainerRuntime},
};

/// Wires a `Worker` to its backends.
pub struct WorkerBuilder {
    config: NodeConfig,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    channel: Option<Arc<dyn JobChannel>>,
    storage: Option<Arc<dyn ObjectStorage>>,
    wallet: Option<Arc<dyn Wallet>>,
    started_at: Option<u64>,
}

impl WorkerBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            runtime: None,
            channel: None,
            storage: None,
            wallet: None,
            started_at: None,
        }
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn channel(mut self, channel: Arc<dyn JobChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn wallet(mut self, wallet: Arc<dyn Wallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// Overrides the process start time requests are compared against.
    pub fn started_at(mut self, ms: u64) -> Self {
        self.started_at = Some(ms);
        self
    }

    /// Builds the worker.
    ///
    /// # Returns
    /// A `Worker`, or `WorkerErr::Config` when a backend is missing.
    pub fn build(self) -> Result<Worker> {
        let missing = |what: &str| WorkerErr::Config(format!("no {what} configured"));

        let runtime = self.runtime.ok_or_else(|| missing("container runtime"))?;
        let channel = self.channel.ok_or_else(|| missing("job channel"))?;
        let storage = self.storage.ok_or_else(|| missing("object storage"))?;
        let wallet = self.wallet.ok_or_else(|| missing("wallet"))?;

        let containers = ContainerManager::new(runtime, self.config.max_image_count);
        Ok(Worker::new(
            self.config,
            containers,
            channel,
            storage,
            wallet,
            self.started_at.unwrap_or_else(now_ms),
        ))
    }
}
