//! The realtime job channel.
//!
//! The marketplace publishes requests as children appended under per-worker paths and
//! reads results back from other paths. `JobChannel` is the seam between the worker and
//! whichever backend carries those records.

mod http;
mod memory;
mod sse;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use http::{HttpChannel, HttpChannelConfig};
pub use memory::{MemoryChannel, Written};

use crate::{
    Result,
    specs::{InferenceResult, JobTypeSpec, TrainingUpdate, WorkerStatus},
};

/// The request streams a worker can follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Inference,
    Training,
    TrainingCancel,
    Transactions,
}

impl Topic {
    /// Database path of this topic for the worker at `addr`.
    pub fn path(self, addr: &str) -> String {
        match self {
            Topic::Inference => crate::paths::inference(addr),
            Topic::Training => crate::paths::training(addr),
            Topic::TrainingCancel => crate::paths::training_cancel(addr),
            Topic::Transactions => crate::paths::user_transactions(addr),
        }
    }
}

/// A child record appended under a followed path.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildAdded {
    pub key: String,
    pub value: Value,
}

/// Handle to a followed topic.
///
/// Events stop once the subscription is dropped or `unsubscribe` is called.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ChildAdded>,
    cancel: CancellationToken,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<ChildAdded>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Waits for the next child, `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<ChildAdded> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Access to the marketplace for a single worker address.
#[async_trait]
pub trait JobChannel: Send + Sync {
    /// The worker address every path is scoped to.
    fn address(&self) -> &str;

    /// Follows `topic`, delivering existing children first and then new ones as they land.
    async fn subscribe(&self, topic: Topic) -> Result<Subscription>;

    /// Looks up the descriptor of a job type, `None` when unknown.
    async fn job_type(&self, name: &str) -> Result<Option<JobTypeSpec>>;

    async fn send_inference_result(&self, request_id: &str, result: &InferenceResult)
    -> Result<()>;

    async fn update_training(
        &self,
        train_id: &str,
        user_addr: &str,
        update: &TrainingUpdate,
    ) -> Result<()>;

    async fn set_worker_status(&self, status: &WorkerStatus) -> Result<()>;
}
