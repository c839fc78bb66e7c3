use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use super::{ChildAdded, JobChannel, Subscription, Topic};
use crate::{
    Result,
    specs::{InferenceResult, JobTypeSpec, TrainingUpdate, WorkerStatus},
};

/// A record the worker wrote back through the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Written {
    Inference {
        request_id: String,
        result: InferenceResult,
    },
    Training {
        train_id: String,
        user_addr: String,
        update: TrainingUpdate,
    },
    Status(WorkerStatus),
}

#[derive(Default)]
struct State {
    children: HashMap<Topic, Vec<ChildAdded>>,
    subscribers: HashMap<Topic, Vec<mpsc::UnboundedSender<ChildAdded>>>,
    job_types: HashMap<String, JobTypeSpec>,
    writes: Vec<Written>,
}

/// In-process channel, used for local runs and tests.
///
/// Published children are retained, so late subscribers still see them first the way
/// the realtime database replays existing children.
pub struct MemoryChannel {
    address: String,
    state: Mutex<State>,
    written: Notify,
}

impl MemoryChannel {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: Mutex::default(),
            written: Notify::new(),
        }
    }

    pub fn with_job_type(self, name: impl Into<String>, spec: JobTypeSpec) -> Self {
        self.state.lock().job_types.insert(name.into(), spec);
        self
    }

    /// Appends a child under `topic` and fans it out to live subscribers.
    pub fn publish(&self, topic: Topic, key: impl Into<String>, value: Value) {
        let child = ChildAdded {
            key: key.into(),
            value,
        };

        let mut state = self.state.lock();
        if let Some(subscribers) = state.subscribers.get_mut(&topic) {
            subscribers.retain(|tx| tx.send(child.clone()).is_ok());
        }
        state.children.entry(topic).or_default().push(child);
    }

    /// Every record written so far, oldest first.
    pub fn writes(&self) -> Vec<Written> {
        self.state.lock().writes.clone()
    }

    /// Waits until a written record satisfies `pred` and returns it.
    pub async fn wait_for<F>(&self, pred: F) -> Written
    where
        F: Fn(&Written) -> bool,
    {
        loop {
            let notified = self.written.notified();
            if let Some(found) = self.state.lock().writes.iter().find(|w| pred(w)).cloned() {
                return found;
            }
            notified.await;
        }
    }

    fn record(&self, written: Written) {
        self.state.lock().writes.push(written);
        self.written.notify_waiters();
    }
}

#[async_trait]
impl JobChannel for MemoryChannel {
    fn address(&self) -> &str {
        &self.address
    }

    async fn subscribe(&self, topic: Topic) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.state.lock();
        for child in state.children.get(&topic).into_iter().flatten() {
            let _ = tx.send(child.clone());
        }
        state.subscribers.entry(topic).or_default().push(tx);

        Ok(Subscription::new(rx, CancellationToken::new()))
    }

    async fn job_type(&self, name: &str) -> Result<Option<JobTypeSpec>> {
        Ok(self.state.lock().job_types.get(name).cloned())
    }

    async fn send_inference_result(
        &self,
        request_id: &str,
        result: &InferenceResult,
    ) -> Result<()> {
        self.record(Written::Inference {
            request_id: request_id.to_string(),
            result: result.clone(),
        });
        Ok(())
    }

    async fn update_training(
        &self,
        train_id: &str,
        user_addr: &str,
        update: &TrainingUpdate,
    ) -> Result<()> {
        self.record(Written::Training {
            train_id: train_id.to_string(),
            user_addr: user_addr.to_string(),
            update: update.clone(),
        });
        Ok(())
    }

    async fn set_worker_status(&self, status: &WorkerStatus) -> Result<()> {
        self.record(Written::Status(status.clone()));
        Ok(())
    }
}
