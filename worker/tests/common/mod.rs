#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use comms::channel::{MemoryChannel, Written};
use comms::specs::TrainingUpdate;
use comms::storage::{LocalStorage, Progress};
use comms::{CommsErr, ObjectStorage};
use worker::container::{
    ContainerErr, ContainerRuntime, ContainerSpec, LogStream, PullProgress, PullStream, Result,
};

pub const WAIT: Duration = Duration::from_secs(10);

/// Holds a runtime call until the test releases it.
#[derive(Default)]
pub struct Gate {
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl Gate {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Waits until a call reached the gate.
    pub async fn entered(&self) {
        tokio::time::timeout(WAIT, self.entered.notified())
            .await
            .expect("gate never reached");
    }

    pub fn open(&self) {
        self.armed.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    async fn pass(&self) {
        if self.armed.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub name: String,
    pub spec: ContainerSpec,
    pub started: bool,
}

#[derive(Default)]
pub struct FakeState {
    pub images: BTreeSet<String>,
    pub removed_images: Vec<String>,
    pub containers: BTreeMap<String, FakeContainer>,
    pub created: usize,
    pub execs: Vec<(String, Vec<String>)>,
    pub no_gpu: bool,
    pub fail_pull: bool,
    pub fail_create: bool,
    /// Rejects creates whose name is taken, as a real engine does.
    pub reject_duplicate_names: bool,
    pub fail_start: bool,
    log_feeds: HashMap<String, mpsc::UnboundedSender<Result<String>>>,
}

/// In-memory container engine.
///
/// Exec calls end the target's log stream, the way an interrupted workload exits.
#[derive(Default)]
pub struct FakeRuntime {
    pub state: Arc<Mutex<FakeState>>,
    pub pull_gate: Arc<Gate>,
    pub start_gate: Arc<Gate>,
}

impl FakeRuntime {
    pub fn with_image(self, image: &str) -> Self {
        self.state.lock().images.insert(image.to_string());
        self
    }

    /// Names of the containers that currently exist.
    pub fn container_names(&self) -> Vec<String> {
        self.state
            .lock()
            .containers
            .values()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state
            .lock()
            .containers
            .values()
            .find(|c| c.name == name)
            .cloned()
    }

    fn id_of(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .containers
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, _)| id.clone())
    }

    pub fn emit_log(&self, name: &str, line: &str) {
        let id = self.id_of(name).expect("no such container");
        let state = self.state.lock();
        let feed = state.log_feeds.get(&id).expect("logs not followed");
        let _ = feed.send(Ok(line.to_string()));
    }

    /// Ends the log stream of `name`, as if its process exited.
    pub fn end_logs(&self, name: &str) {
        if let Some(id) = self.id_of(name) {
            self.state.lock().log_feeds.remove(&id);
        }
    }

    pub fn fail_logs(&self, name: &str) {
        if let Some(id) = self.id_of(name) {
            if let Some(feed) = self.state.lock().log_feeds.remove(&id) {
                let _ = feed.send(Err(ContainerErr::Runtime("log stream broke".into())));
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn gpu_capable(&self) -> Result<bool> {
        Ok(!self.state.lock().no_gpu)
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.state.lock().images.contains(image))
    }

    fn pull_image(&self, image: &str) -> PullStream {
        let state = self.state.clone();
        let gate = self.pull_gate.clone();
        let image = image.to_string();

        stream::once(async move {
            gate.pass().await;
            let mut state = state.lock();
            if state.fail_pull {
                return Err(ContainerErr::Runtime("manifest unknown".into()));
            }
            state.images.insert(image);
            Ok(PullProgress {
                status: "Downloaded newer image".into(),
                detail: None,
            })
        })
        .boxed()
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state
            .containers
            .values()
            .any(|c| c.spec.image == image)
        {
            return Err(ContainerErr::Runtime(format!("{image} is in use")));
        }
        state.images.remove(image);
        state.removed_images.push(image.to_string());
        Ok(())
    }

    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock();
        if state.fail_create {
            return Err(ContainerErr::Runtime("no space left on device".into()));
        }
        if state.reject_duplicate_names && state.containers.values().any(|c| c.name == name) {
            return Err(ContainerErr::NameInUse(name.to_string()));
        }

        state.created += 1;
        let id = format!("{name}-{}", state.created);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                name: name.to_string(),
                spec: spec.clone(),
                started: false,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, handle: &str) -> Result<()> {
        self.start_gate.pass().await;

        let mut state = self.state.lock();
        if state.fail_start {
            return Err(ContainerErr::Runtime("could not select device driver".into()));
        }
        match state.containers.get_mut(handle) {
            Some(container) => {
                container.started = true;
                Ok(())
            }
            None => Err(ContainerErr::Runtime(format!("no such container {handle}"))),
        }
    }

    async fn remove_container(&self, handle: &str) -> Result<()> {
        let mut state = self.state.lock();
        let ids: Vec<String> = state
            .containers
            .iter()
            .filter(|(id, c)| id.as_str() == handle || c.name == handle)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            state.containers.remove(&id);
            state.log_feeds.remove(&id);
        }
        Ok(())
    }

    async fn exec(&self, handle: &str, cmd: Vec<String>) -> Result<String> {
        let mut state = self.state.lock();
        state.execs.push((handle.to_string(), cmd));
        state.log_feeds.remove(handle);
        Ok(String::new())
    }

    fn logs(&self, handle: &str) -> LogStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().log_feeds.insert(handle.to_string(), tx);

        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
    }
}

/// Bucket backed by a local directory, with switches to stall downloads and break uploads.
pub struct TestStorage {
    pub inner: LocalStorage,
    pub download_gate: Arc<Gate>,
    pub fail_upload: AtomicBool,
}

impl TestStorage {
    pub fn new(inner: LocalStorage) -> Self {
        Self {
            inner,
            download_gate: Arc::default(),
            fail_upload: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ObjectStorage for TestStorage {
    async fn download(&self, remote: &str, local: &Path) -> comms::Result<()> {
        self.download_gate.pass().await;
        self.inner.download(remote, local).await
    }

    async fn upload(&self, remote: &str, local: &Path, progress: Option<Progress>) -> comms::Result<()> {
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(CommsErr::Io(io::Error::other("bucket unavailable")));
        }
        self.inner.upload(remote, local, progress).await
    }
}

/// Waits for a training update of `train_id` matching `pred`.
pub async fn training_update<F>(channel: &MemoryChannel, train_id: &str, pred: F) -> TrainingUpdate
where
    F: Fn(&TrainingUpdate) -> bool,
{
    let written = tokio::time::timeout(
        WAIT,
        channel.wait_for(|w| {
            matches!(w, Written::Training { train_id: id, update, .. } if id == train_id && pred(update))
        }),
    )
    .await
    .expect("no matching training update");

    match written {
        Written::Training { update, .. } => update,
        other => panic!("unexpected write {other:?}"),
    }
}

/// Polls `cond` until it holds.
pub async fn eventually<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}
