use std::{collections::HashMap, sync::Arc};

use futures::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{
    ContainerErr, ContainerRuntime, ContainerSpec, LogStream, Result, images::ImageRegistry,
    normalize_image,
};

/// How far a named slot got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Pulling, creating or starting.
    Preparing,
    Running,
}

#[derive(Debug)]
struct ContainerRecord {
    generation: u64,
    image: String,
    handle: Option<String>,
    pull: CancellationToken,
}

#[derive(Debug, Default)]
struct ManagerState {
    records: HashMap<String, ContainerRecord>,
    images: ImageRegistry,
    next_generation: u64,
}

/// Runs workload containers in named slots and garbage-collects their images.
///
/// A slot's record exists from the moment `run` starts until `kill` clears it, and its
/// presence under the same generation is what keeps a start in flight wanted: every
/// step of `run` re-checks it after the engine call returns, and removes whatever it
/// created once the record is gone. State is only touched under the lock, never across
/// an engine call.
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    state: Mutex<ManagerState>,
    max_images: usize,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, max_images: usize) -> Self {
        Self {
            runtime,
            state: Mutex::default(),
            max_images,
        }
    }

    pub async fn gpu_capable(&self) -> Result<bool> {
        self.runtime.gpu_capable().await
    }

    /// Brings up the container for slot `name`, pulling its image when absent.
    ///
    /// # Arguments
    /// * `name` - The slot, also used as the container name.
    /// * `spec` - Image, devices, ports, env and mounts of the container.
    ///
    /// # Returns
    /// `Ok` once the container is started, `ContainerErr::Terminated` when the slot was
    /// killed meanwhile, or the failure of the step that broke.
    pub async fn run(&self, name: &str, mut spec: ContainerSpec) -> Result<()> {
        spec.image = normalize_image(&spec.image);

        let (generation, pull) = {
            let mut state = self.state.lock();
            if state.records.get(name).is_some_and(|r| r.handle.is_some()) {
                return Err(ContainerErr::AlreadyRunning(name.to_string()));
            }

            state.next_generation += 1;
            let generation = state.next_generation;
            let pull = CancellationToken::new();
            state.records.insert(
                name.to_string(),
                ContainerRecord {
                    generation,
                    image: spec.image.clone(),
                    handle: None,
                    pull: pull.clone(),
                },
            );
            (generation, pull)
        };

        let result = self.launch(name, generation, &spec, &pull).await;
        if let Err(e) = &result {
            debug!(name = name; "start aborted: {e}");
            self.forget(name, generation, &spec.image);
        }
        result
    }

    async fn launch(
        &self,
        name: &str,
        generation: u64,
        spec: &ContainerSpec,
        pull: &CancellationToken,
    ) -> Result<()> {
        let present = self.runtime.image_exists(&spec.image).await?;
        self.ensure_wanted(name, generation)?;

        if !present {
            if let Err(e) = self.auto_remove_images(Some(&spec.image)).await {
                warn!("image cleanup before pull failed: {e}");
            }
            self.ensure_wanted(name, generation)?;
            self.pull(name, &spec.image, pull).await?;
            self.ensure_wanted(name, generation)?;
        }

        let handle = match self.runtime.create_container(name, spec).await {
            Ok(handle) => handle,
            Err(e @ ContainerErr::NameInUse(_)) => return Err(e),
            Err(e) => {
                self.discard(name).await;
                return Err(e);
            }
        };

        if let Err(e) = self.ensure_wanted(name, generation) {
            self.discard(&handle).await;
            return Err(e);
        }

        if let Err(e) = self.runtime.start_container(&handle).await {
            self.discard(&handle).await;
            return Err(e);
        }

        let committed = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match state.records.get_mut(name) {
                Some(record) if record.generation == generation => {
                    record.handle = Some(handle.clone());
                    state.images.acquire(&spec.image);
                    true
                }
                _ => false,
            }
        };

        if !committed {
            self.discard(&handle).await;
            return Err(ContainerErr::Terminated(name.to_string()));
        }

        info!(name = name, image = spec.image.as_str(); "container started");
        Ok(())
    }

    async fn pull(&self, name: &str, image: &str, cancel: &CancellationToken) -> Result<()> {
        info!(name = name, image = image; "pulling image");
        let mut progress = self.runtime.pull_image(image);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(name = name, image = image; "pull abandoned");
                    return Err(ContainerErr::Terminated(name.to_string()));
                }
                next = progress.next() => match next {
                    Some(Ok(p)) => debug!(image = image; "{} {}", p.status, p.detail.unwrap_or_default()),
                    Some(Err(e)) => {
                        return Err(ContainerErr::PullFailed {
                            image: image.to_string(),
                            reason: e.to_string(),
                        });
                    }
                    None => break,
                },
            }
        }

        self.state.lock().images.track(image);
        Ok(())
    }

    fn ensure_wanted(&self, name: &str, generation: u64) -> Result<()> {
        let state = self.state.lock();
        match state.records.get(name) {
            Some(record) if record.generation == generation => Ok(()),
            _ => Err(ContainerErr::Terminated(name.to_string())),
        }
    }

    /// Drops the record of a start that failed, queueing an image it pulled for nothing.
    fn forget(&self, name: &str, generation: u64, image: &str) {
        let mut state = self.state.lock();
        if state
            .records
            .get(name)
            .is_some_and(|r| r.generation == generation)
        {
            state.records.remove(name);
        }
        state.images.abandon(image);
    }

    async fn discard(&self, handle: &str) {
        if let Err(e) = self.runtime.remove_container(handle).await {
            warn!("failed to remove container {handle}: {e}");
        }
    }

    /// Stops slot `name` wherever it is in its lifecycle.
    ///
    /// An in-flight pull is abandoned and an in-flight start removes what it created.
    /// A started container is force-removed and its image reference released. The
    /// slot's record is cleared in every case.
    pub async fn kill(&self, name: &str) -> Result<()> {
        let record = self.state.lock().records.remove(name);
        let Some(record) = record else {
            debug!(name = name; "kill on an empty slot");
            return Ok(());
        };

        record.pull.cancel();
        let Some(handle) = record.handle else {
            info!(name = name; "stopped while preparing");
            return Ok(());
        };

        let removed = self.runtime.remove_container(&handle).await;
        if self.state.lock().images.release(&record.image) {
            debug!(image = record.image.as_str(); "image is unused");
        }
        info!(name = name; "container removed");
        removed
    }

    /// Kills every slot, used on shutdown.
    pub async fn kill_all(&self) {
        let names: Vec<String> = self.state.lock().records.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.kill(&name).await {
                warn!("failed to kill {name}: {e}");
            }
        }
    }

    /// Removes unreferenced images, oldest first, until the images on disk (counting
    /// `incoming`) fit under the ceiling.
    ///
    /// # Returns
    /// How many images were removed. Stops at the first removal that fails.
    pub async fn auto_remove_images(&self, incoming: Option<&str>) -> Result<usize> {
        let mut removed = 0;

        loop {
            let candidate = {
                let mut state = self.state.lock();
                if state.images.occupancy(incoming) <= self.max_images {
                    return Ok(removed);
                }
                match state.images.take_removable() {
                    Some(image) => image,
                    None => return Ok(removed),
                }
            };

            if let Err(e) = self.runtime.remove_image(&candidate).await {
                self.state.lock().images.restore(candidate);
                return Err(e);
            }

            info!(image = candidate.as_str(); "removed unused image");
            removed += 1;
        }
    }

    pub fn status(&self, name: &str) -> Option<SlotStatus> {
        self.state.lock().records.get(name).map(|r| match r.handle {
            Some(_) => SlotStatus::Running,
            None => SlotStatus::Preparing,
        })
    }

    /// Follows the output of the started container in slot `name`.
    pub fn logs(&self, name: &str) -> Result<LogStream> {
        let handle = self.live_handle(name)?;
        Ok(self.runtime.logs(&handle))
    }

    /// Interrupts the processes matching `pattern` inside slot `name`, letting the
    /// workload exit on its own terms.
    pub async fn terminate_process(&self, name: &str, pattern: &str) -> Result<()> {
        let handle = self.live_handle(name)?;
        let script = format!(
            "ps -eo pid,args | grep '{pattern}' | grep -v grep | awk '{{print $1}}' | xargs -r kill -INT"
        );

        let out = self
            .runtime
            .exec(&handle, vec!["sh".into(), "-c".into(), script])
            .await?;
        debug!(name = name; "terminate output: {}", out.trim());
        Ok(())
    }

    /// Count of references held on `image`, `None` when untracked.
    pub fn image_refs(&self, image: &str) -> Option<usize> {
        self.state.lock().images.count(&normalize_image(image))
    }

    fn live_handle(&self, name: &str) -> Result<String> {
        self.state
            .lock()
            .records
            .get(name)
            .and_then(|r| r.handle.clone())
            .ok_or_else(|| ContainerErr::Terminated(name.to_string()))
    }
}
