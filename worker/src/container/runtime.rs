use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::Result;

/// Host-to-container port publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

/// Everything needed to create a workload container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub gpu_devices: Vec<String>,
    pub ports: Vec<PortMapping>,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn gpus(mut self, devices: Vec<String>) -> Self {
        self.gpu_devices = devices;
        self
    }

    pub fn port(mut self, host: u16, container: u16) -> Self {
        self.ports.push(PortMapping { host, container });
        self
    }

    pub fn env(mut self, var: impl Into<String>) -> Self {
        self.env.push(var.into());
        self
    }

    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.binds.push(bind.into());
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullProgress {
    pub status: String,
    pub detail: Option<String>,
}

/// Pull progress; dropping the stream abandons the pull.
pub type PullStream = BoxStream<'static, Result<PullProgress>>;

/// Followed container output, ending when the container exits.
pub type LogStream = BoxStream<'static, Result<String>>;

/// The operations the manager needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether the engine can hand GPUs to containers.
    async fn gpu_capable(&self) -> Result<bool>;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    fn pull_image(&self, image: &str) -> PullStream;

    async fn remove_image(&self, image: &str) -> Result<()>;

    /// Creates (but does not start) a container, returning its handle.
    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, handle: &str) -> Result<()>;

    /// Force-removes a container by handle or name; a missing container is not an error.
    async fn remove_container(&self, handle: &str) -> Result<()>;

    /// Runs `cmd` inside the container and returns its combined output.
    async fn exec(&self, handle: &str, cmd: Vec<String>) -> Result<String>;

    fn logs(&self, handle: &str) -> LogStream;
}
