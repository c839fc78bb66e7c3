use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    Docker,
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    models::{ContainerCreateBody, DeviceRequest, HostConfig, PortBinding},
    query_parameters::{
        CreateContainerOptionsBuilder, CreateImageOptionsBuilder, LogsOptionsBuilder,
        RemoveContainerOptionsBuilder, RemoveImageOptions, StartContainerOptions,
    },
};
use futures::StreamExt;

use super::{
    ContainerErr, ContainerRuntime, ContainerSpec, LogStream, PullProgress, PullStream, Result,
};

impl From<bollard::errors::Error> for ContainerErr {
    fn from(value: bollard::errors::Error) -> Self {
        Self::Runtime(value.to_string())
    }
}

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn is_conflict(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            ..
        }
    )
}

/// Translates a spec into the engine's create body.
///
/// GPUs are requested through a device request and also exposed to the NVIDIA
/// container runtime through `NVIDIA_VISIBLE_DEVICES`.
pub(crate) fn create_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let mut env = spec.env.clone();
    let device_requests = if spec.gpu_devices.is_empty() {
        None
    } else {
        env.insert(
            0,
            format!("NVIDIA_VISIBLE_DEVICES={}", spec.gpu_devices.join(",")),
        );
        Some(vec![DeviceRequest {
            device_ids: Some(spec.gpu_devices.clone()),
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        }])
    };

    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
        .ports
        .iter()
        .map(|p| {
            (
                format!("{}/tcp", p.container),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(p.host.to_string()),
                }]),
            )
        })
        .collect();

    let exposed_ports: HashMap<String, HashMap<(), ()>> = port_bindings
        .keys()
        .map(|port| (port.clone(), HashMap::new()))
        .collect();

    let host_config = HostConfig {
        binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        device_requests,
        ..Default::default()
    };

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        env: Some(env),
        labels: (!spec.labels.is_empty()).then(|| spec.labels.clone()),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// The local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn gpu_capable(&self) -> Result<bool> {
        let info = self.docker.info().await?;
        Ok(info
            .runtimes
            .is_some_and(|runtimes| runtimes.contains_key("nvidia")))
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn pull_image(&self, image: &str) -> PullStream {
        let options = CreateImageOptionsBuilder::default()
            .from_image(image)
            .build();

        self.docker
            .create_image(Some(options), None, None)
            .map(|res| {
                res.map(|info| PullProgress {
                    status: info.status.unwrap_or_default(),
                    detail: info.progress,
                })
                .map_err(ContainerErr::from)
            })
            .boxed()
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        self.docker
            .remove_image(image, None::<RemoveImageOptions>, None)
            .await?;
        Ok(())
    }

    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        let options = CreateContainerOptionsBuilder::default().name(name).build();
        match self
            .docker
            .create_container(Some(options), create_body(spec))
            .await
        {
            Ok(created) => Ok(created.id),
            Err(e) if is_conflict(&e) => Err(ContainerErr::NameInUse(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn start_container(&self, handle: &str) -> Result<()> {
        self.docker
            .start_container(handle, None::<StartContainerOptions>)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, handle: &str) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        match self.docker.remove_container(handle, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exec(&self, handle: &str, cmd: Vec<String>) -> Result<String> {
        let exec = self
            .docker
            .create_exec(
                handle,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let mut out = String::new();
        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None::<StartExecOptions>)
            .await?
        {
            while let Some(chunk) = output.next().await {
                out.push_str(&chunk?.to_string());
            }
        }
        Ok(out)
    }

    fn logs(&self, handle: &str) -> LogStream {
        let options = LogsOptionsBuilder::default()
            .follow(true)
            .stdout(true)
            .stderr(true)
            .build();

        self.docker
            .logs(handle, Some(options))
            .map(|res| res.map(|out| out.to_string()).map_err(ContainerErr::from))
            .boxed()
    }
}
