//! Container lifecycle for the workloads the node runs.
//!
//! `ContainerManager` owns every named slot and the image reference counts;
//! `ContainerRuntime` is the narrow engine surface it drives.

mod docker;
mod error;
mod images;
mod manager;
mod runtime;

pub use docker::DockerRuntime;
pub use error::{ContainerErr, Result};
pub use images::{ImageRegistry, normalize_image};
pub use manager::{ContainerManager, SlotStatus};
pub use runtime::{ContainerRuntime, ContainerSpec, LogStream, PortMapping, PullProgress, PullStream};
