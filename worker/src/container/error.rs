use std::{error::Error, fmt};

/// The container module's result type.
pub type Result<T> = std::result::Result<T, ContainerErr>;

#[derive(Debug)]
pub enum ContainerErr {
    /// The engine rejected or failed an operation.
    Runtime(String),
    PullFailed { image: String, reason: String },
    /// The slot was killed while the container was still being brought up.
    Terminated(String),
    AlreadyRunning(String),
    /// The engine already holds a container under this name.
    NameInUse(String),
}

impl fmt::Display for ContainerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerErr::Runtime(msg) => write!(f, "container runtime error: {msg}"),
            ContainerErr::PullFailed { image, reason } => {
                write!(f, "failed to pull {image}: {reason}")
            }
            ContainerErr::Terminated(name) => write!(f, "{name} was terminated"),
            ContainerErr::AlreadyRunning(name) => write!(f, "{name} is already running"),
            ContainerErr::NameInUse(name) => write!(f, "container name {name} is already in use"),
        }
    }
}

impl Error for ContainerErr {}
