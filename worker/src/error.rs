use std::{error::Error, fmt, io};

use comms::CommsErr;

use crate::container::ContainerErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Config(String),
    GpuUnavailable,
    Unhealthy { name: String, attempts: u32 },
    Busy,
    Canceled(String),
    InvalidRequest(String),
    Http(reqwest::Error),
    Container(ContainerErr),
    Comms(CommsErr),
    Io(io::Error),
}

impl WorkerErr {
    /// Whether the failure is the expected outcome of a cancellation rather than a fault.
    pub fn is_terminate(&self) -> bool {
        matches!(
            self,
            WorkerErr::Canceled(_) | WorkerErr::Container(ContainerErr::Terminated(_))
        )
    }
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Config(msg) => write!(f, "invalid configuration: {msg}"),
            WorkerErr::GpuUnavailable => write!(f, "container runtime has no GPU support"),
            WorkerErr::Unhealthy { name, attempts } => {
                write!(f, "{name} did not become healthy after {attempts} attempts")
            }
            WorkerErr::Busy => write!(f, "Already running"),
            WorkerErr::Canceled(train_id) => write!(f, "training {train_id} was canceled"),
            WorkerErr::InvalidRequest(msg) => write!(f, "{msg}"),
            WorkerErr::Http(e) => write!(f, "workload request failed: {e}"),
            WorkerErr::Container(e) => write!(f, "{e}"),
            WorkerErr::Comms(e) => write!(f, "{e}"),
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Http(e) => Some(e),
            WorkerErr::Container(e) => Some(e),
            WorkerErr::Comms(e) => Some(e),
            WorkerErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ContainerErr> for WorkerErr {
    fn from(value: ContainerErr) -> Self {
        Self::Container(value)
    }
}

impl From<CommsErr> for WorkerErr {
    fn from(value: CommsErr) -> Self {
        Self::Comms(value)
    }
}

impl From<reqwest::Error> for WorkerErr {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}
