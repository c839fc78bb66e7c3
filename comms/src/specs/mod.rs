//! Wire shapes of the records the node reads from and writes to the marketplace.

mod job_type;
mod request;
mod result;
mod status;

pub use job_type::{Framework, HttpMethod, JobKind, JobTypeSpec};
pub use request::{CancelRequest, InferenceData, InferenceRequest, TrainingRequest, requested_at};
pub use result::{InferenceResult, TrainStatus, TrainingUpdate};
pub use status::{GpuInfo, UserTransaction, WorkerStatus};
