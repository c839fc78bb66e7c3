//! Object storage holding training datasets and trained models.

mod http;
mod local;

use std::{path::Path, sync::Arc};

use async_trait::async_trait;

pub use http::HttpStorage;
pub use local::LocalStorage;

use crate::Result;

/// Upload progress callback, called with the fraction sent so far.
pub type Progress = Arc<dyn Fn(f32) + Send + Sync>;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Fetches the object at `remote` into the file at `local`.
    ///
    /// A failed download leaves no partial file behind.
    async fn download(&self, remote: &str, local: &Path) -> Result<()>;

    /// Stores the file at `local` as the object at `remote`.
    async fn upload(&self, remote: &str, local: &Path, progress: Option<Progress>) -> Result<()>;
}
