use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{ObjectStorage, Progress};
use crate::Result;

/// Storage backed by a directory, objects stored at their path below `root`.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where the object at `remote` lives on disk.
    pub fn object_path(&self, remote: &str) -> PathBuf {
        self.root.join(remote.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(self.object_path(remote), local).await?;
        Ok(())
    }

    async fn upload(&self, remote: &str, local: &Path, progress: Option<Progress>) -> Result<()> {
        let target = self.object_path(remote);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(local, target).await?;

        if let Some(progress) = progress {
            progress(1.0);
        }
        Ok(())
    }
}
