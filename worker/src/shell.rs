//! Host-side process and filesystem helpers.

use std::{io, path::Path};

use tokio::{fs, process::Command};

/// Runs `program` with `args` and returns its stdout.
///
/// A non-zero exit is reported as an error carrying stderr.
pub async fn exec(program: &str, args: &[&str]) -> io::Result<String> {
    let output = Command::new(program).args(args).output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(io::Error::other(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub async fn file_exists(path: impl AsRef<Path>) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

pub async fn make_dir(path: impl AsRef<Path>) -> io::Result<()> {
    fs::create_dir_all(path).await
}

/// Removes a directory tree; a missing directory is not an error.
pub async fn remove_dir(path: impl AsRef<Path>) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Creates `path` empty, truncating any previous content.
pub async fn reset_file(path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, b"").await
}
