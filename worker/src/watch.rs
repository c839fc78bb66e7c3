//! Polling watcher for the structured progress file a training job writes.
//!
//! The job rewrites the whole file on every update. The watcher re-reads it when its
//! size or mtime changes and forwards only what changed since the last forwarded
//! snapshot.

use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use log::debug;
use serde_json::{Map, Value};
use tokio::{fs, sync::mpsc};
use tokio_util::sync::CancellationToken;

use crate::shell;

/// Keys of `new` that are absent from `old` or hold a different value.
///
/// Objects are compared recursively; removed keys are not reported. Returns `None`
/// when nothing changed.
pub fn diff(old: &Value, new: &Value) -> Option<Value> {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut changed = Map::new();
            for (key, value) in new {
                let entry = match old.get(key) {
                    None => Some(value.clone()),
                    Some(prev) => diff(prev, value),
                };
                if let Some(entry) = entry {
                    changed.insert(key.clone(), entry);
                }
            }
            (!changed.is_empty()).then_some(Value::Object(changed))
        }
        _ if old == new => None,
        _ => Some(new.clone()),
    }
}

/// The last forwarded version of the progress file.
#[derive(Debug, Clone)]
pub struct LogSnapshot {
    last: Value,
}

impl Default for LogSnapshot {
    fn default() -> Self {
        Self {
            last: Value::Object(Map::new()),
        }
    }
}

impl LogSnapshot {
    /// Diffs `current` against the snapshot, adopting it when something changed.
    pub fn advance(&mut self, current: Value) -> Option<Value> {
        let changed = diff(&self.last, &current)?;
        self.last = current;
        Some(changed)
    }
}

type Stamp = (Option<SystemTime>, u64);

pub struct JsonWatcher {
    path: PathBuf,
    interval: Duration,
}

impl JsonWatcher {
    /// Prepares to watch `path`, truncating whatever a previous job left there.
    pub async fn create(path: impl Into<PathBuf>, interval: Duration) -> io::Result<Self> {
        let path = path.into();
        shell::reset_file(&path).await?;
        Ok(Self { path, interval })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts polling; diffs arrive on the returned receiver.
    ///
    /// After `stop` fires the file is read one last time, then the receiver closes.
    pub fn spawn(self, stop: CancellationToken) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(self.run(tx, stop));
        rx
    }

    async fn run(self, tx: mpsc::Sender<Value>, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut snapshot = LogSnapshot::default();
        let mut seen: Option<Stamp> = None;

        loop {
            let stopping = tokio::select! {
                _ = stop.cancelled() => true,
                _ = ticker.tick() => false,
            };

            if let Some(changed) = self.poll(&mut seen, &mut snapshot).await {
                if tx.send(changed).await.is_err() {
                    return;
                }
            }

            if stopping {
                return;
            }
        }
    }

    async fn poll(&self, seen: &mut Option<Stamp>, snapshot: &mut LogSnapshot) -> Option<Value> {
        let meta = fs::metadata(&self.path).await.ok()?;
        let stamp = (meta.modified().ok(), meta.len());
        if seen.as_ref() == Some(&stamp) {
            return None;
        }

        let raw = fs::read_to_string(&self.path).await.ok()?;
        if raw.trim().is_empty() {
            return None;
        }

        // partial writes fail to parse; the stamp stays stale so the next tick retries
        let current: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                debug!("progress file not parseable yet: {e}");
                return None;
            }
        };

        *seen = Some(stamp);
        snapshot.advance(current)
    }
}
