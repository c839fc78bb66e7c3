use std::{future::Future, time::Duration};

use comms::specs::Framework;
use serde_json::Value;

/// Whether a model server's health response reports it ready to serve.
pub fn is_healthy(framework: Framework, body: &Value) -> bool {
    match framework {
        Framework::Pytorch => body.get("status").and_then(Value::as_str) == Some("Healthy"),
        Framework::Tensorflow => {
            let available = |v: &Value| v.get("state").and_then(Value::as_str) == Some("AVAILABLE");
            match body.get("model_version_status") {
                Some(Value::Array(versions)) => versions.iter().any(available),
                Some(status) => available(status),
                None => false,
            }
        }
    }
}

/// Bounded readiness polling.
#[derive(Debug, Clone, Copy)]
pub struct HealthCheck {
    max_attempts: u32,
    delay: Duration,
}

impl HealthCheck {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Calls `probe` until it reports healthy, waiting `delay` between attempts.
    ///
    /// # Returns
    /// The attempt that succeeded, or `None` once every attempt failed.
    pub async fn wait_until_healthy<F, Fut>(&self, mut probe: F) -> Option<u32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for attempt in 1..=self.max_attempts {
            if probe().await {
                return Some(attempt);
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.delay).await;
            }
        }
        None
    }
}
