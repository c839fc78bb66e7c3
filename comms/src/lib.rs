//! Marketplace-facing plumbing for the node agent.
//!
//! Everything the worker exchanges with the outside world lives here: the realtime job
//! channel, object storage for datasets and trained models, and the wallet used to sign
//! writes and request payouts. The worker crate only depends on the traits.

pub mod channel;
mod error;
pub mod paths;
pub mod specs;
pub mod storage;
pub mod wallet;

use std::time::{SystemTime, UNIX_EPOCH};

pub use channel::{ChildAdded, JobChannel, Subscription, Topic};
pub use error::{CommsErr, Result};
pub use storage::ObjectStorage;
pub use wallet::Wallet;

/// Milliseconds since the unix epoch, the clock every marketplace record is stamped with.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
