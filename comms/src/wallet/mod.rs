//! Signing identity of the worker.
//!
//! Keys never live in the node process: `RemoteWallet` asks a signer service to sign
//! transactions and to move funds. `StaticWallet` stands in for it in tests.

mod remote;
mod fixed;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use fixed::StaticWallet;
pub use remote::RemoteWallet;

use crate::Result;

/// A single database operation inside a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "ref")]
    pub path: String,
    pub value: Value,
}

/// Unsigned transaction body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxBody {
    pub operation: Operation,
    pub timestamp: u64,
    pub nonce: i64,
}

impl TxBody {
    /// Builds an unordered (`nonce = -1`) `SET_VALUE` of `value` at `path`.
    pub fn set_value(path: String, value: Value, timestamp: u64) -> Self {
        Self {
            operation: Operation {
                kind: "SET_VALUE".into(),
                path,
                value,
            },
            timestamp,
            nonce: -1,
        }
    }
}

/// A transaction ready to be submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTx {
    pub tx_hash: String,
    pub signed_tx: Value,
}

#[async_trait]
pub trait Wallet: Send + Sync {
    /// The worker address derived from the signing key.
    fn address(&self) -> &str;

    async fn sign(&self, body: &TxBody) -> Result<SignedTx>;

    /// Balance of rewards that can be paid out.
    async fn balance(&self) -> Result<f64>;

    /// Whether the owner passed identity verification, a precondition for payouts.
    async fn is_kyc_verified(&self) -> Result<bool>;

    /// Moves `amount` to the owner's external account.
    async fn payout(&self, amount: f64) -> Result<()>;
}
