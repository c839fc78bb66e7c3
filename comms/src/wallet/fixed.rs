use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use super::{SignedTx, TxBody, Wallet};
use crate::Result;

/// A wallet with a fixed balance that records payouts instead of making them.
pub struct StaticWallet {
    address: String,
    balance: Mutex<f64>,
    kyc_verified: bool,
    payouts: Mutex<Vec<f64>>,
}

impl StaticWallet {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            balance: Mutex::new(0.0),
            kyc_verified: true,
            payouts: Mutex::default(),
        }
    }

    pub fn with_balance(self, balance: f64) -> Self {
        *self.balance.lock() = balance;
        self
    }

    pub fn with_kyc(mut self, verified: bool) -> Self {
        self.kyc_verified = verified;
        self
    }

    pub fn payouts(&self) -> Vec<f64> {
        self.payouts.lock().clone()
    }
}

#[async_trait]
impl Wallet for StaticWallet {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, body: &TxBody) -> Result<SignedTx> {
        let tx_hash = format!("0x{:016x}", body.timestamp);
        Ok(SignedTx {
            signed_tx: json!({ "tx_body": body, "signature": tx_hash }),
            tx_hash,
        })
    }

    async fn balance(&self) -> Result<f64> {
        Ok(*self.balance.lock())
    }

    async fn is_kyc_verified(&self) -> Result<bool> {
        Ok(self.kyc_verified)
    }

    async fn payout(&self, amount: f64) -> Result<()> {
        *self.balance.lock() -= amount;
        self.payouts.lock().push(amount);
        Ok(())
    }
}
