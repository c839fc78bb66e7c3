use std::time::Duration;

use comms::{ChildAdded, specs::UserTransaction};
use log::{debug, error, info, warn};

use super::Worker;
use crate::Result;

/// Running totals of rewards earned and payouts confirmed, in ain.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RewardLedger {
    pub total_reward: f64,
    pub total_payout: f64,
}

impl RewardLedger {
    /// Applies a transaction, returning the total it changed.
    pub fn apply(&mut self, tx: &UserTransaction) -> Option<f64> {
        match tx.kind.as_str() {
            "REWARD_JOB" => {
                self.total_reward += tx.value;
                Some(self.total_reward)
            }
            "PAYOUT_CONFIRMED" => {
                self.total_payout += tx.value;
                Some(self.total_payout)
            }
            _ => None,
        }
    }
}

impl Worker {
    pub(super) fn handle_transaction(&self, child: ChildAdded) {
        let tx: UserTransaction = match serde_json::from_value(child.value) {
            Ok(tx) => tx,
            Err(e) => {
                warn!(key = child.key.as_str(); "ignoring malformed transaction: {e}");
                return;
            }
        };

        let total = self.ledger.lock().apply(&tx);
        if let Some(total) = total {
            if tx.timestamp > self.started_at {
                info!("{} total is now {total} ain (+{})", tx.kind, tx.value);
            }
        }
    }

    /// Requests a payout of the threshold amount once the balance covers it.
    ///
    /// # Returns
    /// Whether a payout was submitted.
    pub async fn request_payout(&self) -> Result<bool> {
        let threshold = self.config.payout_threshold as f64;
        let balance = self.wallet.balance().await?;
        if balance < threshold {
            debug!("balance {balance} is below the payout threshold");
            return Ok(false);
        }

        if !self.wallet.is_kyc_verified().await? {
            warn!("payout skipped, owner is not kyc verified");
            return Ok(false);
        }

        self.wallet.payout(threshold).await?;
        info!("requested payout of {threshold} ain");
        Ok(true)
    }

    pub(super) async fn payout_loop(self) {
        let interval = self.config.payout_interval().max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.request_payout().await {
                error!("payout request failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(kind: &str, value: f64) -> UserTransaction {
        UserTransaction {
            kind: kind.into(),
            value,
            timestamp: 0,
            tx_hash: None,
        }
    }

    #[test]
    fn totals_track_rewards_and_payouts_separately() {
        let mut ledger = RewardLedger::default();

        assert_eq!(ledger.apply(&tx("REWARD_JOB", 1.5)), Some(1.5));
        assert_eq!(ledger.apply(&tx("REWARD_JOB", 2.0)), Some(3.5));
        assert_eq!(ledger.apply(&tx("PAYOUT_CONFIRMED", 3.0)), Some(3.0));
        assert_eq!(ledger.apply(&tx("STAKE", 9.0)), None);
        assert_eq!(ledger.total_reward, 3.5);
    }
}
