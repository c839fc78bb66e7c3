use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use serde_json::json;

use super::{SignedTx, TxBody, Wallet};
use crate::{Result, error::check_status};

#[derive(Deserialize)]
struct AddressResponse {
    address: String,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KycResponse {
    is_verified: bool,
}

/// Client of the signer service that holds the worker key.
pub struct RemoteWallet {
    client: reqwest::Client,
    base_url: String,
    address: String,
    eth_address: String,
}

impl RemoteWallet {
    /// Connects to the signer at `base_url` and learns the worker address from it.
    ///
    /// # Arguments
    /// * `base_url` - Root URL of the signer service.
    /// * `eth_address` - External account that payouts are sent to.
    ///
    /// # Returns
    /// The connected wallet, or an error if the signer is unreachable.
    pub async fn connect(base_url: &str, eth_address: &str) -> Result<Self> {
        let client = reqwest::Client::new();
        let base_url = base_url.trim_end_matches('/').to_string();

        let resp = client.get(format!("{base_url}/address")).send().await?;
        let AddressResponse { address } = check_status(resp).await?.json().await?;
        info!(address = address.as_str(); "connected to signer");

        Ok(Self {
            client,
            base_url,
            address,
            eth_address: eth_address.to_string(),
        })
    }
}

#[async_trait]
impl Wallet for RemoteWallet {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, body: &TxBody) -> Result<SignedTx> {
        let resp = self
            .client
            .post(format!("{}/sign", self.base_url))
            .json(&json!({ "tx_body": body }))
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    async fn balance(&self) -> Result<f64> {
        let resp = self
            .client
            .get(format!("{}/balance", self.base_url))
            .send()
            .await?;
        let BalanceResponse { balance } = check_status(resp).await?.json().await?;
        Ok(balance)
    }

    async fn is_kyc_verified(&self) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/kyc", self.base_url))
            .query(&[("ethAddress", self.eth_address.as_str())])
            .send()
            .await?;
        let KycResponse { is_verified } = check_status(resp).await?.json().await?;
        Ok(is_verified)
    }

    async fn payout(&self, amount: f64) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/payout", self.base_url))
            .json(&json!({ "amount": amount, "ethAddress": self.eth_address }))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}
