use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use reqwest::header::ACCEPT;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    ChildAdded, JobChannel, Subscription, Topic,
    sse::{SseEvent, SseParser},
};
use crate::{
    CommsErr, Result, Wallet,
    error::check_status,
    now_ms, paths,
    specs::{InferenceResult, JobTypeSpec, TrainingUpdate, WorkerStatus},
    wallet::TxBody,
};

const INFER_RESPONSE: &str = "inferResponse";
const SEND_SIGNED_TX: &str = "sendSignedTransaction";
const SET_WORKER_INFO: &str = "setWorkerInfo";

/// Endpoints of the realtime database and of the callable functions that accept writes.
#[derive(Debug, Clone)]
pub struct HttpChannelConfig {
    pub database_url: String,
    pub functions_url: String,
    pub auth_token: Option<String>,
    pub eth_address: Option<String>,
    pub reconnect_delay: Duration,
}

/// Channel over the realtime database REST API.
///
/// Reads follow paths as server-sent event streams; writes are signed transactions
/// posted to callable functions, which apply them on the worker's behalf.
pub struct HttpChannel {
    client: reqwest::Client,
    config: HttpChannelConfig,
    wallet: Arc<dyn Wallet>,
}

impl HttpChannel {
    pub fn new(config: HttpChannelConfig, wallet: Arc<dyn Wallet>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            wallet,
        }
    }

    fn db_url(&self, path: &str) -> String {
        let base = self.config.database_url.trim_end_matches('/');
        match &self.config.auth_token {
            Some(token) => format!("{base}{path}.json?auth={token}"),
            None => format!("{base}{path}.json"),
        }
    }

    async fn call(&self, function: &str, data: Value) -> Result<()> {
        let url = format!(
            "{}/{function}",
            self.config.functions_url.trim_end_matches('/')
        );
        let resp = self
            .client
            .post(url)
            .json(&json!({ "data": data }))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn set_value(&self, function: &str, path: String, value: Value) -> Result<()> {
        let tx = TxBody::set_value(path, value, now_ms());
        let signed = self.wallet.sign(&tx).await?;
        debug!(function = function, tx_hash = signed.tx_hash.as_str(); "sending signed transaction");
        self.call(function, signed.signed_tx).await
    }
}

#[async_trait]
impl JobChannel for HttpChannel {
    fn address(&self) -> &str {
        self.wallet.address()
    }

    async fn subscribe(&self, topic: Topic) -> Result<Subscription> {
        let url = self.db_url(&topic.path(self.address()));
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(follow(
            self.client.clone(),
            url,
            tx,
            cancel.clone(),
            self.config.reconnect_delay,
        ));
        info!("subscribed to {topic:?}");

        Ok(Subscription::new(rx, cancel))
    }

    async fn job_type(&self, name: &str) -> Result<Option<JobTypeSpec>> {
        let resp = self.client.get(self.db_url(&paths::job_type(name))).send().await?;
        let value: Value = check_status(resp).await?.json().await?;
        if value.is_null() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_value(value)?))
    }

    async fn send_inference_result(
        &self,
        request_id: &str,
        result: &InferenceResult,
    ) -> Result<()> {
        let mut value = serde_json::to_value(result)?;
        if let Value::Object(map) = &mut value {
            map.insert("updatedAt".into(), json!(now_ms()));
        }

        let path = paths::inference_result(request_id, self.address());
        self.set_value(INFER_RESPONSE, path, value).await
    }

    async fn update_training(
        &self,
        train_id: &str,
        user_addr: &str,
        update: &TrainingUpdate,
    ) -> Result<()> {
        let path = paths::training_result(train_id, user_addr, self.address());
        self.set_value(SEND_SIGNED_TX, path, serde_json::to_value(update)?)
            .await
    }

    async fn set_worker_status(&self, status: &WorkerStatus) -> Result<()> {
        let mut params = serde_json::to_value(status)?;
        if let Value::Object(map) = &mut params {
            map.insert("address".into(), json!(self.address()));
            if let Some(eth) = &self.config.eth_address {
                map.insert("ethAddress".into(), json!(eth));
            }
        }

        let value = json!({ "updatedAt": now_ms(), "params": params });
        self.set_value(SET_WORKER_INFO, paths::worker_info(self.address()), value)
            .await
    }
}

/// Keeps an event stream open on `url` until cancelled, reconnecting after failures.
async fn follow(
    client: reqwest::Client,
    url: String,
    tx: mpsc::UnboundedSender<ChildAdded>,
    cancel: CancellationToken,
    reconnect_delay: Duration,
) {
    let mut seen = HashSet::new();

    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = stream_once(&client, &url, &tx, &mut seen) => outcome,
        };

        match outcome {
            Ok(()) => debug!("event stream ended, reconnecting"),
            Err(CommsErr::Closed) => return,
            Err(e) => warn!("event stream failed: {e}"),
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
}

async fn stream_once(
    client: &reqwest::Client,
    url: &str,
    tx: &mpsc::UnboundedSender<ChildAdded>,
    seen: &mut HashSet<String>,
) -> Result<()> {
    let resp = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?;
    let mut body = check_status(resp).await?.bytes_stream();
    let mut parser = SseParser::default();

    while let Some(chunk) = body.next().await {
        for event in parser.feed(&chunk?) {
            for (key, value) in dispatch(event)? {
                if seen.insert(key.clone()) {
                    tx.send(ChildAdded { key, value })
                        .map_err(|_| CommsErr::Closed)?;
                }
            }
        }
    }

    Ok(())
}

/// Maps a database event onto the children it adds.
fn dispatch(event: SseEvent) -> Result<Vec<(String, Value)>> {
    match event.event.as_str() {
        "put" | "patch" => match serde_json::from_str::<Value>(&event.data) {
            Ok(payload) => Ok(added_children(&payload)),
            Err(e) => {
                warn!("ignoring malformed {} event: {e}", event.event);
                Ok(Vec::new())
            }
        },
        "keep-alive" => Ok(Vec::new()),
        "cancel" | "auth_revoked" => Err(CommsErr::Status {
            code: 401,
            body: event.data,
        }),
        other => {
            debug!("ignoring {other} event");
            Ok(Vec::new())
        }
    }
}

/// Children carried by a `{path, data}` payload.
///
/// A write at the root carries every child; a write one level down is a single child.
/// Deeper writes modify an existing child and add nothing.
fn added_children(payload: &Value) -> Vec<(String, Value)> {
    let path = payload.get("path").and_then(Value::as_str).unwrap_or("/");
    let Some(data) = payload.get("data") else {
        return Vec::new();
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => match data {
            Value::Object(map) => map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => Vec::new(),
        },
        [key] if !data.is_null() => vec![(key.to_string(), data.clone())],
        _ => Vec::new(),
    }
}
