//! Thin adapter onto the node runtime that actually hosts service
//! instances. The wire shape is the call envelope itself, posted as JSON to
//! a single endpoint; anything richer belongs to the runtime, not here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use meshgate_core::envelope::{Headers, Query};
use meshgate_core::network::{AtomicUnit, Network, NetworkError};
use meshgate_core::ReplyEnvelope;

#[derive(Serialize)]
struct CallFrame<'a> {
    target: &'a str,
    verb: &'a str,
    resid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a Query>,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<&'a Headers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
}

/// Upper bound on any single downstream call. A stalled collaborator must
/// not stall its caller's awaiting operation indefinitely.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RemoteNode {
    http: reqwest::Client,
    base: String,
    atomic_tx: mpsc::UnboundedSender<AtomicUnit>,
}

impl RemoteNode {
    /// Must be called from within the runtime; spawns the single consumer
    /// task that executes atomic units back to back. Units scheduled
    /// through this node therefore never interleave with each other.
    pub fn connect(base: impl Into<String>) -> Arc<Self> {
        let (atomic_tx, mut rx) = mpsc::unbounded_channel::<AtomicUnit>();
        tokio::spawn(async move {
            while let Some(unit) = rx.recv().await {
                unit.await;
            }
        });
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .expect("failed to build http client");
        Arc::new(Self {
            http,
            base: base.into(),
            atomic_tx,
        })
    }
}

#[async_trait]
impl Network for RemoteNode {
    async fn call(
        &self,
        target: &str,
        verb: &str,
        resid: &str,
        query: Option<&Query>,
        headers: Option<&Headers>,
        body: Option<Value>,
    ) -> Result<ReplyEnvelope, NetworkError> {
        let frame = CallFrame { target, verb, resid, query, headers, body };
        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                NetworkError::Timeout { target: target.to_string() }
            } else {
                NetworkError::Transport { target: target.to_string(), reason: e.to_string() }
            }
        };

        let response = self
            .http
            .post(format!("{}/call", self.base))
            .json(&frame)
            .send()
            .await
            .map_err(transport)?;
        response.json::<ReplyEnvelope>().await.map_err(transport)
    }

    fn atomic(&self, unit: AtomicUnit) {
        if self.atomic_tx.send(unit).is_err() {
            warn!("atomic scheduler is gone, unit dropped");
        }
    }
}
