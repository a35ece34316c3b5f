//! Scripted in-memory stand-in for the internal network, for tests that
//! exercise orchestration logic without a node runtime. Rules map
//! (target, verb, resid prefix) to replies; every call is recorded so tests
//! can assert ordering, and `atomic` feeds a single consumer task so units
//! run back to back, matching the runtime's non-interleaving guarantee.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use meshgate_core::envelope::{Headers, Query, ReplyEnvelope};
use meshgate_core::network::{AtomicUnit, Network, NetworkError};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub target: String,
    pub verb: String,
    pub resid: String,
    pub body: Option<Value>,
}

type ReplyFn = Box<dyn Fn(&RecordedCall) -> ReplyEnvelope + Send + Sync>;

struct Rule {
    target: String,
    verb: String,
    resid_prefix: String,
    reply: ReplyFn,
}

pub struct ScriptedNetwork {
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<RecordedCall>>,
    atomic_tx: mpsc::UnboundedSender<AtomicUnit>,
}

impl ScriptedNetwork {
    /// Must be called from within a tokio runtime; the atomic consumer task
    /// is spawned immediately.
    pub fn new() -> Arc<Self> {
        let (atomic_tx, mut rx) = mpsc::unbounded_channel::<AtomicUnit>();
        tokio::spawn(async move {
            while let Some(unit) = rx.recv().await {
                unit.await;
            }
        });
        Arc::new(Self {
            rules: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            atomic_tx,
        })
    }

    /// Script a fixed reply. Rules are persistent; the earliest matching
    /// rule wins.
    pub fn on(&self, target: &str, verb: &str, resid_prefix: &str, reply: ReplyEnvelope) {
        self.on_fn(target, verb, resid_prefix, move |_| reply.clone());
    }

    /// Script a computed reply, e.g. to mint a fresh instance id per call.
    pub fn on_fn(
        &self,
        target: &str,
        verb: &str,
        resid_prefix: &str,
        reply: impl Fn(&RecordedCall) -> ReplyEnvelope + Send + Sync + 'static,
    ) {
        self.rules.lock().unwrap().push(Rule {
            target: target.to_string(),
            verb: verb.to_string(),
            resid_prefix: resid_prefix.to_string(),
            reply: Box::new(reply),
        });
    }

    /// Everything called so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.log.lock().unwrap().clone()
    }

    /// Convenience for scripted create-instance replies.
    pub fn mint_instance_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn call(
        &self,
        target: &str,
        verb: &str,
        resid: &str,
        _query: Option<&Query>,
        _headers: Option<&Headers>,
        body: Option<Value>,
    ) -> Result<ReplyEnvelope, NetworkError> {
        let call = RecordedCall {
            target: target.to_string(),
            verb: verb.to_string(),
            resid: resid.to_string(),
            body,
        };
        self.log.lock().unwrap().push(call.clone());

        let rules = self.rules.lock().unwrap();
        let reply = rules
            .iter()
            .find(|r| r.target == target && r.verb == verb && resid.starts_with(&r.resid_prefix))
            .map(|r| (r.reply)(&call))
            .unwrap_or_else(ReplyEnvelope::not_found);
        Ok(reply)
    }

    fn atomic(&self, unit: AtomicUnit) {
        let _ = self.atomic_tx.send(unit);
    }
}
