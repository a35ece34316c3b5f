use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use crate::envelope::{Headers, Query, ReplyEnvelope};

/// Well-known targets on the internal network.
pub mod targets {
    /// The code/artifact storage collaborator.
    pub const CODEBASE: &str = "_codebase";
    /// The name-registry collaborator.
    pub const DNS: &str = "_dns";
    /// The runtime hosting service instances.
    pub const SERVICES: &str = "_services";
    /// The token-checking collaborator.
    pub const AUTH: &str = "auth";
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("transport failure calling {target}: {reason}")]
    Transport { target: String, reason: String },
    /// Every downstream call is bounded; a stalled collaborator surfaces
    /// here instead of stalling its caller indefinitely.
    #[error("call to {target} timed out")]
    Timeout { target: String },
    #[error("atomic scheduler unavailable")]
    SchedulerClosed,
}

/// A unit of work the node runtime executes exclusive of interleaving with
/// other such units.
pub type AtomicUnit = BoxFuture<'static, ()>;

/// Contract of the internal message-passing network. Implementations live
/// at the edges (the node adapter in the server, scripted doubles in tests);
/// all orchestration logic is written against this trait.
#[async_trait]
pub trait Network: Send + Sync + 'static {
    /// Single round-trip to a named target. Upstream failures come back as
    /// a non-success [`ReplyEnvelope`], not as `Err`; `Err` is reserved for
    /// transport-level faults.
    async fn call(
        &self,
        target: &str,
        verb: &str,
        resid: &str,
        query: Option<&Query>,
        headers: Option<&Headers>,
        body: Option<Value>,
    ) -> Result<ReplyEnvelope, NetworkError>;

    /// Fire-and-forget scheduling of an atomic-execution unit.
    fn atomic(&self, unit: AtomicUnit);
}
