use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use meshgate_core::network::{targets, Network, NetworkError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("codebase returned status {status} fetching code {code_id}")]
    Fetch { code_id: String, status: u16 },
    #[error("runtime returned status {status} installing code {code_id}")]
    Install { code_id: String, status: u16 },
    #[error("runtime returned status {status} instantiating {code_id}")]
    Create { code_id: String, status: u16 },
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Installs code artifacts into the runtime and requests instances.
#[derive(Clone)]
pub struct InstanceLoader {
    net: Arc<dyn Network>,
}

impl InstanceLoader {
    pub fn new(net: Arc<dyn Network>) -> Self {
        Self { net }
    }

    /// Fetch the artifact and (re-)install it into the runtime. Always a
    /// fresh fetch, even if a previous load succeeded; the codebase
    /// collaborator's change feed pre-warms changed code, which keeps this
    /// acceptable. See DESIGN.md for the deferred cache.
    pub async fn ensure_loaded(&self, code_id: &str) -> Result<(), LoadError> {
        let fetched = self
            .net
            .call(targets::CODEBASE, "get", &format!("/code/{code_id}"), None, None, None)
            .await?;
        if !fetched.is_success() {
            return Err(LoadError::Fetch { code_id: code_id.to_string(), status: fetched.status });
        }

        let installed = self
            .net
            .call(targets::SERVICES, "put", code_id, None, None, Some(fetched.body))
            .await?;
        if !installed.is_success() {
            return Err(LoadError::Install {
                code_id: code_id.to_string(),
                status: installed.status,
            });
        }
        debug!(code_id, "code installed");
        Ok(())
    }

    /// Ask the runtime for a new instance of already-loaded code. Returns
    /// the minted instance id.
    pub async fn create_instance(
        &self,
        code_id: &str,
        config: Option<Value>,
    ) -> Result<String, LoadError> {
        let reply = self
            .net
            .call(targets::SERVICES, "post", &format!("{code_id}/instances"), None, None, config)
            .await?;
        if !reply.is_success() {
            return Err(LoadError::Create { code_id: code_id.to_string(), status: reply.status });
        }
        match reply.body_str() {
            Some(id) => Ok(id.to_string()),
            None => Err(LoadError::Create { code_id: code_id.to_string(), status: reply.status }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedNetwork;
    use meshgate_core::ReplyEnvelope;
    use serde_json::json;

    #[tokio::test]
    async fn ensure_loaded_fetches_then_installs() {
        let net = ScriptedNetwork::new();
        net.on("_codebase", "get", "/code/echo-v1", ReplyEnvelope::ok(json!("fn main() {}")));
        net.on("_services", "put", "echo-v1", ReplyEnvelope::ok(json!("ok")));

        let loader = InstanceLoader::new(net.clone());
        loader.ensure_loaded("echo-v1").await.unwrap();

        let calls = net.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].target, "_codebase");
        assert_eq!(calls[1].target, "_services");
        // The runtime receives the exact bytes the codebase returned.
        assert_eq!(calls[1].body, Some(json!("fn main() {}")));
    }

    #[tokio::test]
    async fn fetch_failure_surfaces_codebase_status() {
        let net = ScriptedNetwork::new();
        net.on("_codebase", "get", "/code/echo-v1", ReplyEnvelope::new(500, json!("db down")));

        let loader = InstanceLoader::new(net.clone());
        match loader.ensure_loaded("echo-v1").await {
            Err(LoadError::Fetch { status, .. }) => assert_eq!(status, 500),
            other => panic!("unexpected: {other:?}"),
        }
        // No install attempt after a failed fetch.
        assert_eq!(net.calls().len(), 1);
    }

    #[tokio::test]
    async fn create_instance_returns_minted_id() {
        let net = ScriptedNetwork::new();
        net.on("_services", "post", "echo-v1/instances", ReplyEnvelope::ok(json!("inst-7")));

        let loader = InstanceLoader::new(net.clone());
        let id = loader.create_instance("echo-v1", Some(json!({"port": 1}))).await.unwrap();
        assert_eq!(id, "inst-7");
        assert_eq!(net.calls()[0].body, Some(json!({"port": 1})));
    }
}
