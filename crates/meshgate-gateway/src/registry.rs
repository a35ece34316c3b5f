use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use meshgate_core::envelope::status;
use meshgate_core::network::{targets, Network, NetworkError};
use meshgate_core::{ReplyEnvelope, ServiceSpec};

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("no spec registered for {0}")]
    NotFound(String),
    /// The spec exists but its env list excludes the caller's profile.
    /// Callers must surface this identically to [`SpecError::NotFound`].
    #[error("spec for {0} is not visible in this profile")]
    NotVisible(String),
    /// The collaborator answered with a failure. Carries the whole reply so
    /// callers can relay it verbatim.
    #[error("registry returned status {} for {name}", reply.status)]
    Upstream { name: String, reply: ReplyEnvelope },
    #[error("spec for {0} does not parse")]
    Malformed(String),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Resolves logical names to specs and name→instance bindings through the
/// codebase and registry collaborators. Every operation is a single
/// round-trip; no retries, no local cache.
#[derive(Clone)]
pub struct RegistryClient {
    net: Arc<dyn Network>,
}

impl RegistryClient {
    pub fn new(net: Arc<dyn Network>) -> Self {
        Self { net }
    }

    /// Raw spec lookup by logical name, no profile filtering.
    pub async fn named_spec(&self, name: &str) -> Result<ServiceSpec, SpecError> {
        let reply = self
            .net
            .call(targets::CODEBASE, "get", &format!("/named/{name}"), None, None, None)
            .await?;
        parse_spec(name, reply)
    }

    /// Spec lookup with the profile filter applied. A spec with no env list
    /// is valid in all profiles.
    pub async fn resolve_spec(&self, name: &str, profile: &str) -> Result<ServiceSpec, SpecError> {
        let spec = self.named_spec(name).await?;
        if spec.visible_to(profile) {
            Ok(spec)
        } else {
            Err(SpecError::NotVisible(name.to_string()))
        }
    }

    /// Fetch the spec snapshot recorded under `<name>/_meta`.
    pub async fn resolve_meta(&self, name: &str) -> Result<ServiceSpec, SpecError> {
        let reply = self
            .net
            .call(targets::DNS, "get", &format!("{name}/_meta"), None, None, None)
            .await?;
        parse_spec(name, reply)
    }

    /// Record a spec snapshot under `<key>/_meta`. Must happen before the
    /// bare name is pointed at an instance, so a resolved name never lacks
    /// its meta record.
    pub async fn put_meta(&self, key: &str, spec: &ServiceSpec) -> Result<(), SpecError> {
        let body = serde_json::to_value(spec).map_err(|_| SpecError::Malformed(key.into()))?;
        let reply = self
            .net
            .call(targets::DNS, "put", &format!("{key}/_meta"), None, None, Some(body))
            .await?;
        expect_success(key, reply)
    }

    /// Point a bare logical name at a running instance.
    pub async fn bind_name(&self, name: &str, instance_id: &str) -> Result<(), SpecError> {
        let reply = self
            .net
            .call(
                targets::DNS,
                "put",
                name,
                None,
                None,
                Some(Value::String(instance_id.to_string())),
            )
            .await?;
        expect_success(name, reply)
    }

    /// Verbatim registry query for the administrative surface. The
    /// collaborator's reply is relayed untouched.
    pub async fn query(&self, name: &str) -> Result<ReplyEnvelope, NetworkError> {
        self.net.call(targets::DNS, "get", name, None, None, None).await
    }

    /// Verbatim registry write for the administrative surface.
    pub async fn rebind(&self, name: &str, body: Value) -> Result<ReplyEnvelope, NetworkError> {
        self.net.call(targets::DNS, "put", name, None, None, Some(body)).await
    }
}

fn parse_spec(name: &str, reply: ReplyEnvelope) -> Result<ServiceSpec, SpecError> {
    if reply.status == status::NOT_FOUND {
        return Err(SpecError::NotFound(name.to_string()));
    }
    if !reply.is_success() {
        return Err(SpecError::Upstream { name: name.to_string(), reply });
    }
    serde_json::from_value(reply.body).map_err(|e| {
        warn!(service = %name, error = %e, "spec body does not parse");
        SpecError::Malformed(name.to_string())
    })
}

fn expect_success(name: &str, reply: ReplyEnvelope) -> Result<(), SpecError> {
    if reply.is_success() {
        Ok(())
    } else {
        Err(SpecError::Upstream { name: name.to_string(), reply })
    }
}
