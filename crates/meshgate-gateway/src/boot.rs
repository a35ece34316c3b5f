use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info};

use meshgate_core::network::{targets, Network, NetworkError};
use meshgate_core::{BootSpec, ServiceSpec, SERVER_PROFILE};

use crate::loader::{InstanceLoader, LoadError};
use crate::registry::{RegistryClient, SpecError};

/// Fixed name the codebase collaborator is installed under during
/// bootstrap, before the registry can be queried.
pub const CODEBASE_NAME: &str = "_codebase";

/// Entry file of a file-sourced bootstrap artifact.
const BOOTSTRAP_ENTRY: &str = "index.js";

#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("cannot read bootstrap source {}: {source}", path.display())]
    Source {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("runtime returned status {0} instantiating the codebase service")]
    CodebaseInstance(u16),
}

/// Per-service outcome of one boot sweep.
#[derive(Debug, Default, Serialize)]
pub struct BootReport {
    /// (name, instance id) for every service that came up.
    pub started: Vec<(String, String)>,
    /// Names skipped because their spec is disabled or not for this profile.
    pub skipped: Vec<String>,
    /// (name, reason) for every service whose boot was abandoned.
    pub failed: Vec<(String, String)>,
}

/// Drives a boot spec: bootstraps the codebase collaborator, then brings up
/// each named service as its own atomic unit. One service failing never
/// blocks or aborts another.
#[derive(Clone)]
pub struct BootOrchestrator {
    net: Arc<dyn Network>,
    registry: RegistryClient,
    loader: InstanceLoader,
    services_dir: PathBuf,
}

impl BootOrchestrator {
    pub fn new(net: Arc<dyn Network>, services_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry: RegistryClient::new(net.clone()),
            loader: InstanceLoader::new(net.clone()),
            net,
            services_dir: services_dir.into(),
        }
    }

    /// Bootstrap the codebase collaborator from a file-based code source.
    /// This must run before any `start` processing: specs live in the
    /// codebase, so nothing can be resolved until it exists.
    pub async fn boot_codebase(&self, code_id: &str, config: Option<Value>) -> Result<String, BootError> {
        let path = self.services_dir.join(code_id).join(BOOTSTRAP_ENTRY);
        let src = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| BootError::Source { path: path.clone(), source })?;

        self.net
            .call(targets::SERVICES, "put", CODEBASE_NAME, None, None, Some(Value::String(src)))
            .await?;
        let created = self
            .net
            .call(
                targets::SERVICES,
                "post",
                &format!("{CODEBASE_NAME}/instances"),
                None,
                None,
                config,
            )
            .await?;
        if !created.is_success() {
            return Err(BootError::CodebaseInstance(created.status));
        }
        let instance_id = created.body_str().unwrap_or_default().to_string();
        self.registry.bind_name(CODEBASE_NAME, &instance_id).await?;
        info!(instance = %instance_id, "codebase service up");
        Ok(instance_id)
    }

    /// Run a full boot: bootstrap entries first, then the `start` list.
    pub async fn boot(&self, spec: &BootSpec) -> Result<BootReport, BootError> {
        if let Some(first) = spec.boot.first() {
            let code_id = first.code_id.as_deref().unwrap_or("codebase");
            self.boot_codebase(code_id, first.config.clone()).await?;
        }
        Ok(self.boot_from_spec(spec).await)
    }

    /// Bring up every eligible service in `start`. Each per-service
    /// sequence runs as one atomic unit so concurrent boots never interleave
    /// their registry writes; the report is returned only after every unit
    /// has finished (the original resolved on submission — see DESIGN.md).
    pub async fn boot_from_spec(&self, spec: &BootSpec) -> BootReport {
        let mut report = BootReport::default();
        let mut pending = Vec::new();

        for name in &spec.start {
            let resolved = match self.registry.named_spec(name).await {
                Ok(s) => s,
                Err(e) => {
                    error!(service = %name, error = %e, "failed to resolve boot spec");
                    report.failed.push((name.clone(), e.to_string()));
                    continue;
                }
            };
            if resolved.disabled || !resolved.visible_to(SERVER_PROFILE) {
                info!(service = %name, "skipping");
                report.skipped.push(name.clone());
                continue;
            }

            let (tx, rx) = oneshot::channel();
            let orchestrator = self.clone();
            let name = name.clone();
            self.net.atomic(Box::pin(async move {
                let outcome = orchestrator.boot_service(&resolved).await;
                let _ = tx.send((name, outcome));
            }));
            pending.push(rx);
        }

        for rx in pending {
            match rx.await {
                Ok((name, Ok(instance_id))) => report.started.push((name, instance_id)),
                Ok((name, Err(e))) => {
                    error!(service = %name, error = %e, "boot failed");
                    report.failed.push((name, e.to_string()));
                }
                // Unit dropped without reporting: the scheduler went away.
                Err(_) => {}
            }
        }
        report
    }

    /// One service's boot sequence: Load → Instantiate → Bind. Meta records
    /// are written before the name pointer, so a reader never resolves a
    /// name to an instance whose meta record is absent.
    pub async fn boot_service(&self, spec: &ServiceSpec) -> Result<String, BootError> {
        let label = spec.name.as_deref().unwrap_or(&spec.code_id);
        info!(service = %label, "booting");

        self.loader.ensure_loaded(&spec.code_id).await?;
        let instance_id = self
            .loader
            .create_instance(&spec.code_id, spec.config.clone())
            .await?;

        if let Some(name) = &spec.name {
            self.registry.put_meta(name, spec).await?;
            self.registry.put_meta(&instance_id, spec).await?;
            self.registry.bind_name(name, &instance_id).await?;
        }
        info!(service = %label, instance = %instance_id, "booted");
        Ok(instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedNetwork;
    use meshgate_core::ReplyEnvelope;
    use serde_json::json;
    use std::sync::Arc;

    fn script_service(net: &Arc<ScriptedNetwork>, name: &str, spec: Value) {
        net.on("_codebase", "get", &format!("/named/{name}"), ReplyEnvelope::ok(spec.clone()));
        let code_id = spec["codeId"].as_str().unwrap().to_string();
        net.on("_codebase", "get", &format!("/code/{code_id}"), ReplyEnvelope::ok(json!("code")));
        net.on("_services", "put", &code_id, ReplyEnvelope::ok(json!("ok")));
        net.on_fn("_services", "post", &format!("{code_id}/instances"), |_| {
            ReplyEnvelope::ok(Value::String(ScriptedNetwork::mint_instance_id()))
        });
        net.on("_dns", "put", "", ReplyEnvelope::ok(json!("ok")));
    }

    fn start_list(names: &[&str]) -> BootSpec {
        BootSpec {
            boot: vec![],
            start: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn successful_boot_binds_meta_before_name() {
        let net = ScriptedNetwork::new();
        script_service(
            &net,
            "echo",
            json!({ "name": "echo", "codeId": "echo-v1", "env": ["server"] }),
        );

        let orchestrator = BootOrchestrator::new(net.clone(), "services");
        let report = orchestrator.boot_from_spec(&start_list(&["echo"])).await;

        assert_eq!(report.started.len(), 1);
        let (name, instance_id) = &report.started[0];
        assert_eq!(name, "echo");

        let dns_writes: Vec<_> = net
            .calls()
            .into_iter()
            .filter(|c| c.target == "_dns" && c.verb == "put")
            .collect();
        assert_eq!(dns_writes.len(), 3);
        assert_eq!(dns_writes[0].resid, "echo/_meta");
        assert_eq!(dns_writes[1].resid, format!("{instance_id}/_meta"));
        // The bare-name pointer is written last.
        assert_eq!(dns_writes[2].resid, "echo");
        assert_eq!(dns_writes[2].body, Some(Value::String(instance_id.clone())));
        // Both meta records carry the same spec snapshot.
        assert_eq!(dns_writes[0].body, dns_writes[1].body);
    }

    #[tokio::test]
    async fn disabled_spec_is_skipped_without_loading() {
        let net = ScriptedNetwork::new();
        script_service(
            &net,
            "echo",
            json!({ "name": "echo", "codeId": "echo-v1", "env": ["server"], "disabled": true }),
        );

        let orchestrator = BootOrchestrator::new(net.clone(), "services");
        let report = orchestrator.boot_from_spec(&start_list(&["echo"])).await;

        assert_eq!(report.skipped, vec!["echo".to_string()]);
        assert!(report.started.is_empty());
        assert!(report.failed.is_empty());
        // Only the spec resolution happened, never a code fetch.
        assert!(net.calls().iter().all(|c| c.resid != "/code/echo-v1"));
    }

    #[tokio::test]
    async fn non_server_profile_is_skipped() {
        let net = ScriptedNetwork::new();
        script_service(
            &net,
            "widget",
            json!({ "name": "widget", "codeId": "widget-v1", "env": ["browser"] }),
        );

        let orchestrator = BootOrchestrator::new(net.clone(), "services");
        let report = orchestrator.boot_from_spec(&start_list(&["widget"])).await;
        assert_eq!(report.skipped, vec!["widget".to_string()]);
    }

    #[tokio::test]
    async fn one_failure_never_blocks_the_next_service() {
        let net = ScriptedNetwork::new();
        // svc_a resolves, but its code fetch blows up server-side.
        net.on(
            "_codebase",
            "get",
            "/named/svc_a",
            ReplyEnvelope::ok(json!({ "name": "svc_a", "codeId": "a-v1", "env": ["server"] })),
        );
        net.on("_codebase", "get", "/code/a-v1", ReplyEnvelope::new(500, json!("boom")));
        script_service(&net, "svc_b", json!({ "name": "svc_b", "codeId": "b-v1", "env": ["server"] }));

        let orchestrator = BootOrchestrator::new(net.clone(), "services");
        let report = orchestrator.boot_from_spec(&start_list(&["svc_a", "svc_b"])).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "svc_a");
        assert_eq!(report.started.len(), 1);
        assert_eq!(report.started[0].0, "svc_b");
    }

    #[tokio::test]
    async fn unresolvable_name_is_recorded_and_sweep_continues() {
        let net = ScriptedNetwork::new();
        script_service(&net, "svc_b", json!({ "name": "svc_b", "codeId": "b-v1", "env": ["server"] }));

        let orchestrator = BootOrchestrator::new(net.clone(), "services");
        let report = orchestrator.boot_from_spec(&start_list(&["ghost", "svc_b"])).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "ghost");
        assert_eq!(report.started.len(), 1);
    }

    #[tokio::test]
    async fn rebooting_mints_a_new_instance_with_the_same_invariant() {
        let net = ScriptedNetwork::new();
        script_service(&net, "echo", json!({ "name": "echo", "codeId": "echo-v1", "env": ["server"] }));

        let orchestrator = BootOrchestrator::new(net.clone(), "services");
        let first = orchestrator.boot_from_spec(&start_list(&["echo"])).await;
        let second = orchestrator.boot_from_spec(&start_list(&["echo"])).await;

        let first_id = &first.started[0].1;
        let second_id = &second.started[0].1;
        assert_ne!(first_id, second_id);

        // The second sweep rewrote meta for the new instance before the
        // pointer, same as the first.
        let writes: Vec<_> = net
            .calls()
            .into_iter()
            .filter(|c| c.target == "_dns")
            .map(|c| c.resid)
            .collect();
        assert_eq!(writes.len(), 6);
        assert_eq!(writes[3], "echo/_meta");
        assert_eq!(writes[4], format!("{second_id}/_meta"));
        assert_eq!(writes[5], "echo");
    }

    #[tokio::test]
    async fn anonymous_spec_boots_without_registry_writes() {
        let net = ScriptedNetwork::new();
        net.on("_codebase", "get", "/code/anon-v1", ReplyEnvelope::ok(json!("code")));
        net.on("_services", "put", "anon-v1", ReplyEnvelope::ok(json!("ok")));
        net.on("_services", "post", "anon-v1/instances", ReplyEnvelope::ok(json!("inst-1")));

        let orchestrator = BootOrchestrator::new(net.clone(), "services");
        let spec = ServiceSpec {
            name: None,
            code_id: "anon-v1".into(),
            config: None,
            env: None,
            disabled: false,
            public: false,
        };
        let id = orchestrator.boot_service(&spec).await.unwrap();
        assert_eq!(id, "inst-1");
        assert!(net.calls().iter().all(|c| c.target != "_dns"));
    }
}
