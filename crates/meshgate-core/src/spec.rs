use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Profile tag a spec must carry (or leave `env` unset) to boot on the
/// server side.
pub const SERVER_PROFILE: &str = "server";

/// Declarative description of a bootable service, owned by the codebase
/// collaborator. Re-fetched on every resolution; never cached here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ServiceSpec {
    /// Logical name. Unnamed specs are anonymous/bootstrap-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "codeId")]
    pub code_id: String,
    /// Opaque configuration passed to the instance on creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub config: Option<Value>,
    /// Profiles the spec is valid for. Absent means valid everywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    #[serde(default)]
    pub disabled: bool,
    /// Externally reachable without per-caller permission.
    #[serde(default)]
    pub public: bool,
}

impl ServiceSpec {
    /// No env list means the spec is usable in all profiles.
    pub fn visible_to(&self, profile: &str) -> bool {
        match &self.env {
            None => true,
            Some(env) => env.iter().any(|e| e == profile),
        }
    }
}

/// One bootstrap entry of a boot document. The first entry configures the
/// codebase collaborator itself.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BootEntry {
    #[serde(rename = "codeId", default, skip_serializing_if = "Option::is_none")]
    pub code_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub config: Option<Value>,
}

/// The boot document read at process start or posted to the re-boot
/// endpoint. Not persisted by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BootSpec {
    #[serde(default)]
    pub boot: Vec<BootEntry>,
    /// Logical service names to bring up, in order of submission.
    #[serde(default)]
    pub start: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(env: Option<Vec<&str>>) -> ServiceSpec {
        ServiceSpec {
            name: Some("echo".into()),
            code_id: "echo-v1".into(),
            config: None,
            env: env.map(|e| e.into_iter().map(String::from).collect()),
            disabled: false,
            public: false,
        }
    }

    #[test]
    fn no_env_is_visible_everywhere() {
        let s = spec(None);
        for profile in ["server", "browser", "admin", ""] {
            assert!(s.visible_to(profile));
        }
    }

    #[test]
    fn env_membership_decides_visibility() {
        let s = spec(Some(vec!["server", "admin"]));
        assert!(s.visible_to("server"));
        assert!(s.visible_to("admin"));
        assert!(!s.visible_to("guest"));
        assert!(!s.visible_to(""));
    }

    #[test]
    fn spec_json_defaults() {
        let s: ServiceSpec = serde_json::from_str(r#"{"codeId":"c1"}"#).unwrap();
        assert!(s.name.is_none());
        assert!(!s.disabled);
        assert!(!s.public);
        assert!(s.visible_to("anything"));
    }

    #[test]
    fn boot_spec_lists_default_empty() {
        let b: BootSpec = serde_json::from_str("{}").unwrap();
        assert!(b.boot.is_empty());
        assert!(b.start.is_empty());
    }
}
