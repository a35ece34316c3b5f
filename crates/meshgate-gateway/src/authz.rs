use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use meshgate_core::envelope::status;
use meshgate_core::network::{targets, Network};
use meshgate_core::{AuthContext, Headers, ProxyRequest, ReplyEnvelope};

use crate::registry::RegistryClient;

/// Token admission: delegate to the `auth` collaborator with the caller's
/// headers. A non-success reply short-circuits with that exact reply; a
/// success reply yields the caller's permission context.
pub async fn check_token(net: &Arc<dyn Network>, headers: &Headers) -> Result<AuthContext, ReplyEnvelope> {
    let reply = match net
        .call(targets::AUTH, "post", "/check", None, Some(headers), None)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "auth service unreachable");
            return Err(ReplyEnvelope::new(
                status::UNAVAILABLE,
                Value::String("auth unavailable".into()),
            ));
        }
    };
    if !reply.is_success() {
        return Err(reply);
    }
    match serde_json::from_value(reply.body) {
        Ok(ctx) => Ok(ctx),
        Err(e) => {
            warn!(error = %e, "auth reply body does not parse");
            // A context that permits nothing.
            Ok(AuthContext::default())
        }
    }
}

/// Proxy permission chain, first match wins:
/// 1. the caller names itself as target,
/// 2. the caller's allow list marks the target permitted,
/// 3. the target's spec is flagged public.
/// Callers report a denial as not-found, never forbidden, so the proxy
/// endpoint is not disclosed as valid-but-restricted.
pub async fn proxy_permitted(
    registry: &RegistryClient,
    caller: &str,
    auth: &AuthContext,
    request: &ProxyRequest,
) -> bool {
    if caller == request.name {
        return true;
    }
    if auth.allows(&request.name) {
        return true;
    }
    match registry.named_spec(&request.name).await {
        Ok(spec) => spec.public,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedNetwork;
    use serde_json::json;
    use std::collections::HashMap;

    fn proxy_req(name: &str) -> ProxyRequest {
        ProxyRequest {
            name: name.into(),
            verb: "get".into(),
            resid: "/x".into(),
            query: None,
            headers: None,
            body: None,
        }
    }

    fn allow(service: &str) -> AuthContext {
        AuthContext {
            profile: "guest".into(),
            services: HashMap::from([(service.to_string(), true)]),
        }
    }

    #[tokio::test]
    async fn self_target_wins_regardless_of_everything_else() {
        let net = ScriptedNetwork::new();
        // Not public, and no allow-list entry either.
        net.on(
            "_codebase",
            "get",
            "/named/me",
            ReplyEnvelope::ok(json!({ "codeId": "c", "public": false })),
        );
        let registry = RegistryClient::new(net.clone());

        assert!(proxy_permitted(&registry, "me", &AuthContext::default(), &proxy_req("me")).await);
        // Rule 1 matched, so the spec was never even fetched.
        assert!(net.calls().is_empty());
    }

    #[tokio::test]
    async fn allow_list_beats_public_flag() {
        let net = ScriptedNetwork::new();
        let registry = RegistryClient::new(net.clone());

        assert!(proxy_permitted(&registry, "me", &allow("db"), &proxy_req("db")).await);
        assert!(net.calls().is_empty());
    }

    #[tokio::test]
    async fn public_spec_admits_unlisted_caller() {
        let net = ScriptedNetwork::new();
        net.on(
            "_codebase",
            "get",
            "/named/open",
            ReplyEnvelope::ok(json!({ "codeId": "c", "public": true })),
        );
        let registry = RegistryClient::new(net.clone());

        assert!(proxy_permitted(&registry, "me", &AuthContext::default(), &proxy_req("open")).await);
    }

    #[tokio::test]
    async fn everything_else_is_denied() {
        let net = ScriptedNetwork::new();
        net.on(
            "_codebase",
            "get",
            "/named/closed",
            ReplyEnvelope::ok(json!({ "codeId": "c", "public": false })),
        );
        let registry = RegistryClient::new(net.clone());

        assert!(!proxy_permitted(&registry, "me", &AuthContext::default(), &proxy_req("closed")).await);
        // Unknown target denies too.
        assert!(!proxy_permitted(&registry, "me", &AuthContext::default(), &proxy_req("ghost")).await);
    }

    #[tokio::test]
    async fn token_check_surfaces_auth_reply_on_rejection() {
        let net = ScriptedNetwork::new();
        net.on("auth", "post", "/check", ReplyEnvelope::new(401, json!("bad token")));
        let net: Arc<dyn Network> = net;

        let err = check_token(&net, &Headers::new()).await.unwrap_err();
        assert_eq!(err.status, 401);
    }

    #[tokio::test]
    async fn token_check_yields_context() {
        let net = ScriptedNetwork::new();
        net.on(
            "auth",
            "post",
            "/check",
            ReplyEnvelope::ok(json!({ "profile": "admin", "services": { "db": true } })),
        );
        let net: Arc<dyn Network> = net;

        let ctx = check_token(&net, &Headers::new()).await.unwrap();
        assert_eq!(ctx.profile, "admin");
        assert!(ctx.allows("db"));
    }
}
