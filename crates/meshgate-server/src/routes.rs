use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use metrics::counter;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value;
use tracing::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use meshgate_core::envelope::Query;
use meshgate_core::network::{targets, Network, NetworkError};
use meshgate_core::{
    AuthContext, BootSpec, Headers, ProxyRequest, ReplyEnvelope, ServiceSpec, TrustedOrigins,
    SERVER_PROFILE,
};
use meshgate_gateway::registry::SpecError;
use meshgate_gateway::{authz, BootOrchestrator, RegistryClient};

/// Config header on code-fetch responses: the spec's config, JSON encoded
/// then URI-component encoded so it cannot interfere with the protocol.
const CONFIG_HEADER: &str = "x-service-config";

#[derive(Clone)]
pub struct AppState {
    pub net: Arc<dyn Network>,
    pub registry: RegistryClient,
    pub orchestrator: BootOrchestrator,
    pub origins: TrustedOrigins,
}

impl AppState {
    pub fn new(net: Arc<dyn Network>, services_dir: &str, origins: TrustedOrigins) -> Self {
        Self {
            registry: RegistryClient::new(net.clone()),
            orchestrator: BootOrchestrator::new(net.clone(), services_dir),
            net,
            origins,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(health_check, fetch_code, dns_get, dns_put, trigger_boot, proxy_call),
    components(schemas(
        ReplyEnvelope,
        ProxyRequest,
        BootSpec,
        meshgate_core::BootEntry,
        ServiceSpec,
        AuthContext,
    ))
)]
struct ApiDoc;

/// The full operation table. The catch-all public handler is the router
/// fallback, so every explicitly bound route wins over it.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health_check))
        .route("/_codebase/:name", get(fetch_code))
        .route("/_codebase/code/:id", put(upload_code))
        .route("/_codebase/meta/:id", put(upload_meta))
        .route("/_codebase/assets/:id", put(upload_assets))
        .route("/_codebase/named/:name", put(upload_named))
        .route("/_dns/:name", get(dns_get).put(dns_put))
        .route("/_doc/:name", get(doc_get))
        .route("/_boot", post(trigger_boot))
        .route("/:service/_config/:key", put(push_config))
        .route("/:service/_proxy", post(proxy_call))
        .fallback(public_route)
        .with_state(state)
}

// --- reply plumbing -------------------------------------------------------

/// Relay an internal reply verbatim: status, optional headers, body.
fn relay(reply: ReplyEnvelope) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = match reply.body {
        Value::Null => status.into_response(),
        Value::String(s) => (status, s).into_response(),
        other => (status, Json(other)).into_response(),
    };
    if let Some(headers) = reply.headers {
        for (k, v) in headers {
            if let (Ok(name), Ok(value)) =
                (HeaderName::try_from(k.as_str()), HeaderValue::try_from(v.as_str()))
            {
                response.headers_mut().insert(name, value);
            }
        }
    }
    response
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

fn unavailable(err: impl std::fmt::Display) -> Response {
    error!(error = %err, "request handling failed");
    (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response()
}

fn header_map(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
        .collect()
}

/// JSON bodies forward as structured values, everything else as text.
fn body_value(bytes: &Bytes) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    Some(
        serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
    )
}

// --- admission ------------------------------------------------------------

fn require_origin(state: &AppState, addr: SocketAddr) -> Result<(), Response> {
    if state.origins.is_trusted(addr.ip()) {
        Ok(())
    } else {
        warn!(origin = %addr, "rejected untrusted origin");
        Err((StatusCode::FORBIDDEN, format!("Forbidden from {}", addr.ip())).into_response())
    }
}

async fn require_token(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, Response> {
    authz::check_token(&state.net, &header_map(headers))
        .await
        .map_err(relay)
}

// --- handlers -------------------------------------------------------------

#[utoipa::path(get, path = "/health", responses((status = 200, description = "OK")))]
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Code fetch: resolve the named spec, apply the caller's profile filter,
/// return the artifact body with the config in a header. Hidden and missing
/// specs are indistinguishable to the caller.
#[utoipa::path(
    get,
    path = "/_codebase/{name}",
    params(("name" = String, Path, description = "Logical service name")),
    responses(
        (status = 200, description = "Code body, config in the x-service-config header"),
        (status = 404, description = "Unknown or hidden"),
        (status = 500, description = "Collaborator failure, relayed verbatim")
    )
)]
async fn fetch_code(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let auth = match require_token(&state, &headers).await {
        Ok(a) => a,
        Err(r) => return r,
    };
    match fetch_code_inner(&state, &name, &auth).await {
        Ok(response) => response,
        Err(e) => {
            // Transport failures only; upstream statuses relay from the
            // inner handler.
            error!(service = %name, error = %e, "code fetch failed");
            not_found()
        }
    }
}

async fn fetch_code_inner(
    state: &AppState,
    name: &str,
    auth: &AuthContext,
) -> Result<Response, NetworkError> {
    let spec = match state.registry.resolve_spec(name, &auth.profile).await {
        Ok(spec) => spec,
        Err(SpecError::Network(e)) => return Err(e),
        // A failing collaborator is relayed as-is; only unknown and hidden
        // specs collapse to not-found.
        Err(SpecError::Upstream { reply, .. }) => return Ok(relay(reply)),
        Err(_) => return Ok(not_found()),
    };
    let code = state
        .net
        .call(targets::CODEBASE, "get", &format!("/code/{}", spec.code_id), None, None, None)
        .await?;
    if !code.is_success() {
        return Ok(not_found());
    }

    let mut response =
        (StatusCode::OK, code.body_str().unwrap_or_default().to_string()).into_response();
    if let Some(config) = &spec.config {
        let encoded =
            utf8_percent_encode(&config.to_string(), NON_ALPHANUMERIC).to_string();
        if let Ok(value) = HeaderValue::try_from(encoded) {
            response.headers_mut().insert(HeaderName::from_static(CONFIG_HEADER), value);
        }
    }
    Ok(response)
}

async fn upload_code(
    state: State<AppState>,
    addr: ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward_codebase(state, addr, "code", id, headers, body).await
}

async fn upload_meta(
    state: State<AppState>,
    addr: ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward_codebase(state, addr, "meta", id, headers, body).await
}

async fn upload_assets(
    state: State<AppState>,
    addr: ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward_codebase(state, addr, "assets", id, headers, body).await
}

async fn upload_named(
    state: State<AppState>,
    addr: ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward_codebase(state, addr, "named", name, headers, body).await
}

/// Shared forwarder for the four codebase keyspaces.
async fn forward_codebase(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    keyspace: &str,
    id: String,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = require_origin(&state, addr) {
        return response;
    }
    let result = state
        .net
        .call(
            targets::CODEBASE,
            "put",
            &format!("/{keyspace}/{id}"),
            None,
            Some(&header_map(&headers)),
            body_value(&body),
        )
        .await;
    match result {
        Ok(reply) => relay(reply),
        Err(e) => unavailable(e),
    }
}

#[utoipa::path(
    get,
    path = "/_dns/{name}",
    params(("name" = String, Path, description = "Registry key")),
    responses((status = 200, description = "Registry reply, relayed verbatim", body = ReplyEnvelope))
)]
async fn dns_get(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
) -> Response {
    if let Err(response) = require_origin(&state, addr) {
        return response;
    }
    match state.registry.query(&name).await {
        Ok(reply) => relay(reply),
        Err(e) => unavailable(e),
    }
}

#[utoipa::path(
    put,
    path = "/_dns/{name}",
    params(("name" = String, Path, description = "Registry key")),
    responses(
        (status = 200, description = "Rebound"),
        (status = 503, description = "Registry unreachable")
    )
)]
async fn dns_put(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    if let Err(response) = require_origin(&state, addr) {
        return response;
    }
    let body = body_value(&body).unwrap_or(Value::Null);
    match state.registry.rebind(&name, body).await {
        Ok(reply) if reply.is_success() => StatusCode::OK.into_response(),
        Ok(reply) => relay(reply),
        Err(e) => unavailable(e),
    }
}

async fn doc_get(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
) -> Response {
    if let Err(response) = require_origin(&state, addr) {
        return response;
    }
    match state.net.call(&name, "get", "/_doc", None, None, None).await {
        Ok(reply) => relay(reply),
        Err(e) => unavailable(e),
    }
}

/// Re-boot from an arbitrary posted spec. The report comes back only after
/// every per-service sequence has finished.
#[utoipa::path(
    post,
    path = "/_boot",
    request_body = BootSpec,
    responses((status = 200, description = "Per-service boot report"))
)]
async fn trigger_boot(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(spec): Json<BootSpec>,
) -> Response {
    if let Err(response) = require_origin(&state, addr) {
        return response;
    }
    counter!("meshgate_boots_total").increment(1);
    let report = state.orchestrator.boot_from_spec(&spec).await;
    info!(
        started = report.started.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "boot sweep finished"
    );
    Json(report).into_response()
}

/// Push a config value at a running service.
async fn push_config(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path((service, key)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    if let Err(response) = require_origin(&state, addr) {
        return response;
    }
    let result = state
        .net
        .call(&service, "put", &format!("/_config/{key}"), None, None, body_value(&body))
        .await;
    match result {
        Ok(reply) => relay(reply),
        Err(e) => unavailable(e),
    }
}

/// Proxy an internal call on behalf of a client. Denials are reported as
/// not-found so the endpoint is not disclosed as valid-but-restricted.
#[utoipa::path(
    post,
    path = "/{service}/_proxy",
    params(("service" = String, Path, description = "Calling service's identity")),
    request_body = ProxyRequest,
    responses(
        (status = 200, description = "The forwarded call's reply envelope", body = ReplyEnvelope),
        (status = 404, description = "Denied or unknown")
    )
)]
async fn proxy_call(
    State(state): State<AppState>,
    Path(service): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ProxyRequest>,
) -> Response {
    let auth = match require_token(&state, &headers).await {
        Ok(a) => a,
        Err(r) => return r,
    };
    if !authz::proxy_permitted(&state.registry, &service, &auth, &request).await {
        info!(caller = %service, target = %request.name, "proxy denied");
        return not_found();
    }

    counter!("meshgate_proxy_forwards_total").increment(1);
    let result = state
        .net
        .call(
            &request.name,
            &request.verb,
            &request.resid,
            request.query.as_ref(),
            request.headers.as_ref(),
            request.body.clone(),
        )
        .await;
    match result {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => unavailable(e),
    }
}

/// Catch-all: any other path may target a service flagged public. Gate on
/// the registry's meta record, then forward; a non-2xx forward ends the
/// chain as not-found.
async fn public_route(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match public_route_inner(&state, method, uri, headers, body).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "public routing failed");
            not_found()
        }
    }
}

async fn public_route_inner(
    state: &AppState,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, NetworkError> {
    let path = uri.path().trim_start_matches('/');
    let (service, resid) = match path.split_once('/') {
        Some((service, rest)) => (service, format!("/{rest}")),
        None => (path, String::new()),
    };
    if service.is_empty() {
        return Ok(not_found());
    }

    let spec = match state.registry.resolve_meta(service).await {
        Ok(spec) => spec,
        Err(SpecError::Network(e)) => return Err(e),
        Err(SpecError::Upstream { reply, .. }) => {
            error!(service = %service, status = reply.status, "meta lookup failed upstream");
            return Ok(relay(reply));
        }
        Err(e) => {
            error!(service = %service, error = %e, "no meta record");
            return Ok(not_found());
        }
    };
    if !spec.public || !spec.visible_to(SERVER_PROFILE) {
        warn!(service = %service, "blocked access to non-public service");
        return Ok(not_found());
    }

    let verb = method.as_str().to_lowercase();
    let query: Option<Query> =
        uri.query().and_then(|q| serde_urlencoded::from_str(q).ok());
    let reply = state
        .net
        .call(
            service,
            &verb,
            &resid,
            query.as_ref(),
            Some(&header_map(&headers)),
            body_value(&body),
        )
        .await?;
    if reply.is_success() {
        Ok(relay(reply))
    } else {
        Ok(not_found())
    }
}
