use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::envelope::{Headers, Query};

/// A fully-specified internal network call submitted through the proxy
/// endpoint on behalf of an external client.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProxyRequest {
    /// Logical name of the target service.
    pub name: String,
    /// Lowercase verb, e.g. "get" or "post".
    pub verb: String,
    /// Resource path within the target service.
    pub resid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub body: Option<Value>,
}
