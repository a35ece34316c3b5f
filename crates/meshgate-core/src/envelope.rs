use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

pub type Headers = HashMap<String, String>;
pub type Query = HashMap<String, String>;

/// Status codes used on the internal network. Plain numbers, HTTP-flavored.
pub mod status {
    pub const OK: u16 = 200;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const SERVER_ERROR: u16 = 500;
    pub const UNAVAILABLE: u16 = 503;
}

/// The uniform result shape of every internal network call and every
/// externally returned response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReplyEnvelope {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub body: Value,
}

impl ReplyEnvelope {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, headers: None, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(status::OK, body)
    }

    pub fn not_found() -> Self {
        Self::new(status::NOT_FOUND, Value::String("Not found".into()))
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body as text, for replies carrying code or plain messages.
    pub fn body_str(&self) -> Option<&str> {
        self.body.as_str()
    }
}
