pub mod auth;
pub mod envelope;
pub mod network;
pub mod request;
pub mod spec;

pub use auth::{AuthContext, TrustedOrigins};
pub use envelope::{Headers, Query, ReplyEnvelope};
pub use network::{Network, NetworkError};
pub use request::ProxyRequest;
pub use spec::{BootEntry, BootSpec, ServiceSpec, SERVER_PROFILE};
