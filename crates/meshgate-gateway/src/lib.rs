pub mod authz;
pub mod boot;
pub mod loader;
pub mod registry;
pub mod testing;

pub use boot::{BootError, BootOrchestrator, BootReport};
pub use loader::{InstanceLoader, LoadError};
pub use registry::{RegistryClient, SpecError};
