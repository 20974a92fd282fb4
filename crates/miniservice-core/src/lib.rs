pub mod errors;
pub mod health;
pub mod instance;
pub mod registry;
pub mod tag;

pub use errors::Error;
pub use health::{HealthCheck, HEALTH_PATH};
pub use instance::{CatalogEntry, RegistryRecord, ServiceIdentity};
pub use registry::{MemoryRegistry, Registry};
pub use tag::{CATEGORY_TAG, Endpoint, TAG_PREFIX};

pub type Result<T, E = Error> = std::result::Result<T, E>;
