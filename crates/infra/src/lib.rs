//! Infrastructure layer: config, coordination lock, credential cache,
//! provider contract, storage and notifications.

pub mod config;
pub mod credentials;
pub mod directory;
pub mod lock;
pub mod notify;
pub mod provider;
pub mod shutdown;
pub mod storage;

pub use config::{ConfigError, MonitorConfig, WorkerConfig};
pub use credentials::{ClientFactory, CredentialCache, CredentialError, CredentialMaterial};
pub use directory::{InMemoryTenantDirectory, TenantDirectory};
pub use lock::{CoordinationLock, CoordinationStore, LockError, LockGuard, LockHandle};
pub use notify::{NotificationKind, NotificationSink, Priority};
pub use provider::{ComplaintApi, ProviderError, QueryWindow};
pub use storage::{BlacklistStore, ComplaintStore, OrderStore, StorageError};
