//! Extension discovery, activation and per-extension storage

pub mod api;
pub mod context;
pub mod engine;
pub mod loader;
pub mod manifest;
pub mod state;
pub mod storage;
pub mod workspace_scan;

pub use api::HostApi;
pub use context::{ExtensionContext, StorageLayout};
pub use engine::{ActivationEngine, ExtensionStatus};
pub use loader::{ActivationError, EntryPointLoader, ExtensionModule, StaticEntryPointLoader};
pub use manifest::{ActivationEvent, Contributes, ExtensionManifest, ManifestError};
pub use state::{Enablement, EnablementStore, ExtensionState, ExtensionStateChange};
pub use storage::{Memento, SecretStorage, StorageError};
