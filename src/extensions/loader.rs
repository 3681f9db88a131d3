//! Entry point loading
//!
//! The engine never loads code itself. An [`EntryPointLoader`] turns a
//! manifest's `main` reference into an [`ExtensionModule`]; how that happens
//! (in-process table, dynamic library, subprocess) is up to the embedder.

use super::api::HostApi;
use super::context::ExtensionContext;
use super::manifest::ExtensionManifest;
use super::storage::StorageError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("Unknown extension: {0}")]
    UnknownExtension(String),

    #[error("Extension {0} is disabled")]
    Disabled(String),

    #[error("Extension {0} is not trusted")]
    Untrusted(String),

    #[error("Extension {0} was deactivated and stays inactive until reload")]
    Deactivated(String),

    #[error("Extension {0} declares no entry point")]
    MissingEntryPoint(String),

    #[error("Entry point '{main}' of extension {id} could not be loaded")]
    EntryPointNotFound { id: String, main: String },

    #[error("Activation failed: {0}")]
    Failed(String),

    #[error("Extension {0} panicked during activation")]
    Panicked(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Code behind an extension's entry point
#[async_trait]
pub trait ExtensionModule: Send + Sync {
    /// Returns the extension's exports, if any
    async fn activate(
        &self,
        context: Arc<ExtensionContext>,
        api: HostApi,
    ) -> Result<Option<Value>, ActivationError>;

    async fn deactivate(&self) -> Result<(), ActivationError> {
        Ok(())
    }
}

#[async_trait]
pub trait EntryPointLoader: Send + Sync {
    async fn load(&self, manifest: &ExtensionManifest) -> Result<Arc<dyn ExtensionModule>, ActivationError>;
}

type ModuleFactory = Arc<dyn Fn() -> Arc<dyn ExtensionModule> + Send + Sync>;

/// In-process modules keyed by the manifest `main` value
#[derive(Default, Clone)]
pub struct StaticEntryPointLoader {
    factories: HashMap<String, ModuleFactory>,
}

impl StaticEntryPointLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module<F>(mut self, main: &str, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn ExtensionModule> + Send + Sync + 'static,
    {
        self.register(main, factory);
        self
    }

    pub fn register<F>(&mut self, main: &str, factory: F)
    where
        F: Fn() -> Arc<dyn ExtensionModule> + Send + Sync + 'static,
    {
        self.factories.insert(normalize_main(main).to_string(), Arc::new(factory));
    }

    pub fn contains(&self, main: &str) -> bool {
        self.factories.contains_key(normalize_main(main))
    }
}

/// `./out/extension.js` and `out/extension.js` name the same entry point
fn normalize_main(main: &str) -> &str {
    main.trim().trim_start_matches("./")
}

#[async_trait]
impl EntryPointLoader for StaticEntryPointLoader {
    async fn load(&self, manifest: &ExtensionManifest) -> Result<Arc<dyn ExtensionModule>, ActivationError> {
        let main = manifest
            .main
            .as_deref()
            .ok_or_else(|| ActivationError::MissingEntryPoint(manifest.id.clone()))?;

        let factory = self
            .factories
            .get(normalize_main(main))
            .ok_or_else(|| ActivationError::EntryPointNotFound {
                id: manifest.id.clone(),
                main: main.to_string(),
            })?;

        Ok(factory())
    }
}
