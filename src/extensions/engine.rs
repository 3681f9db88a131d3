//! Per-extension lifecycle
//!
//! ```text
//! Discovered --(enabled && trusted)--> Inactive --(event)--> Activating --> Active
//!                                          ^                     |
//!                                          +------(failure)------+
//! Active --(shutdown / reload)--> Deactivated
//! ```
//!
//! Activation of one extension never affects its siblings: failures and
//! panics are logged, the extension drops back to `Inactive` and anything it
//! registered before failing is disposed.

use super::api::HostApi;
use super::context::{ExtensionContext, StorageLayout};
use super::loader::{ActivationError, EntryPointLoader, ExtensionModule};
use super::manifest::{self, ActivationEvent, ExtensionManifest};
use super::state::{Enablement, EnablementStore, ExtensionState, ExtensionStateChange};
use super::storage::StorageError;
use super::workspace_scan::workspace_contains_async;
use crate::log_timing;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{Level, debug, error, info, warn};

const EVENT_CAPACITY: usize = 128;

/// Snapshot of one extension for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub state: ExtensionState,
    pub enabled: bool,
    pub trusted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Runtime {
    state: ExtensionState,
    enablement: Enablement,
    exports: Option<Value>,
    module: Option<Arc<dyn ExtensionModule>>,
    context: Option<Arc<ExtensionContext>>,
    last_error: Option<String>,
}

struct ExtensionEntry {
    manifest: ExtensionManifest,
    /// Serializes activate/deactivate for this extension
    gate: Mutex<()>,
    runtime: RwLock<Runtime>,
}

pub struct ActivationEngine {
    extension_roots: Vec<PathBuf>,
    layout: StorageLayout,
    loader: Arc<dyn EntryPointLoader>,
    api: HostApi,
    enablement: EnablementStore,
    /// Discovery order
    extensions: RwLock<Vec<Arc<ExtensionEntry>>>,
    activation_order: Mutex<Vec<String>>,
    changes: broadcast::Sender<ExtensionStateChange>,
}

impl ActivationEngine {
    pub async fn new(
        extension_roots: Vec<PathBuf>,
        storage_root: PathBuf,
        loader: Arc<dyn EntryPointLoader>,
        api: HostApi,
    ) -> Result<Arc<Self>, StorageError> {
        let enablement = EnablementStore::load(&storage_root).await?;
        let layout = StorageLayout::new(storage_root, &api.workspace_root);
        let (changes, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Arc::new(Self {
            extension_roots,
            layout,
            loader,
            api,
            enablement,
            extensions: RwLock::new(Vec::new()),
            activation_order: Mutex::new(Vec::new()),
            changes,
        }))
    }

    pub fn api(&self) -> &HostApi {
        &self.api
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExtensionStateChange> {
        self.changes.subscribe()
    }

    fn report(&self, id: &str, state: ExtensionState, error: Option<String>) {
        let change = ExtensionStateChange {
            id: id.to_string(),
            state,
            error,
        };
        self.api.window.extension_state_changed(&change);
        let _ = self.changes.send(change);
    }

    async fn entry(&self, id: &str) -> Option<Arc<ExtensionEntry>> {
        self.extensions
            .read()
            .await
            .iter()
            .find(|entry| entry.manifest.id == id)
            .cloned()
    }

    async fn entries(&self) -> Vec<Arc<ExtensionEntry>> {
        self.extensions.read().await.clone()
    }

    /// Rescan the extension roots, replacing the known set
    pub async fn discover(&self) -> usize {
        let roots = self.extension_roots.clone();
        let manifests = match tokio::task::spawn_blocking(move || manifest::discover(&roots)).await {
            Ok(manifests) => manifests,
            Err(e) => {
                error!("Extension discovery failed: {}", e);
                Vec::new()
            }
        };

        let mut entries = Vec::with_capacity(manifests.len());
        for manifest in manifests {
            let enablement = self.enablement.get(&manifest.id).await;
            let state = if enablement.allows_activation() {
                ExtensionState::Inactive
            } else {
                debug!("Extension {} is disabled or untrusted", manifest.id);
                ExtensionState::Discovered
            };
            entries.push(Arc::new(ExtensionEntry {
                manifest,
                gate: Mutex::new(()),
                runtime: RwLock::new(Runtime {
                    state,
                    enablement,
                    exports: None,
                    module: None,
                    context: None,
                    last_error: None,
                }),
            }));
        }

        let count = entries.len();
        *self.extensions.write().await = entries;
        info!("Discovered {} extension(s)", count);
        count
    }

    /// Discover, then run startup and `workspaceContains` activation.
    ///
    /// Returns the ids that are active afterwards.
    pub async fn start(&self) -> Vec<String> {
        let started = Instant::now();
        self.discover().await;
        let entries = self.entries().await;

        for entry in entries.iter().filter(|entry| entry.manifest.activates_on_startup()) {
            let _ = self.activate(&entry.manifest.id).await;
        }

        for entry in &entries {
            let patterns: Vec<String> = entry
                .manifest
                .workspace_contains_patterns()
                .into_iter()
                .map(str::to_string)
                .collect();
            if patterns.is_empty() || entry.runtime.read().await.state != ExtensionState::Inactive {
                continue;
            }
            if workspace_contains_async(&self.api.workspace_root, patterns).await {
                debug!("Workspace content matches {}", entry.manifest.id);
                let _ = self.activate(&entry.manifest.id).await;
            }
        }

        log_timing!(Level::INFO, "extension startup", started.elapsed());
        self.active_ids().await
    }

    async fn active_ids(&self) -> Vec<String> {
        let mut active = Vec::new();
        for entry in self.entries().await {
            if entry.runtime.read().await.state == ExtensionState::Active {
                active.push(entry.manifest.id.clone());
            }
        }
        active
    }

    /// Activate `id`; a no-op returning the exports when already active
    pub async fn activate(&self, id: &str) -> Result<Option<Value>, ActivationError> {
        let entry = self
            .entry(id)
            .await
            .ok_or_else(|| ActivationError::UnknownExtension(id.to_string()))?;
        let _gate = entry.gate.lock().await;

        {
            let runtime = entry.runtime.read().await;
            match runtime.state {
                ExtensionState::Active => return Ok(runtime.exports.clone()),
                ExtensionState::Deactivated => return Err(ActivationError::Deactivated(id.to_string())),
                _ => {}
            }
            if !runtime.enablement.enabled {
                return Err(ActivationError::Disabled(id.to_string()));
            }
            if !runtime.enablement.trusted {
                return Err(ActivationError::Untrusted(id.to_string()));
            }
        }

        entry.runtime.write().await.state = ExtensionState::Activating;
        self.report(id, ExtensionState::Activating, None);
        info!("Activating extension {}", id);

        let started = Instant::now();
        match self.run_activation(&entry).await {
            Ok((module, context, exports)) => {
                {
                    let mut runtime = entry.runtime.write().await;
                    runtime.state = ExtensionState::Active;
                    runtime.exports = exports.clone();
                    runtime.module = Some(module);
                    runtime.context = Some(context);
                    runtime.last_error = None;
                }
                self.activation_order.lock().await.push(id.to_string());
                log_timing!(Level::DEBUG, "activate", started.elapsed());
                info!("Extension {} is active", id);
                self.report(id, ExtensionState::Active, None);
                Ok(exports)
            }
            Err(e) => {
                error!("Activation of extension {} failed: {}", id, e);
                {
                    let mut runtime = entry.runtime.write().await;
                    runtime.state = ExtensionState::Inactive;
                    runtime.last_error = Some(e.to_string());
                }
                self.report(id, ExtensionState::Inactive, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run_activation(
        &self,
        entry: &ExtensionEntry,
    ) -> Result<(Arc<dyn ExtensionModule>, Arc<ExtensionContext>, Option<Value>), ActivationError> {
        let manifest = &entry.manifest;
        let module = self.loader.load(manifest).await?;
        let context = Arc::new(
            ExtensionContext::create(&self.layout, &manifest.id, &manifest.install_path).await?,
        );

        let task = {
            let module = Arc::clone(&module);
            let context = Arc::clone(&context);
            let api = self.api.clone();
            tokio::spawn(async move { module.activate(context, api).await })
        };

        let failure = match task.await {
            Ok(Ok(exports)) => return Ok((module, context, exports)),
            Ok(Err(e)) => e,
            Err(join_error) => {
                error!("Extension {} panicked: {}", manifest.id, join_error);
                ActivationError::Panicked(manifest.id.clone())
            }
        };

        let failed = context.dispose_subscriptions().await;
        if failed > 0 {
            warn!("{} subscription(s) of {} failed to dispose", failed, manifest.id);
        }
        Err(failure)
    }

    /// Activate every extension listening for `event`.
    ///
    /// Returns the ids active afterwards among those listeners. Failures are
    /// logged and do not stop the remaining listeners.
    pub async fn activate_by_event(&self, event: &ActivationEvent) -> Vec<String> {
        let mut activated = Vec::new();
        for entry in self.entries().await {
            if !entry.manifest.listens_for(event) {
                continue;
            }
            let state = entry.runtime.read().await.state;
            if matches!(state, ExtensionState::Discovered | ExtensionState::Deactivated) {
                continue;
            }
            debug!("{} triggers {}", event, entry.manifest.id);
            if self.activate(&entry.manifest.id).await.is_ok() {
                activated.push(entry.manifest.id.clone());
            }
        }
        activated
    }

    pub async fn on_language(&self, language_id: &str) -> Vec<String> {
        self.activate_by_event(&ActivationEvent::OnLanguage(language_id.to_string()))
            .await
    }

    pub async fn on_command(&self, command: &str) -> Vec<String> {
        self.activate_by_event(&ActivationEvent::OnCommand(command.to_string()))
            .await
    }

    pub async fn on_view(&self, view_id: &str) -> Vec<String> {
        self.activate_by_event(&ActivationEvent::OnView(view_id.to_string()))
            .await
    }

    pub async fn on_webview_panel(&self, view_type: &str) -> Vec<String> {
        self.activate_by_event(&ActivationEvent::OnWebviewPanel(view_type.to_string()))
            .await
    }

    pub async fn on_file_system(&self, scheme: &str) -> Vec<String> {
        self.activate_by_event(&ActivationEvent::OnFileSystem(scheme.to_string()))
            .await
    }

    pub async fn on_uri(&self) -> Vec<String> {
        self.activate_by_event(&ActivationEvent::OnUri).await
    }

    /// Run the deactivate hook, then dispose the extension's subscriptions in
    /// registration order. Returns false if the extension was not active.
    pub async fn deactivate(&self, id: &str) -> Result<bool, ActivationError> {
        let entry = self
            .entry(id)
            .await
            .ok_or_else(|| ActivationError::UnknownExtension(id.to_string()))?;
        let _gate = entry.gate.lock().await;

        let (module, context) = {
            let mut runtime = entry.runtime.write().await;
            if runtime.state != ExtensionState::Active {
                return Ok(false);
            }
            runtime.exports = None;
            (runtime.module.take(), runtime.context.take())
        };

        info!("Deactivating extension {}", id);
        if let Some(module) = module {
            match tokio::spawn(async move { module.deactivate().await }).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Deactivate hook of {} failed: {}", id, e),
                Err(join_error) => error!("Deactivate hook of {} panicked: {}", id, join_error),
            }
        }
        if let Some(context) = context {
            let failed = context.dispose_subscriptions().await;
            if failed > 0 {
                warn!("{} subscription(s) of {} failed to dispose", failed, id);
            }
        }

        entry.runtime.write().await.state = ExtensionState::Deactivated;
        self.activation_order.lock().await.retain(|active| active != id);
        self.report(id, ExtensionState::Deactivated, None);
        Ok(true)
    }

    /// Deactivate every active extension in reverse activation order
    pub async fn shutdown(&self) -> usize {
        let order: Vec<String> = self.activation_order.lock().await.clone();
        let mut deactivated = 0;
        for id in order.iter().rev() {
            match self.deactivate(id).await {
                Ok(true) => deactivated += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to deactivate {}: {}", id, e),
            }
        }
        info!("Deactivated {} extension(s)", deactivated);
        deactivated
    }

    /// Shut down, rediscover and rerun startup activation
    pub async fn reload(&self) -> Vec<String> {
        info!("Reloading extensions");
        self.shutdown().await;
        self.activation_order.lock().await.clear();
        self.start().await
    }

    /// Persist new flags. A running extension keeps running until reload.
    pub async fn set_enablement(&self, id: &str, enabled: bool, trusted: bool) -> Result<(), ActivationError> {
        let entry = self
            .entry(id)
            .await
            .ok_or_else(|| ActivationError::UnknownExtension(id.to_string()))?;
        let enablement = Enablement { enabled, trusted };
        self.enablement.set(id, enablement).await?;

        let new_state = {
            let mut runtime = entry.runtime.write().await;
            runtime.enablement = enablement;
            let next = match runtime.state {
                ExtensionState::Discovered if enablement.allows_activation() => ExtensionState::Inactive,
                ExtensionState::Inactive if !enablement.allows_activation() => ExtensionState::Discovered,
                current => current,
            };
            let changed = next != runtime.state;
            runtime.state = next;
            changed.then_some(next)
        };

        if let Some(state) = new_state {
            self.report(id, state, None);
        }
        Ok(())
    }

    pub async fn state(&self, id: &str) -> Option<ExtensionState> {
        Some(self.entry(id).await?.runtime.read().await.state)
    }

    pub async fn exports(&self, id: &str) -> Option<Value> {
        self.entry(id).await?.runtime.read().await.exports.clone()
    }

    pub async fn manifest(&self, id: &str) -> Option<ExtensionManifest> {
        Some(self.entry(id).await?.manifest.clone())
    }

    pub async fn statuses(&self) -> Vec<ExtensionStatus> {
        let mut statuses = Vec::new();
        for entry in self.entries().await {
            let runtime = entry.runtime.read().await;
            statuses.push(ExtensionStatus {
                id: entry.manifest.id.clone(),
                name: entry.manifest.name.clone(),
                version: entry.manifest.version.clone(),
                state: runtime.state,
                enabled: runtime.enablement.enabled,
                trusted: runtime.enablement.trusted,
                error: runtime.last_error.clone(),
            });
        }
        statuses
    }
}
