//! Per-extension activation context

use super::storage::{Memento, SecretStorage, StorageError, workspace_hash};
use crate::disposable::{Disposable, dispose_all};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Directories under the storage root
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    workspace_hash: String,
}

impl StorageLayout {
    pub fn new(root: PathBuf, workspace_root: &Path) -> Self {
        Self {
            root,
            workspace_hash: workspace_hash(workspace_root),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn global_dir(&self, id: &str) -> PathBuf {
        self.root.join("global").join(id)
    }

    pub fn workspace_dir(&self, id: &str) -> PathBuf {
        self.root.join("workspace").join(&self.workspace_hash).join(id)
    }

    pub fn secrets_file(&self, id: &str) -> PathBuf {
        self.root.join("secrets").join(format!("{id}.json"))
    }
}

pub struct ExtensionContext {
    pub extension_id: String,
    pub extension_path: PathBuf,
    /// Workspace-scoped scratch directory
    pub storage_path: PathBuf,
    pub global_storage_path: PathBuf,
    pub global_state: Memento,
    pub workspace_state: Memento,
    pub secrets: SecretStorage,
    subscriptions: Mutex<Vec<Box<dyn Disposable>>>,
}

impl ExtensionContext {
    pub async fn create(
        layout: &StorageLayout,
        extension_id: &str,
        extension_path: &Path,
    ) -> Result<Self, StorageError> {
        let global_storage_path = layout.global_dir(extension_id);
        let storage_path = layout.workspace_dir(extension_id);

        Ok(Self {
            extension_id: extension_id.to_string(),
            extension_path: extension_path.to_path_buf(),
            global_state: Memento::open(global_storage_path.join("state.json")).await?,
            workspace_state: Memento::open(storage_path.join("state.json")).await?,
            secrets: SecretStorage::open(layout.secrets_file(extension_id)).await?,
            storage_path,
            global_storage_path,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Track a resource for disposal when the extension deactivates
    pub fn subscribe(&self, disposable: Box<dyn Disposable>) {
        match self.subscriptions.lock() {
            Ok(mut subscriptions) => subscriptions.push(disposable),
            Err(poisoned) => poisoned.into_inner().push(disposable),
        }
    }

    pub fn subscription_count(&self) -> usize {
        match self.subscriptions.lock() {
            Ok(subscriptions) => subscriptions.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn take_subscriptions(&self) -> Vec<Box<dyn Disposable>> {
        match self.subscriptions.lock() {
            Ok(mut subscriptions) => std::mem::take(&mut *subscriptions),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Dispose every subscription in registration order; returns the failure count
    pub async fn dispose_subscriptions(&self) -> usize {
        dispose_all(&self.extension_id, self.take_subscriptions()).await
    }
}
