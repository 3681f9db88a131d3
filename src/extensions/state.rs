//! Extension lifecycle states and persisted enablement flags

use super::storage::{StorageError, read_json_file, write_json_file};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

pub const ENABLEMENT_FILE: &str = "state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtensionState {
    Discovered,
    Inactive,
    Activating,
    Active,
    Deactivated,
}

impl ExtensionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionState::Discovered => "discovered",
            ExtensionState::Inactive => "inactive",
            ExtensionState::Activating => "activating",
            ExtensionState::Active => "active",
            ExtensionState::Deactivated => "deactivated",
        }
    }
}

impl fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reported to the host after every lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStateChange {
    pub id: String,
    pub state: ExtensionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Both flags must hold for an extension to ever activate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enablement {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub trusted: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Enablement {
    fn default() -> Self {
        Self {
            enabled: true,
            trusted: true,
        }
    }
}

impl Enablement {
    pub fn allows_activation(&self) -> bool {
        self.enabled && self.trusted
    }
}

/// `state.json`: extension id to enablement, missing ids default to enabled
/// and trusted
pub struct EnablementStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Enablement>>,
}

impl EnablementStore {
    pub async fn load(storage_dir: &Path) -> Result<Self, StorageError> {
        let path = storage_dir.join(ENABLEMENT_FILE);
        let entries: BTreeMap<String, Enablement> = read_json_file(&path).await?.unwrap_or_default();
        debug!("Loaded enablement for {} extension(s) from {}", entries.len(), path.display());
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub async fn get(&self, id: &str) -> Enablement {
        self.entries.read().await.get(id).copied().unwrap_or_default()
    }

    pub async fn set(&self, id: &str, enablement: Enablement) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        entries.insert(id.to_string(), enablement);
        write_json_file(&self.path, &*entries, false).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
