//! Durable per-extension key-value stores
//!
//! Every store is a single JSON object on disk, rewritten whole on each
//! update. Secrets get owner-only permissions on Unix; they are not
//! encrypted.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt storage file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot encode value for key '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// First 16 hex characters of the SHA-256 of the workspace root
pub fn workspace_hash(root: &Path) -> String {
    let digest = Sha256::digest(root.to_string_lossy().as_bytes());
    digest.iter().take(8).map(|byte| format!("{byte:02x}")).collect()
}

pub(crate) async fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                path: path.to_path_buf(),
                source,
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StorageError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub(crate) async fn write_json_file<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    private: bool,
) -> Result<(), StorageError> {
    let io_error = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }

    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    tokio::fs::write(path, bytes).await.map_err(io_error)?;

    #[cfg(unix)]
    if private {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(io_error)?;
    }
    #[cfg(not(unix))]
    let _ = private;

    trace!("Wrote {}", path.display());
    Ok(())
}

/// A namespaced, persisted key-value store
pub struct Memento {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl Memento {
    pub async fn open(path: PathBuf) -> Result<Self, StorageError> {
        let values = read_json_file(&path).await?.unwrap_or_default();
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.values.read().await.get(key).cloned()
    }

    /// Typed read; values that do not decode as `T` read as absent
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).await.and_then(|value| serde_json::from_value(value).ok())
    }

    pub async fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).await.unwrap_or(default)
    }

    /// Store a value; `None` or JSON `null` deletes the key.
    ///
    /// Memory only changes once the file has been written.
    pub async fn update(&self, key: &str, value: Option<Value>) -> Result<(), StorageError> {
        let mut values = self.values.write().await;
        let mut staged = values.clone();
        match value {
            Some(Value::Null) | None => {
                staged.remove(key);
            }
            Some(value) => {
                staged.insert(key.to_string(), value);
            }
        }
        write_json_file(&self.path, &staged, false).await?;
        *values = staged;
        Ok(())
    }

    /// Serialize then store
    pub async fn update_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(value).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.update(key, Some(value)).await
    }

    pub async fn keys(&self) -> Vec<String> {
        self.values.read().await.keys().cloned().collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct SecretStorage {
    path: PathBuf,
    secrets: RwLock<Map<String, Value>>,
}

impl SecretStorage {
    pub async fn open(path: PathBuf) -> Result<Self, StorageError> {
        let secrets = read_json_file(&path).await?.unwrap_or_default();
        Ok(Self {
            path,
            secrets: RwLock::new(secrets),
        })
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.secrets
            .read()
            .await
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub async fn store(&self, key: &str, secret: &str) -> Result<(), StorageError> {
        let mut secrets = self.secrets.write().await;
        let mut staged = secrets.clone();
        staged.insert(key.to_string(), Value::String(secret.to_string()));
        write_json_file(&self.path, &staged, true).await?;
        *secrets = staged;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut secrets = self.secrets.write().await;
        if !secrets.contains_key(key) {
            return Ok(false);
        }
        let mut staged = secrets.clone();
        staged.remove(key);
        write_json_file(&self.path, &staged, true).await?;
        *secrets = staged;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_workspace_hash_is_stable_and_short() {
        let a = workspace_hash(Path::new("/home/dev/project"));
        let b = workspace_hash(Path::new("/home/dev/project"));
        let c = workspace_hash(Path::new("/home/dev/other"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    /// Replace the store's directory with a plain file so writes fail
    fn block_directory(dir: &Path) {
        std::fs::remove_dir_all(dir).unwrap();
        std::fs::write(dir, "").unwrap();
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memento_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store");
        let memento = Memento::open(store.join("state.json")).await.unwrap();
        memento.update("kept", Some(json!(1))).await.unwrap();

        block_directory(&store);

        assert!(matches!(
            memento.update("lost", Some(json!(2))).await,
            Err(StorageError::Io { .. })
        ));
        assert!(memento.update("kept", None).await.is_err());
        assert_eq!(memento.get("lost").await, None);
        assert_eq!(memento.get("kept").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_secrets_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("secrets");
        let secrets = SecretStorage::open(store.join("secrets.json")).await.unwrap();
        secrets.store("token", "abc").await.unwrap();

        block_directory(&store);

        assert!(secrets.store("token", "changed").await.is_err());
        assert!(secrets.delete("token").await.is_err());
        assert_eq!(secrets.get("token").await.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_memento_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("global/acme.tool/state.json");

        let memento = Memento::open(path.clone()).await.unwrap();
        memento.update("count", Some(json!(3))).await.unwrap();
        memento.update_as("names", &vec!["a", "b"]).await.unwrap();

        let reopened = Memento::open(path).await.unwrap();
        assert_eq!(reopened.get("count").await, Some(json!(3)));
        assert_eq!(reopened.get_as::<Vec<String>>("names").await, Some(vec!["a".into(), "b".into()]));
        assert_eq!(reopened.get_or("missing", json!(false)).await, json!(false));

        let mut keys = reopened.keys().await;
        keys.sort();
        assert_eq!(keys, vec!["count", "names"]);
    }

    #[tokio::test]
    async fn test_memento_null_deletes() {
        let dir = TempDir::new().unwrap();
        let memento = Memento::open(dir.path().join("m.json")).await.unwrap();
        memento.update("k", Some(json!("v"))).await.unwrap();
        memento.update("k", Some(Value::Null)).await.unwrap();
        assert_eq!(memento.get("k").await, None);

        memento.update("k", Some(json!(1))).await.unwrap();
        memento.update("k", None).await.unwrap();
        assert!(memento.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[not an object").unwrap();
        assert!(matches!(Memento::open(path).await, Err(StorageError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_secret_storage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets/acme.tool.json");

        let secrets = SecretStorage::open(path.clone()).await.unwrap();
        secrets.store("token", "s3cr3t").await.unwrap();
        assert_eq!(secrets.get("token").await.as_deref(), Some("s3cr3t"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        assert!(secrets.delete("token").await.unwrap());
        assert!(!secrets.delete("token").await.unwrap());
        let reopened = SecretStorage::open(path).await.unwrap();
        assert_eq!(reopened.get("token").await, None);
    }
}
