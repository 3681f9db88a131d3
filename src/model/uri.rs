//! Document identity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum UriError {
    #[error("Invalid URI '{uri}': {reason}")]
    Invalid { uri: String, reason: String },

    #[error("Path is not absolute: {0}")]
    NotAbsolute(PathBuf),
}

/// A document URI.
///
/// Identity is the exact string (case-sensitive); scheme and path are parsed
/// once for selector matching.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentUri {
    raw: String,
    scheme: String,
    path: String,
}

impl DocumentUri {
    pub fn parse(raw: &str) -> Result<Self, UriError> {
        let url = Url::parse(raw).map_err(|e| UriError::Invalid {
            uri: raw.to_string(),
            reason: e.to_string(),
        })?;

        let path = if url.scheme() == "file" {
            url.to_file_path()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_else(|_| url.path().to_string())
        } else {
            url.path().to_string()
        };

        Ok(Self {
            raw: raw.to_string(),
            scheme: url.scheme().to_string(),
            path,
        })
    }

    pub fn from_file_path(path: &Path) -> Result<Self, UriError> {
        let url = Url::from_file_path(path).map_err(|_| UriError::NotAbsolute(path.to_path_buf()))?;
        Self::parse(url.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Decoded path component, always with `/` separators
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_file(&self) -> bool {
        self.scheme == "file"
    }

    pub fn to_file_path(&self) -> Option<PathBuf> {
        if !self.is_file() {
            return None;
        }
        Url::parse(&self.raw).ok()?.to_file_path().ok()
    }

    /// Lower-cased extension of the last path segment
    pub fn extension(&self) -> Option<String> {
        let file_name = self.path.rsplit('/').next()?;
        let (stem, extension) = file_name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Some(extension.to_ascii_lowercase())
    }
}

impl PartialEq for DocumentUri {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for DocumentUri {}

impl std::hash::Hash for DocumentUri {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Debug for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentUri({})", self.raw)
    }
}

impl fmt::Display for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for DocumentUri {
    type Error = UriError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocumentUri> for String {
    fn from(uri: DocumentUri) -> Self {
        uri.raw
    }
}

impl std::str::FromStr for DocumentUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&DocumentUri> for lsp_types::Uri {
    type Error = UriError;

    fn try_from(uri: &DocumentUri) -> Result<Self, Self::Error> {
        uri.raw.parse().map_err(|_| UriError::Invalid {
            uri: uri.raw.clone(),
            reason: "not accepted by lsp-types".to_string(),
        })
    }
}
