//! Extension manifests (`package.json`) and activation events

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MANIFEST_FILE: &str = "package.json";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Manifest {path} is missing required field '{field}'")]
    MissingField { path: PathBuf, field: &'static str },
}

/// A declared trigger for loading an extension
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActivationEvent {
    /// `*`
    Star,
    OnStartupFinished,
    OnCommand(String),
    OnLanguage(String),
    WorkspaceContains(String),
    OnView(String),
    OnWebviewPanel(String),
    OnUri,
    OnFileSystem(String),
    /// Kept verbatim, never fires
    Unknown(String),
}

impl ActivationEvent {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "*" => return ActivationEvent::Star,
            "onStartupFinished" => return ActivationEvent::OnStartupFinished,
            "onUri" => return ActivationEvent::OnUri,
            _ => {}
        }

        let Some((kind, argument)) = raw.split_once(':') else {
            return ActivationEvent::Unknown(raw.to_string());
        };
        if argument.is_empty() {
            return ActivationEvent::Unknown(raw.to_string());
        }
        let argument = argument.to_string();

        match kind {
            "onCommand" => ActivationEvent::OnCommand(argument),
            "onLanguage" => ActivationEvent::OnLanguage(argument),
            "workspaceContains" => ActivationEvent::WorkspaceContains(argument),
            "onView" => ActivationEvent::OnView(argument),
            "onWebviewPanel" => ActivationEvent::OnWebviewPanel(argument),
            "onFileSystem" => ActivationEvent::OnFileSystem(argument),
            _ => ActivationEvent::Unknown(raw.to_string()),
        }
    }

    /// Activates at engine start
    pub fn is_startup(&self) -> bool {
        matches!(self, ActivationEvent::Star | ActivationEvent::OnStartupFinished)
    }
}

impl fmt::Display for ActivationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationEvent::Star => f.write_str("*"),
            ActivationEvent::OnStartupFinished => f.write_str("onStartupFinished"),
            ActivationEvent::OnCommand(id) => write!(f, "onCommand:{id}"),
            ActivationEvent::OnLanguage(id) => write!(f, "onLanguage:{id}"),
            ActivationEvent::WorkspaceContains(glob) => write!(f, "workspaceContains:{glob}"),
            ActivationEvent::OnView(id) => write!(f, "onView:{id}"),
            ActivationEvent::OnWebviewPanel(id) => write!(f, "onWebviewPanel:{id}"),
            ActivationEvent::OnUri => f.write_str("onUri"),
            ActivationEvent::OnFileSystem(scheme) => write!(f, "onFileSystem:{scheme}"),
            ActivationEvent::Unknown(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandContribution {
    pub command: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewContribution {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub view_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageContribution {
    pub id: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributes {
    #[serde(default)]
    pub commands: Vec<CommandContribution>,
    /// View containers to their views
    #[serde(default)]
    pub views: BTreeMap<String, Vec<ViewContribution>>,
    #[serde(default)]
    pub languages: Vec<LanguageContribution>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    name: Option<String>,
    publisher: Option<String>,
    version: Option<String>,
    display_name: Option<String>,
    main: Option<String>,
    #[serde(default)]
    activation_events: Vec<String>,
    #[serde(default)]
    contributes: Contributes,
}

#[derive(Debug, Clone)]
pub struct ExtensionManifest {
    pub id: String,
    pub name: String,
    pub publisher: Option<String>,
    pub version: Option<String>,
    pub display_name: Option<String>,
    pub install_path: PathBuf,
    /// Entry point reference handed to the loader
    pub main: Option<String>,
    /// Events exactly as declared
    pub activation_events: Vec<ActivationEvent>,
    /// Events implied by contributed commands and views
    pub implicit_events: Vec<ActivationEvent>,
    pub contributes: Contributes,
}

impl ExtensionManifest {
    /// Load `<dir>/package.json`
    pub fn load(dir: &Path) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = std::fs::read(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_slice(&bytes, dir).map_err(|e| match e {
            ManifestError::Parse { source, .. } => ManifestError::Parse { path, source },
            ManifestError::MissingField { field, .. } => ManifestError::MissingField { path, field },
            other => other,
        })
    }

    pub fn from_slice(bytes: &[u8], install_path: &Path) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_slice(bytes).map_err(|source| ManifestError::Parse {
            path: install_path.to_path_buf(),
            source,
        })?;

        let name = raw
            .name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ManifestError::MissingField {
                path: install_path.to_path_buf(),
                field: "name",
            })?;

        let publisher = raw.publisher.filter(|p| !p.trim().is_empty());
        let id = extension_id(publisher.as_deref(), &name);

        let activation_events = raw
            .activation_events
            .iter()
            .map(|event| ActivationEvent::parse(event))
            .collect();

        let mut implicit_events: Vec<ActivationEvent> = raw
            .contributes
            .commands
            .iter()
            .map(|command| ActivationEvent::OnCommand(command.command.clone()))
            .chain(
                raw.contributes
                    .views
                    .values()
                    .flatten()
                    .map(|view| ActivationEvent::OnView(view.id.clone())),
            )
            .collect();
        let mut seen = HashSet::new();
        implicit_events.retain(|event| seen.insert(event.clone()));

        Ok(Self {
            id,
            name,
            publisher,
            version: raw.version,
            display_name: raw.display_name,
            install_path: install_path.to_path_buf(),
            main: raw.main.filter(|main| !main.trim().is_empty()),
            activation_events,
            implicit_events,
            contributes: raw.contributes,
        })
    }

    /// Declared events followed by implicit ones
    pub fn all_events(&self) -> impl Iterator<Item = &ActivationEvent> {
        self.activation_events.iter().chain(self.implicit_events.iter())
    }

    /// No declared events, `*`, or `onStartupFinished`
    pub fn activates_on_startup(&self) -> bool {
        self.activation_events.is_empty() || self.activation_events.iter().any(ActivationEvent::is_startup)
    }

    pub fn workspace_contains_patterns(&self) -> Vec<&str> {
        self.activation_events
            .iter()
            .filter_map(|event| match event {
                ActivationEvent::WorkspaceContains(glob) => Some(glob.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn listens_for(&self, event: &ActivationEvent) -> bool {
        self.all_events().any(|declared| declared == event)
    }
}

/// `publisher.name`, lower-cased, with anything outside `[a-z0-9._-]`
/// replaced by `-`
pub fn extension_id(publisher: Option<&str>, name: &str) -> String {
    let raw = match publisher {
        Some(publisher) => format!("{}.{}", publisher.trim(), name.trim()),
        None => name.trim().to_string(),
    };
    raw.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Scan each root for `<root>/<extension>/package.json`.
///
/// Directories are visited in name order; on duplicate ids the first wins.
/// Unreadable manifests are logged and skipped.
pub fn discover(roots: &[PathBuf]) -> Vec<ExtensionManifest> {
    let mut manifests: Vec<ExtensionManifest> = Vec::new();
    let mut seen = HashSet::new();

    for root in roots {
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read extensions directory {}: {}", root.display(), e);
                continue;
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir() && path.join(MANIFEST_FILE).is_file())
            .collect();
        dirs.sort();

        for dir in dirs {
            match ExtensionManifest::load(&dir) {
                Ok(manifest) => {
                    if !seen.insert(manifest.id.clone()) {
                        warn!(
                            "Duplicate extension id {} at {}, keeping the first one",
                            manifest.id,
                            dir.display()
                        );
                        continue;
                    }
                    debug!("Discovered extension {} at {}", manifest.id, dir.display());
                    manifests.push(manifest);
                }
                Err(e) => warn!("Skipping extension at {}: {}", dir.display(), e),
            }
        }
    }

    manifests
}
