//! Authoritative copy of every open document inside the extension process
//!
//! Documents are shared as `Arc<DocumentModel>` snapshots; a mutation swaps in
//! a new snapshot so providers holding an older one never observe a torn
//! update.

use super::language::language_id_for_extension;
use crate::io::FileSystem;
use crate::model::{DocumentModel, DocumentUri, Selection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, trace};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Document not found: {0}")]
    NotFound(DocumentUri),

    #[error("Cannot load '{0}': only file URIs can be read from disk")]
    UnsupportedScheme(DocumentUri),

    #[error("Failed to read {uri}: {source}")]
    Io {
        uri: DocumentUri,
        #[source]
        source: std::io::Error,
    },

    #[error("Document {0} is not valid UTF-8")]
    InvalidUtf8(DocumentUri),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRename {
    pub old_uri: DocumentUri,
    pub new_uri: DocumentUri,
}

#[derive(Debug, Clone)]
pub enum DocumentEvent {
    Opened(Arc<DocumentModel>),
    Changed(Arc<DocumentModel>),
    Saved(Arc<DocumentModel>),
    /// Last snapshot, flagged closed
    Closed(Arc<DocumentModel>),
    FilesCreated(Vec<DocumentUri>),
    FilesDeleted(Vec<DocumentUri>),
    FilesRenamed(Vec<FileRename>),
    SelectionChanged {
        uri: DocumentUri,
        selections: Vec<Selection>,
    },
}

pub struct DocumentSynchronizer {
    documents: RwLock<HashMap<DocumentUri, Arc<DocumentModel>>>,
    selections: RwLock<HashMap<DocumentUri, Vec<Selection>>>,
    events: broadcast::Sender<DocumentEvent>,
    file_system: Arc<dyn FileSystem>,
}

impl DocumentSynchronizer {
    pub fn new(file_system: Arc<dyn FileSystem>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            documents: RwLock::new(HashMap::new()),
            selections: RwLock::new(HashMap::new()),
            events,
            file_system,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: DocumentEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Open a document, or refresh it if it is already open.
    ///
    /// Fires `Opened` for a new document and `Changed` for an existing one.
    pub async fn open(
        &self,
        uri: DocumentUri,
        language_id: &str,
        content: String,
        version: i32,
    ) -> Arc<DocumentModel> {
        let mut documents = self.documents.write().await;

        if let Some(existing) = documents.get_mut(&uri) {
            let next_version = bump_version(existing.version(), version);
            let model = Arc::make_mut(existing);
            model.set_language_id(language_id);
            model.replace_content(content, next_version);
            let snapshot = Arc::clone(existing);
            drop(documents);

            debug!("Re-opened {} at version {}", uri, next_version);
            self.emit(DocumentEvent::Changed(Arc::clone(&snapshot)));
            return snapshot;
        }

        let snapshot = Arc::new(DocumentModel::new(uri.clone(), language_id, version, content));
        documents.insert(uri.clone(), Arc::clone(&snapshot));
        drop(documents);

        debug!("Opened {} ({}) at version {}", uri, language_id, version);
        self.emit(DocumentEvent::Opened(Arc::clone(&snapshot)));
        snapshot
    }

    /// Replace a document's content wholesale.
    ///
    /// The version always moves forward and the document becomes dirty. A
    /// change for an unknown URI opens it first.
    pub async fn change(
        &self,
        uri: DocumentUri,
        language_id: Option<&str>,
        content: String,
        version: i32,
    ) -> Arc<DocumentModel> {
        let mut documents = self.documents.write().await;

        let snapshot = match documents.get_mut(&uri) {
            Some(existing) => {
                let next_version = bump_version(existing.version(), version);
                let model = Arc::make_mut(existing);
                if let Some(language_id) = language_id {
                    model.set_language_id(language_id);
                }
                model.replace_content(content, next_version);
                model.set_dirty(true);
                Arc::clone(existing)
            }
            None => {
                debug!("Change for unopened document {}, opening it", uri);
                let mut model = DocumentModel::new(
                    uri.clone(),
                    language_id.unwrap_or_else(|| language_id_for_extension(uri.extension().as_deref())),
                    version,
                    content,
                );
                model.set_dirty(true);
                let snapshot = Arc::new(model);
                documents.insert(uri.clone(), Arc::clone(&snapshot));
                snapshot
            }
        };
        drop(documents);

        trace!("Changed {} -> version {}", uri, snapshot.version());
        self.emit(DocumentEvent::Changed(Arc::clone(&snapshot)));
        snapshot
    }

    /// Remove a document from the live set; unknown URIs are ignored
    pub async fn close(&self, uri: &DocumentUri) -> bool {
        let removed = self.documents.write().await.remove(uri);
        self.selections.write().await.remove(uri);

        let Some(mut snapshot) = removed else {
            trace!("Close for unknown document {}", uri);
            return false;
        };

        Arc::make_mut(&mut snapshot).mark_closed();
        debug!("Closed {}", uri);
        self.emit(DocumentEvent::Closed(snapshot));
        true
    }

    /// Mark a document clean after the editor saved it
    pub async fn save(&self, uri: &DocumentUri) -> Option<Arc<DocumentModel>> {
        let mut documents = self.documents.write().await;
        let existing = documents.get_mut(uri)?;
        Arc::make_mut(existing).set_dirty(false);
        let snapshot = Arc::clone(existing);
        drop(documents);

        debug!("Saved {}", uri);
        self.emit(DocumentEvent::Saved(Arc::clone(&snapshot)));
        Some(snapshot)
    }

    pub async fn get(&self, uri: &DocumentUri) -> Option<Arc<DocumentModel>> {
        self.documents.read().await.get(uri).cloned()
    }

    pub async fn is_open(&self, uri: &DocumentUri) -> bool {
        self.documents.read().await.contains_key(uri)
    }

    pub async fn all(&self) -> Vec<Arc<DocumentModel>> {
        self.documents.read().await.values().cloned().collect()
    }

    /// Open document, or a read-through snapshot of a `file:` URI from disk.
    ///
    /// Loaded snapshots are not added to the live set.
    pub async fn get_or_load(&self, uri: &DocumentUri) -> Result<Arc<DocumentModel>, DocumentError> {
        if let Some(document) = self.get(uri).await {
            return Ok(document);
        }

        let path = uri
            .to_file_path()
            .ok_or_else(|| DocumentError::UnsupportedScheme(uri.clone()))?;

        if !self.file_system.exists(&path) {
            return Err(DocumentError::NotFound(uri.clone()));
        }

        let bytes = self.file_system.read(&path).map_err(|source| DocumentError::Io {
            uri: uri.clone(),
            source,
        })?;
        let content = String::from_utf8(bytes).map_err(|_| DocumentError::InvalidUtf8(uri.clone()))?;
        let language_id = language_id_for_extension(uri.extension().as_deref());

        debug!("Loaded {} from disk as {}", uri, language_id);
        Ok(Arc::new(DocumentModel::new(uri.clone(), language_id, 0, content)))
    }

    pub fn files_created(&self, uris: Vec<DocumentUri>) {
        debug!("{} file(s) created", uris.len());
        self.emit(DocumentEvent::FilesCreated(uris));
    }

    pub fn files_deleted(&self, uris: Vec<DocumentUri>) {
        debug!("{} file(s) deleted", uris.len());
        self.emit(DocumentEvent::FilesDeleted(uris));
    }

    /// Re-key open documents under their new URIs, bumping their versions.
    ///
    /// A document already open at a target URI is closed first.
    pub async fn files_renamed(&self, renames: Vec<FileRename>) {
        let mut displaced = Vec::new();
        {
            let mut documents = self.documents.write().await;
            let mut selections = self.selections.write().await;

            for rename in &renames {
                let Some(mut document) = documents.remove(&rename.old_uri) else {
                    continue;
                };
                if let Some(mut replaced) = documents.remove(&rename.new_uri) {
                    Arc::make_mut(&mut replaced).mark_closed();
                    selections.remove(&rename.new_uri);
                    displaced.push(replaced);
                }

                let next_version = bump_version(document.version(), 0);
                let model = Arc::make_mut(&mut document);
                model.set_uri(rename.new_uri.clone());
                let content = model.text().to_string();
                model.replace_content(content, next_version);
                documents.insert(rename.new_uri.clone(), document);
                if let Some(saved) = selections.remove(&rename.old_uri) {
                    selections.insert(rename.new_uri.clone(), saved);
                }
                debug!("Renamed open document {} -> {}", rename.old_uri, rename.new_uri);
            }
        }

        for replaced in displaced {
            debug!("Closed {} (replaced by rename)", replaced.uri());
            self.emit(DocumentEvent::Closed(replaced));
        }
        self.emit(DocumentEvent::FilesRenamed(renames));
    }

    /// Record the editor's selections for an open document
    pub async fn set_selections(&self, uri: DocumentUri, selections: Vec<Selection>) -> bool {
        if !self.is_open(&uri).await {
            trace!("Selection change for unknown document {}", uri);
            return false;
        }

        self.selections
            .write()
            .await
            .insert(uri.clone(), selections.clone());
        self.emit(DocumentEvent::SelectionChanged { uri, selections });
        true
    }

    pub async fn selections(&self, uri: &DocumentUri) -> Vec<Selection> {
        self.selections
            .read()
            .await
            .get(uri)
            .cloned()
            .unwrap_or_default()
    }
}

/// Versions never go backwards, even if the editor resends a stale one
fn bump_version(current: i32, requested: i32) -> i32 {
    requested.max(current.saturating_add(1))
}
