//! Wire parameters of the host facade methods

use crate::documents::FileRename;
use crate::model::{DocumentUri, Position, Selection};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A capability request: the target document plus kind-specific fields
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentRequest<P> {
    pub uri: DocumentUri,
    #[serde(flatten)]
    pub params: P,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UriParams {
    pub uri: DocumentUri,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidOpenParams {
    pub uri: DocumentUri,
    pub language_id: String,
    #[serde(default)]
    pub version: i32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidChangeParams {
    pub uri: DocumentUri,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_id: Option<String>,
    #[serde(default)]
    pub version: i32,
    /// Full new content
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesParams {
    pub uris: Vec<DocumentUri>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameFilesParams {
    pub files: Vec<FileRename>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WireSelection {
    pub anchor: Position,
    pub active: Position,
}

impl From<WireSelection> for Selection {
    fn from(selection: WireSelection) -> Self {
        Selection::new(selection.anchor, selection.active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionParams {
    pub uri: DocumentUri,
    pub selections: Vec<WireSelection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteCommandParams {
    pub command: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveWebviewParams {
    pub view_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleParams {
    pub handle: String,
}

/// Either field may be absent; `viewId` becoming visible is an activation trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewVisibilityParams {
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub view_id: Option<String>,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebviewMessageParams {
    pub handle: String,
    pub message: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationEventParams {
    pub event: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnablementParams {
    pub id: String,
    pub enabled: bool,
    #[serde(default = "default_trusted")]
    pub trusted: bool,
}

fn default_trusted() -> bool {
    true
}
