//! Outbound calls from the extension process to the editor shell

use super::methods;
use crate::extensions::ExtensionStateChange;
use crate::model::DocumentUri;
use crate::rpc::{RpcConnection, RpcError};
use async_trait::async_trait;
use lsp_types::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputBoxOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub password: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickPickItem {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl QuickPickItem {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: None,
            detail: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickPickOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub can_pick_many: bool,
}

/// Everything the extension process asks of the shell.
///
/// UI requests resolve to `None` when the user cancels.
#[async_trait]
pub trait HostSink: Send + Sync {
    fn show_message(&self, severity: MessageSeverity, message: &str);

    async fn show_input_box(&self, options: InputBoxOptions) -> Result<Option<String>, RpcError>;

    async fn show_quick_pick(
        &self,
        items: Vec<QuickPickItem>,
        options: QuickPickOptions,
    ) -> Result<Option<Vec<QuickPickItem>>, RpcError>;

    /// Returns whether the shell opened the link
    async fn open_external(&self, uri: &str) -> Result<bool, RpcError>;

    fn post_webview_message(&self, handle: &str, message: Value);

    fn publish_diagnostics(&self, uri: &DocumentUri, diagnostics: &[Diagnostic]);

    fn extension_state_changed(&self, change: &ExtensionStateChange);
}

/// [`HostSink`] over the connection back to the shell
pub struct RpcHostSink {
    connection: Arc<RpcConnection>,
}

impl RpcHostSink {
    pub fn new(connection: Arc<RpcConnection>) -> Self {
        Self { connection }
    }

    fn notify(&self, method: &str, params: Value) {
        if let Err(e) = self.connection.notify(method, Some(params)) {
            warn!("Failed to send {}: {}", method, e);
        }
    }
}

/// `null` means cancelled
fn decode_optional<T: serde::de::DeserializeOwned>(value: Value) -> Result<Option<T>, RpcError> {
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| RpcError::InvalidParams(e.to_string()))
}

#[async_trait]
impl HostSink for RpcHostSink {
    fn show_message(&self, severity: MessageSeverity, message: &str) {
        self.notify(
            methods::HOST_SHOW_MESSAGE,
            json!({ "severity": severity, "message": message }),
        );
    }

    async fn show_input_box(&self, options: InputBoxOptions) -> Result<Option<String>, RpcError> {
        let params = serde_json::to_value(&options).map_err(|e| RpcError::InvalidParams(e.to_string()))?;
        let value = self
            .connection
            .request(methods::HOST_SHOW_INPUT_BOX, Some(params))
            .await?;
        decode_optional(value)
    }

    async fn show_quick_pick(
        &self,
        items: Vec<QuickPickItem>,
        options: QuickPickOptions,
    ) -> Result<Option<Vec<QuickPickItem>>, RpcError> {
        let value = self
            .connection
            .request(
                methods::HOST_SHOW_QUICK_PICK,
                Some(json!({ "items": items, "options": options })),
            )
            .await?;
        decode_optional(value)
    }

    async fn open_external(&self, uri: &str) -> Result<bool, RpcError> {
        let value = self
            .connection
            .request(methods::HOST_OPEN_EXTERNAL, Some(json!({ "uri": uri })))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    fn post_webview_message(&self, handle: &str, message: Value) {
        self.notify(
            methods::HOST_POST_WEBVIEW_MESSAGE,
            json!({ "handle": handle, "message": message }),
        );
    }

    fn publish_diagnostics(&self, uri: &DocumentUri, diagnostics: &[Diagnostic]) {
        self.notify(
            methods::HOST_DIAGNOSTICS,
            json!({ "uri": uri, "diagnostics": diagnostics }),
        );
    }

    fn extension_state_changed(&self, change: &ExtensionStateChange) {
        match serde_json::to_value(change) {
            Ok(params) => self.notify(methods::HOST_EXTENSION_STATE_CHANGED, params),
            Err(e) => warn!("Cannot encode state change for {}: {}", change.id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::StreamTransport;
    use crate::rpc::{Incoming, IncomingReceiver, RpcHandler};
    use tokio_util::sync::CancellationToken;

    /// Shell side answering every request with a fixed value
    struct FixedReply(Value);

    #[async_trait]
    impl RpcHandler for FixedReply {
        async fn handle_request(
            &self,
            _method: &str,
            _params: Option<Value>,
            _token: CancellationToken,
        ) -> Result<Value, RpcError> {
            Ok(self.0.clone())
        }

        async fn handle_notification(&self, _method: &str, _params: Option<Value>) {}
    }

    fn connected_sink() -> (RpcHostSink, Arc<RpcConnection>, IncomingReceiver) {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        let (ours, _our_incoming) = RpcConnection::new(StreamTransport::new(left_read, left_write));
        let (shell, shell_incoming) = RpcConnection::new(StreamTransport::new(right_read, right_write));
        (RpcHostSink::new(ours), shell, shell_incoming)
    }

    fn serve_shell(shell: Arc<RpcConnection>, incoming: IncomingReceiver, reply: Value) {
        tokio::spawn(async move {
            shell.serve(incoming, Arc::new(FixedReply(reply))).await;
        });
    }

    #[tokio::test]
    async fn test_show_message_is_notification() {
        let (sink, _shell, mut incoming) = connected_sink();
        sink.show_message(MessageSeverity::Warning, "careful");

        match incoming.recv().await.unwrap() {
            Incoming::Notification { method, params } => {
                assert_eq!(method, methods::HOST_SHOW_MESSAGE);
                assert_eq!(params.unwrap(), json!({"severity": "warning", "message": "careful"}));
            }
            other => panic!("Expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_input_box_null_is_cancelled() {
        let (sink, shell, incoming) = connected_sink();
        serve_shell(shell, incoming, Value::Null);

        let result = sink.show_input_box(InputBoxOptions::default()).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_input_box_value() {
        let (sink, shell, incoming) = connected_sink();
        serve_shell(shell, incoming, json!("typed"));

        let result = sink.show_input_box(InputBoxOptions::default()).await.unwrap();
        assert_eq!(result.as_deref(), Some("typed"));
    }

    #[tokio::test]
    async fn test_quick_pick_returns_selection() {
        let (sink, shell, incoming) = connected_sink();
        serve_shell(shell, incoming, json!([{"label": "b"}]));

        let picked = sink
            .show_quick_pick(
                vec![QuickPickItem::new("a"), QuickPickItem::new("b")],
                QuickPickOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(picked, Some(vec![QuickPickItem::new("b")]));
    }

    #[tokio::test]
    async fn test_open_external() {
        let (sink, shell, incoming) = connected_sink();
        serve_shell(shell, incoming, json!(true));
        assert!(sink.open_external("https://example.com").await.unwrap());
    }
}
