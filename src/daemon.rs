//! Bridge to the external language analysis daemon
//!
//! The daemon speaks LSP-style JSON-RPC over its stdin/stdout. The host only
//! starts it, forwards `workspace/executeCommand` calls and collects the
//! diagnostics it publishes.

use crate::host::HostSink;
use crate::io::{ChildProcessManager, ProcessError, ProcessManager, StopMode, Transport};
use crate::model::{DocumentUri, UriError};
use crate::rpc::{RpcConnection, RpcError, RpcHandler};
use async_trait::async_trait;
use lsp_types::{
    ClientCapabilities, ClientInfo, Diagnostic, ExecuteCommandParams, InitializeParams,
    PublishDiagnosticsClientCapabilities, PublishDiagnosticsParams, TextDocumentClientCapabilities,
    WorkDoneProgressParams, WorkspaceFolder,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("Daemon process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Daemon RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Invalid workspace root: {0}")]
    Uri(#[from] UriError),

    #[error("Daemon is not running")]
    NotRunning,
}

/// Latest diagnostics per document, replaced wholesale on every publish
#[derive(Default)]
pub struct DiagnosticCollection {
    entries: RwLock<HashMap<DocumentUri, Vec<Diagnostic>>>,
}

impl DiagnosticCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty list clears the document
    pub async fn set(&self, uri: DocumentUri, diagnostics: Vec<Diagnostic>) {
        let mut entries = self.entries.write().await;
        if diagnostics.is_empty() {
            entries.remove(&uri);
        } else {
            entries.insert(uri, diagnostics);
        }
    }

    pub async fn get(&self, uri: &DocumentUri) -> Vec<Diagnostic> {
        self.entries.read().await.get(uri).cloned().unwrap_or_default()
    }

    pub async fn clear(&self, uri: &DocumentUri) {
        self.entries.write().await.remove(uri);
    }

    pub async fn clear_all(&self) {
        self.entries.write().await.clear();
    }

    pub async fn entries(&self) -> Vec<(DocumentUri, Vec<Diagnostic>)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(uri, diagnostics)| (uri.clone(), diagnostics.clone()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub command: String,
    pub args: Vec<String>,
    pub workspace_root: PathBuf,
}

/// Inbound traffic from the daemon
struct DaemonHandler {
    diagnostics: Arc<DiagnosticCollection>,
    sink: Arc<dyn HostSink>,
}

impl DaemonHandler {
    async fn publish_diagnostics(&self, params: Option<Value>) {
        let params: PublishDiagnosticsParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                warn!("Malformed publishDiagnostics from daemon: {}", e);
                return;
            }
            None => return,
        };
        let uri = match DocumentUri::parse(params.uri.as_str()) {
            Ok(uri) => uri,
            Err(e) => {
                warn!("Daemon published diagnostics for a bad URI: {}", e);
                return;
            }
        };

        trace!("{} diagnostic(s) for {}", params.diagnostics.len(), uri);
        self.sink.publish_diagnostics(&uri, &params.diagnostics);
        self.diagnostics.set(uri, params.diagnostics).await;
    }
}

#[async_trait]
impl RpcHandler for DaemonHandler {
    async fn handle_request(
        &self,
        method: &str,
        _params: Option<Value>,
        _token: CancellationToken,
    ) -> Result<Value, RpcError> {
        match method {
            "window/workDoneProgress/create" | "client/registerCapability" => Ok(Value::Null),
            "workspace/configuration" => Ok(Value::Array(Vec::new())),
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }

    async fn handle_notification(&self, method: &str, params: Option<Value>) {
        match method {
            "textDocument/publishDiagnostics" => self.publish_diagnostics(params).await,
            "window/logMessage" | "window/showMessage" => {
                debug!("daemon: {}", params.unwrap_or_default());
            }
            other => trace!("Ignoring daemon notification {}", other),
        }
    }
}

pub struct DaemonBridge {
    connection: Arc<RpcConnection>,
    process: Mutex<Option<ChildProcessManager>>,
}

impl DaemonBridge {
    /// Launch the daemon and perform the initialize handshake
    pub async fn start(
        config: DaemonConfig,
        diagnostics: Arc<DiagnosticCollection>,
        sink: Arc<dyn HostSink>,
    ) -> Result<Self, DaemonError> {
        info!("Starting language daemon: {} {:?}", config.command, config.args);
        let mut process = ChildProcessManager::new(
            config.command,
            config.args,
            Some(config.workspace_root.clone()),
        );
        process.start().await?;
        let transport = process.take_transport()?;

        match Self::connect(transport, &config.workspace_root, diagnostics, sink).await {
            Ok(bridge) => {
                *bridge.process.lock().await = Some(process);
                Ok(bridge)
            }
            Err(e) => {
                let _ = process.stop(StopMode::Force).await;
                Err(e)
            }
        }
    }

    /// Handshake over an already connected transport
    pub async fn connect<T>(
        transport: T,
        workspace_root: &Path,
        diagnostics: Arc<DiagnosticCollection>,
        sink: Arc<dyn HostSink>,
    ) -> Result<Self, DaemonError>
    where
        T: Transport + 'static,
    {
        let (connection, incoming) = RpcConnection::new(transport);
        let handler: Arc<dyn RpcHandler> = Arc::new(DaemonHandler { diagnostics, sink });
        {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.serve(incoming, handler).await });
        }

        let root = DocumentUri::from_file_path(workspace_root)?;
        let params = initialize_params(&root, workspace_root)?;
        let params = serde_json::to_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))?;
        connection.request("initialize", Some(params)).await?;
        connection.notify("initialized", Some(serde_json::json!({})))?;
        info!("Language daemon initialized");

        Ok(Self {
            connection,
            process: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        !self.connection.is_closed()
    }

    /// Forward `workspace/executeCommand`
    pub async fn execute_command(&self, command: &str, arguments: Vec<Value>) -> Result<Value, DaemonError> {
        if !self.is_running() {
            return Err(DaemonError::NotRunning);
        }
        let params = ExecuteCommandParams {
            command: command.to_string(),
            arguments,
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let params = serde_json::to_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))?;
        Ok(self
            .connection
            .request("workspace/executeCommand", Some(params))
            .await?)
    }

    /// `shutdown` then `exit`, then stop the process if we own one
    pub async fn stop(&self) -> Result<(), DaemonError> {
        if self.is_running() {
            if let Err(e) = self
                .connection
                .request_with_timeout("shutdown", None, SHUTDOWN_TIMEOUT)
                .await
            {
                warn!("Daemon shutdown request failed: {}", e);
            }
            if let Err(e) = self.connection.notify("exit", None) {
                debug!("Could not send exit to daemon: {}", e);
            }
        }

        if let Some(mut process) = self.process.lock().await.take()
            && process.is_running()
        {
            process.stop(StopMode::Graceful).await?;
        }
        info!("Language daemon stopped");
        Ok(())
    }
}

fn initialize_params(root: &DocumentUri, workspace_root: &Path) -> Result<InitializeParams, DaemonError> {
    let name = workspace_root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workspace".to_string());

    Ok(InitializeParams {
        process_id: Some(std::process::id()),
        workspace_folders: Some(vec![WorkspaceFolder {
            uri: lsp_types::Uri::try_from(root)?,
            name,
        }]),
        capabilities: ClientCapabilities {
            text_document: Some(TextDocumentClientCapabilities {
                publish_diagnostics: Some(PublishDiagnosticsClientCapabilities::default()),
                ..Default::default()
            }),
            ..Default::default()
        },
        client_info: Some(ClientInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::StreamTransport;
    use crate::rpc::IncomingReceiver;
    use crate::test_utils::sink::{RecordingSink, SinkEvent};
    use serde_json::json;

    /// Minimal daemon: answers the handshake, echoes commands
    struct FakeDaemon {
        shutdowns: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl RpcHandler for FakeDaemon {
        async fn handle_request(
            &self,
            method: &str,
            params: Option<Value>,
            _token: CancellationToken,
        ) -> Result<Value, RpcError> {
            match method {
                "initialize" => Ok(json!({"capabilities": {}})),
                "workspace/executeCommand" => {
                    let params = params.unwrap_or_default();
                    Ok(json!({"ran": params["command"], "args": params["arguments"]}))
                }
                "shutdown" => {
                    self.shutdowns.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(Value::Null)
                }
                other => Err(RpcError::MethodNotFound(other.to_string())),
            }
        }

        async fn handle_notification(&self, _method: &str, _params: Option<Value>) {}
    }

    fn daemon_pair() -> (StreamTransport, Arc<RpcConnection>, IncomingReceiver) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (our_read, our_write) = tokio::io::split(ours);
        let (their_read, their_write) = tokio::io::split(theirs);
        let (daemon, incoming) = RpcConnection::new(StreamTransport::new(their_read, their_write));
        (StreamTransport::new(our_read, our_write), daemon, incoming)
    }

    async fn connected() -> (DaemonBridge, Arc<RpcConnection>, Arc<FakeDaemon>, Arc<DiagnosticCollection>, Arc<RecordingSink>) {
        let (transport, daemon, incoming) = daemon_pair();
        let fake = Arc::new(FakeDaemon {
            shutdowns: std::sync::atomic::AtomicUsize::new(0),
        });
        {
            let daemon = Arc::clone(&daemon);
            let handler: Arc<dyn RpcHandler> = fake.clone();
            tokio::spawn(async move { daemon.serve(incoming, handler).await });
        }

        let diagnostics = Arc::new(DiagnosticCollection::new());
        let sink = Arc::new(RecordingSink::new());
        let bridge = DaemonBridge::connect(transport, Path::new("/ws/project"), diagnostics.clone(), sink.clone())
            .await
            .unwrap();
        (bridge, daemon, fake, diagnostics, sink)
    }

    #[tokio::test]
    async fn test_execute_command_round_trip() {
        let (bridge, _daemon, _fake, _diagnostics, _sink) = connected().await;
        let result = bridge
            .execute_command("daemon.reindex", vec![json!("src")])
            .await
            .unwrap();
        assert_eq!(result, json!({"ran": "daemon.reindex", "args": ["src"]}));
    }

    #[tokio::test]
    async fn test_published_diagnostics_are_collected_and_forwarded() {
        let (_bridge, daemon, _fake, diagnostics, sink) = connected().await;
        let uri = DocumentUri::parse("file:///ws/project/main.c").unwrap();

        daemon
            .notify(
                "textDocument/publishDiagnostics",
                Some(json!({
                    "uri": "file:///ws/project/main.c",
                    "diagnostics": [{
                        "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 3}},
                        "message": "unused"
                    }]
                })),
            )
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while diagnostics.get(&uri).await.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(diagnostics.get(&uri).await[0].message, "unused");
        assert!(sink.events().contains(&SinkEvent::Diagnostics { uri: uri.clone(), count: 1 }));
    }

    #[tokio::test]
    async fn test_stop_sends_shutdown() {
        let (bridge, _daemon, fake, _diagnostics, _sink) = connected().await;
        bridge.stop().await.unwrap();
        assert_eq!(fake.shutdowns.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_publish_clears_document() {
        let collection = DiagnosticCollection::new();
        let uri = DocumentUri::parse("file:///a.c").unwrap();
        collection
            .set(
                uri.clone(),
                vec![Diagnostic {
                    message: "x".into(),
                    ..Default::default()
                }],
            )
            .await;
        assert_eq!(collection.entries().await.len(), 1);

        collection.set(uri.clone(), Vec::new()).await;
        assert!(collection.get(&uri).await.is_empty());
        assert!(collection.entries().await.is_empty());
    }
}
