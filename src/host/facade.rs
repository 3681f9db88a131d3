//! Host facade: composition root and RPC router
//!
//! [`ExtensionHost`] owns every collaborator and answers the shell's
//! `extensionHost.*` traffic. Touching a document, command or view for the
//! first time raises the matching activation event before the request is
//! served, so lazily activated extensions see it.

use super::methods;
use super::params::{
    ActivationEventParams, DidChangeParams, DidOpenParams, DocumentRequest, EnablementParams,
    ExecuteCommandParams, FilesParams, HandleParams, RenameFilesParams, ResolveWebviewParams,
    SelectionParams, UriParams, ViewVisibilityParams, WebviewMessageParams,
};
use super::sink::{HostSink, MessageSeverity};
use crate::commands::{CommandError, CommandRegistry, command_fn};
use crate::config::HostConfig;
use crate::daemon::{DaemonBridge, DaemonConfig, DaemonError, DiagnosticCollection};
use crate::documents::{DocumentError, DocumentSynchronizer};
use crate::extensions::{
    ActivationEngine, ActivationError, ActivationEvent, EntryPointLoader, HostApi, StorageError,
};
use crate::io::FileSystem;
use crate::log_timing;
use crate::model::{DocumentModel, DocumentUri};
use crate::registry::{
    CapabilityRegistry, CodeActionParams, CompletionParams, DocumentFormattingParams,
    InlineCompletionParams, OnTypeFormattingParams, PositionParams, RangeFormattingParams,
    ReferenceParams, RenameParams, SignatureHelpParams,
};
use crate::rpc::{RpcError, RpcHandler};
use crate::views::{SessionError, SessionManager};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Activation(#[from] ActivationError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),
}

impl From<HostError> for RpcError {
    fn from(error: HostError) -> Self {
        match error {
            HostError::Document(DocumentError::NotFound(uri) | DocumentError::UnsupportedScheme(uri)) => {
                RpcError::InvalidParams(format!("Unknown document: {uri}"))
            }
            HostError::Session(SessionError::Cancelled(_)) => RpcError::Cancelled,
            HostError::Session(e @ (SessionError::NoProvider(_) | SessionError::UnknownHandle(_))) => {
                RpcError::InvalidParams(e.to_string())
            }
            HostError::Activation(e @ ActivationError::UnknownExtension(_)) => {
                RpcError::InvalidParams(e.to_string())
            }
            other => RpcError::Internal(other.to_string()),
        }
    }
}

fn decode<P: DeserializeOwned>(params: Option<Value>) -> Result<P, RpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

fn to_json<R: Serialize>(result: R) -> Result<Value, RpcError> {
    serde_json::to_value(result).map_err(|e| RpcError::Internal(e.to_string()))
}

pub struct ExtensionHost {
    api: HostApi,
    engine: Arc<ActivationEngine>,
    daemon_config: Option<DaemonConfig>,
    daemon: RwLock<Option<Arc<DaemonBridge>>>,
}

impl ExtensionHost {
    /// Wire up every collaborator; nothing is discovered or started yet
    pub async fn new(
        config: &HostConfig,
        loader: Arc<dyn EntryPointLoader>,
        sink: Arc<dyn HostSink>,
        file_system: Arc<dyn FileSystem>,
    ) -> Result<Arc<Self>, HostError> {
        let api = HostApi {
            registry: Arc::new(CapabilityRegistry::new()),
            commands: CommandRegistry::new(),
            documents: Arc::new(DocumentSynchronizer::new(file_system)),
            views: SessionManager::new(Arc::clone(&sink)),
            window: sink,
            diagnostics: Arc::new(DiagnosticCollection::new()),
            workspace_root: config.workspace_root.clone(),
        };
        let engine = ActivationEngine::new(
            config.extension_dirs.clone(),
            config.storage_dir.clone(),
            loader,
            api.clone(),
        )
        .await?;

        let host = Arc::new(Self {
            api,
            engine,
            daemon_config: config.daemon.clone(),
            daemon: RwLock::new(None),
        });
        host.register_builtin_commands().await?;
        Ok(host)
    }

    // Built-ins live as long as the host, so their registrations are never disposed
    async fn register_builtin_commands(self: &Arc<Self>) -> Result<(), CommandError> {
        let engine = Arc::downgrade(&self.engine);
        self.api
            .commands
            .register(
                methods::LIST_EXTENSIONS_COMMAND,
                command_fn(move |_| {
                    let engine = engine.clone();
                    async move {
                        let statuses = match engine.upgrade() {
                            Some(engine) => engine.statuses().await,
                            None => Vec::new(),
                        };
                        serde_json::to_value(statuses).map_err(|e| CommandError::Failed {
                            command: methods::LIST_EXTENSIONS_COMMAND.to_string(),
                            message: e.to_string(),
                        })
                    }
                }),
            )
            .await?;

        let host: Weak<Self> = Arc::downgrade(self);
        self.api
            .commands
            .register(
                methods::DAEMON_EXECUTE_COMMAND,
                command_fn(move |mut args| {
                    let host = host.clone();
                    async move {
                        let failed = |message: String| CommandError::Failed {
                            command: methods::DAEMON_EXECUTE_COMMAND.to_string(),
                            message,
                        };
                        let command = match args.first().and_then(Value::as_str) {
                            Some(command) => command.to_string(),
                            None => return Err(failed("expected the daemon command as first argument".into())),
                        };
                        args.remove(0);
                        let Some(host) = host.upgrade() else {
                            return Err(failed(DaemonError::NotRunning.to_string()));
                        };
                        host.daemon_command(&command, args)
                            .await
                            .map_err(|e| failed(e.to_string()))
                    }
                }),
            )
            .await?;
        Ok(())
    }

    pub fn api(&self) -> &HostApi {
        &self.api
    }

    pub fn engine(&self) -> &Arc<ActivationEngine> {
        &self.engine
    }

    /// Start the daemon (if configured), discover extensions and run
    /// startup activation. Returns the ids active afterwards.
    pub async fn start(&self) -> Vec<String> {
        if let Some(config) = self.daemon_config.clone() {
            match DaemonBridge::start(config, Arc::clone(&self.api.diagnostics), Arc::clone(&self.api.window)).await {
                Ok(bridge) => *self.daemon.write().await = Some(Arc::new(bridge)),
                Err(e) => {
                    warn!("Language daemon unavailable: {}", e);
                    self.api
                        .window
                        .show_message(MessageSeverity::Warning, &format!("Language daemon unavailable: {e}"));
                }
            }
        }

        let active = self.engine.start().await;
        info!("Extension host started with {} active extension(s)", active.len());
        active
    }

    /// Deactivate every extension, drop all views and stop the daemon
    pub async fn shutdown(&self) {
        let deactivated = self.engine.shutdown().await;
        self.api.views.dispose_all().await;

        if let Some(daemon) = self.daemon.write().await.take()
            && let Err(e) = daemon.stop().await
        {
            warn!("Failed to stop language daemon: {}", e);
        }
        info!("Extension host shut down ({} extension(s) deactivated)", deactivated);
    }

    pub async fn reload(&self) -> Vec<String> {
        self.api.views.dispose_all().await;
        self.engine.reload().await
    }

    async fn daemon_command(&self, command: &str, arguments: Vec<Value>) -> Result<Value, DaemonError> {
        let daemon = self.daemon.read().await.clone();
        match daemon {
            Some(daemon) => daemon.execute_command(command, arguments).await,
            None => Err(DaemonError::NotRunning),
        }
    }

    /// Run a command, activating its owner first if nobody registered it yet.
    /// A command that stays unknown yields `null`.
    pub async fn execute_command(&self, command: &str, arguments: Vec<Value>) -> Result<Value, HostError> {
        if !self.api.commands.has(command).await {
            let activated = self.engine.on_command(command).await;
            debug!("Command {} activated {:?}", command, activated);
        }

        match self.api.commands.execute(command, arguments).await {
            Err(CommandError::NotFound(_)) => {
                warn!("Command not found after activation: {}", command);
                Ok(Value::Null)
            }
            other => Ok(other?),
        }
    }

    async fn document(&self, uri: &DocumentUri) -> Result<Arc<DocumentModel>, RpcError> {
        Ok(self
            .api
            .documents
            .get_or_load(uri)
            .await
            .map_err(HostError::from)?)
    }

    /// Decode `{uri, ...params}`, resolve the document and dispatch
    async fn capability<P, R, F, Fut>(&self, params: Option<Value>, dispatch: F) -> Result<Value, RpcError>
    where
        P: DeserializeOwned,
        R: Serialize,
        F: FnOnce(Arc<DocumentModel>, P) -> Fut,
        Fut: Future<Output = R>,
    {
        let request: DocumentRequest<P> = decode(params)?;
        let document = self.document(&request.uri).await?;
        to_json(dispatch(document, request.params).await)
    }

    async fn uri_capability<R, F, Fut>(&self, params: Option<Value>, dispatch: F) -> Result<Value, RpcError>
    where
        R: Serialize,
        F: FnOnce(Arc<DocumentModel>) -> Fut,
        Fut: Future<Output = R>,
    {
        let request: UriParams = decode(params)?;
        let document = self.document(&request.uri).await?;
        to_json(dispatch(document).await)
    }

    async fn route_request(&self, method: &str, params: Option<Value>, token: &CancellationToken) -> Result<Value, RpcError> {
        let registry = &self.api.registry;
        match method {
            methods::PROVIDE_COMPLETIONS => {
                self.capability(params, |doc, p: CompletionParams| async move {
                    registry.provide_completions(&doc, p, token).await
                })
                .await
            }
            methods::PROVIDE_INLINE_COMPLETIONS => {
                self.capability(params, |doc, p: InlineCompletionParams| async move {
                    registry.provide_inline_completions(&doc, p, token).await
                })
                .await
            }
            methods::PROVIDE_HOVER => {
                self.capability(params, |doc, p: PositionParams| async move {
                    registry.provide_hover(&doc, p, token).await
                })
                .await
            }
            methods::PROVIDE_DEFINITION => {
                self.capability(params, |doc, p: PositionParams| async move {
                    registry.provide_definition(&doc, p, token).await
                })
                .await
            }
            methods::PROVIDE_DECLARATION => {
                self.capability(params, |doc, p: PositionParams| async move {
                    registry.provide_declaration(&doc, p, token).await
                })
                .await
            }
            methods::PROVIDE_TYPE_DEFINITION => {
                self.capability(params, |doc, p: PositionParams| async move {
                    registry.provide_type_definition(&doc, p, token).await
                })
                .await
            }
            methods::PROVIDE_IMPLEMENTATION => {
                self.capability(params, |doc, p: PositionParams| async move {
                    registry.provide_implementation(&doc, p, token).await
                })
                .await
            }
            methods::PROVIDE_REFERENCES => {
                self.capability(params, |doc, p: ReferenceParams| async move {
                    registry.provide_references(&doc, p, token).await
                })
                .await
            }
            methods::PROVIDE_DOCUMENT_SYMBOLS => {
                self.uri_capability(params, |doc| async move {
                    registry.provide_document_symbols(&doc, token).await
                })
                .await
            }
            methods::PROVIDE_SIGNATURE_HELP => {
                self.capability(params, |doc, p: SignatureHelpParams| async move {
                    registry.provide_signature_help(&doc, p, token).await
                })
                .await
            }
            methods::PROVIDE_CODE_ACTIONS => {
                self.capability(params, |doc, p: CodeActionParams| async move {
                    registry.provide_code_actions(&doc, p, token).await
                })
                .await
            }
            methods::PROVIDE_CODE_LENSES => {
                self.uri_capability(params, |doc| async move {
                    registry.provide_code_lenses(&doc, token).await
                })
                .await
            }
            methods::PROVIDE_DOCUMENT_FORMATTING_EDITS => {
                self.capability(params, |doc, p: DocumentFormattingParams| async move {
                    registry.provide_document_formatting_edits(&doc, p, token).await
                })
                .await
            }
            methods::PROVIDE_RANGE_FORMATTING_EDITS => {
                self.capability(params, |doc, p: RangeFormattingParams| async move {
                    registry.provide_range_formatting_edits(&doc, p, token).await
                })
                .await
            }
            methods::PROVIDE_ON_TYPE_FORMATTING_EDITS => {
                self.capability(params, |doc, p: OnTypeFormattingParams| async move {
                    registry.provide_on_type_formatting_edits(&doc, p, token).await
                })
                .await
            }
            methods::PROVIDE_RENAME_EDITS => {
                self.capability(params, |doc, p: RenameParams| async move {
                    registry.provide_rename_edits(&doc, p, token).await
                })
                .await
            }
            methods::PREPARE_RENAME => {
                self.capability(params, |doc, p: PositionParams| async move {
                    registry.prepare_rename(&doc, p, token).await
                })
                .await
            }
            methods::EXECUTE_COMMAND => {
                let request: ExecuteCommandParams = decode(params)?;
                Ok(self.execute_command(&request.command, request.arguments).await?)
            }
            methods::RESOLVE_WEBVIEW_VIEW => {
                let request: ResolveWebviewParams = decode(params)?;
                self.engine.on_view(&request.view_id).await;
                let resolved = self
                    .api
                    .views
                    .resolve(&request.view_id, token.clone())
                    .await
                    .map_err(HostError::from)?;
                to_json(resolved)
            }
            methods::DISPOSE_WEBVIEW_VIEW => {
                let request: HandleParams = decode(params)?;
                Ok(Value::Bool(self.api.views.dispose(&request.handle).await))
            }
            methods::ACTIVATE_BY_EVENT => {
                let request: ActivationEventParams = decode(params)?;
                let event = ActivationEvent::parse(&request.event);
                to_json(self.engine.activate_by_event(&event).await)
            }
            methods::SET_ENABLEMENT => {
                let request: EnablementParams = decode(params)?;
                self.engine
                    .set_enablement(&request.id, request.enabled, request.trusted)
                    .await
                    .map_err(HostError::from)?;
                Ok(Value::Null)
            }
            methods::SHUTDOWN => {
                self.shutdown().await;
                Ok(Value::Null)
            }
            methods::RELOAD => to_json(self.reload().await),
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }

    async fn route_notification(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        let documents = &self.api.documents;
        match method {
            methods::DID_OPEN_TEXT_DOCUMENT => {
                let params: DidOpenParams = decode(params)?;
                let scheme = params.uri.scheme().to_string();
                documents
                    .open(params.uri, &params.language_id, params.text, params.version)
                    .await;
                self.engine.on_language(&params.language_id).await;
                if scheme != "file" {
                    self.engine.on_file_system(&scheme).await;
                }
            }
            methods::DID_CHANGE_TEXT_DOCUMENT => {
                let params: DidChangeParams = decode(params)?;
                documents
                    .change(params.uri, params.language_id.as_deref(), params.text, params.version)
                    .await;
                if let Some(language_id) = &params.language_id {
                    self.engine.on_language(language_id).await;
                }
            }
            methods::DID_CLOSE_TEXT_DOCUMENT => {
                let params: UriParams = decode(params)?;
                if !documents.close(&params.uri).await {
                    debug!("Close for unknown document {}", params.uri);
                }
            }
            methods::DID_SAVE_TEXT_DOCUMENT => {
                let params: UriParams = decode(params)?;
                if documents.save(&params.uri).await.is_none() {
                    debug!("Save for unknown document {}", params.uri);
                }
            }
            methods::DID_CREATE_FILES => {
                let params: FilesParams = decode(params)?;
                documents.files_created(params.uris);
            }
            methods::DID_DELETE_FILES => {
                let params: FilesParams = decode(params)?;
                documents.files_deleted(params.uris);
            }
            methods::DID_RENAME_FILES => {
                let params: RenameFilesParams = decode(params)?;
                documents.files_renamed(params.files).await;
            }
            methods::DID_CHANGE_SELECTION => {
                let params: SelectionParams = decode(params)?;
                let selections = params.selections.into_iter().map(Into::into).collect();
                if !documents.set_selections(params.uri.clone(), selections).await {
                    debug!("Selection change for unknown document {}", params.uri);
                }
            }
            methods::DID_CHANGE_VIEW_VISIBILITY => {
                let params: ViewVisibilityParams = decode(params)?;
                if params.visible
                    && let Some(view_id) = &params.view_id
                {
                    self.engine.on_view(view_id).await;
                }
                let handle = match (&params.handle, &params.view_id) {
                    (Some(handle), _) => Some(handle.clone()),
                    (None, Some(view_id)) => self.api.views.handle_for(view_id).await,
                    (None, None) => None,
                };
                if let Some(handle) = handle {
                    self.api
                        .views
                        .set_visible(&handle, params.visible)
                        .await
                        .map_err(HostError::from)?;
                }
            }
            methods::DID_RECEIVE_WEBVIEW_MESSAGE => {
                let params: WebviewMessageParams = decode(params)?;
                self.api
                    .views
                    .deliver_message(&params.handle, params.message)
                    .await
                    .map_err(HostError::from)?;
            }
            other => trace!("Ignoring notification {}", other),
        }
        Ok(())
    }
}

#[async_trait]
impl RpcHandler for ExtensionHost {
    async fn handle_request(
        &self,
        method: &str,
        params: Option<Value>,
        token: CancellationToken,
    ) -> Result<Value, RpcError> {
        let started = Instant::now();
        let result = self.route_request(method, params, &token).await;
        log_timing!(Level::DEBUG, method, started.elapsed());
        result
    }

    async fn handle_notification(&self, method: &str, params: Option<Value>) {
        if let Err(e) = self.route_notification(method, params).await {
            warn!("Dropping {}: {}", method, e);
        }
    }
}
