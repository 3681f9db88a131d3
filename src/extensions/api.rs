//! Surface handed to an extension on activation

use super::context::ExtensionContext;
use crate::commands::{CommandError, CommandHandler, CommandRegistry};
use crate::daemon::DiagnosticCollection;
use crate::documents::DocumentSynchronizer;
use crate::host::HostSink;
use crate::registry::{CapabilityRegistry, DocumentSelector, Provider, ProviderSet};
use crate::views::{SessionError, SessionManager, WebviewViewProvider};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct HostApi {
    pub registry: Arc<CapabilityRegistry>,
    pub commands: Arc<CommandRegistry>,
    pub documents: Arc<DocumentSynchronizer>,
    pub views: Arc<SessionManager>,
    pub window: Arc<dyn HostSink>,
    pub diagnostics: Arc<DiagnosticCollection>,
    pub workspace_root: PathBuf,
}

impl HostApi {
    /// Register a command owned by `context`
    pub async fn register_command(
        &self,
        context: &ExtensionContext,
        id: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), CommandError> {
        let registration = self.commands.register(id, handler).await?;
        context.subscribe(registration);
        Ok(())
    }

    /// Register a capability provider owned by `context`
    pub async fn register_provider<P, R>(
        &self,
        context: &ExtensionContext,
        set: &Arc<ProviderSet<P, R>>,
        selector: DocumentSelector,
        provider: Arc<dyn Provider<P, R>>,
    ) where
        P: Clone + Send + Sync + 'static,
        R: Send + 'static,
    {
        context.subscribe(set.register(selector, provider).await);
    }

    /// Like [`HostApi::register_provider`], only asked for requests typed
    /// with one of `triggers`
    pub async fn register_provider_with_triggers<P, R>(
        &self,
        context: &ExtensionContext,
        set: &Arc<ProviderSet<P, R>>,
        selector: DocumentSelector,
        provider: Arc<dyn Provider<P, R>>,
        triggers: Vec<String>,
    ) where
        P: Clone + Send + Sync + 'static,
        R: Send + 'static,
    {
        context.subscribe(set.register_with_triggers(selector, provider, triggers).await);
    }

    pub async fn register_webview_view_provider(
        &self,
        context: &ExtensionContext,
        view_id: &str,
        provider: Arc<dyn WebviewViewProvider>,
    ) -> Result<(), SessionError> {
        let registration = self.views.register_provider(view_id, provider).await?;
        context.subscribe(registration);
        Ok(())
    }
}
