//! Ordered registrations for one capability kind and the two dispatch policies

use super::provider::{Aggregate, Provider, ProviderError, ProviderResult};
use super::selector::DocumentSelector;
use crate::disposable::{Disposable, DisposeError};
use crate::log_timing;
use crate::model::DocumentModel;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Completion,
    InlineCompletion,
    Hover,
    Definition,
    Declaration,
    TypeDefinition,
    Implementation,
    References,
    DocumentSymbols,
    SignatureHelp,
    Rename,
    PrepareRename,
    CodeActions,
    CodeLenses,
    DocumentFormatting,
    RangeFormatting,
    OnTypeFormatting,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Completion => "completion",
            CapabilityKind::InlineCompletion => "inline-completion",
            CapabilityKind::Hover => "hover",
            CapabilityKind::Definition => "definition",
            CapabilityKind::Declaration => "declaration",
            CapabilityKind::TypeDefinition => "type-definition",
            CapabilityKind::Implementation => "implementation",
            CapabilityKind::References => "references",
            CapabilityKind::DocumentSymbols => "document-symbols",
            CapabilityKind::SignatureHelp => "signature-help",
            CapabilityKind::Rename => "rename",
            CapabilityKind::PrepareRename => "prepare-rename",
            CapabilityKind::CodeActions => "code-actions",
            CapabilityKind::CodeLenses => "code-lenses",
            CapabilityKind::DocumentFormatting => "document-formatting",
            CapabilityKind::RangeFormatting => "range-formatting",
            CapabilityKind::OnTypeFormatting => "on-type-formatting",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type RegistrationHandle = u64;

struct Registration<P, R> {
    handle: RegistrationHandle,
    selector: DocumentSelector,
    provider: Arc<dyn Provider<P, R>>,
    trigger_characters: Vec<String>,
}

/// Providers of one kind, kept in registration order
pub struct ProviderSet<P, R> {
    kind: CapabilityKind,
    next_handle: AtomicU64,
    registrations: RwLock<Vec<Arc<Registration<P, R>>>>,
}

impl<P, R> ProviderSet<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new(kind: CapabilityKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            next_handle: AtomicU64::new(1),
            registrations: RwLock::new(Vec::new()),
        })
    }

    pub fn kind(&self) -> CapabilityKind {
        self.kind
    }

    pub async fn register(
        self: &Arc<Self>,
        selector: DocumentSelector,
        provider: Arc<dyn Provider<P, R>>,
    ) -> Box<dyn Disposable> {
        self.register_with_triggers(selector, provider, Vec::new()).await
    }

    /// Register a provider that also answers requests typed with one of
    /// `trigger_characters`
    pub async fn register_with_triggers(
        self: &Arc<Self>,
        selector: DocumentSelector,
        provider: Arc<dyn Provider<P, R>>,
        trigger_characters: Vec<String>,
    ) -> Box<dyn Disposable> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.registrations.write().await.push(Arc::new(Registration {
            handle,
            selector,
            provider,
            trigger_characters,
        }));
        debug!("Registered {} provider #{}", self.kind, handle);

        Box::new(ProviderRegistration {
            set: Arc::downgrade(self),
            handle,
        })
    }

    pub async fn unregister(&self, handle: RegistrationHandle) -> bool {
        let mut registrations = self.registrations.write().await;
        let before = registrations.len();
        registrations.retain(|registration| registration.handle != handle);
        let removed = registrations.len() != before;
        if removed {
            debug!("Unregistered {} provider #{}", self.kind, handle);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.registrations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registrations.read().await.is_empty()
    }

    /// Snapshot of matching registrations, in registration order
    async fn matching(
        &self,
        document: &DocumentModel,
        trigger_character: Option<&str>,
    ) -> Vec<Arc<Registration<P, R>>> {
        self.registrations
            .read()
            .await
            .iter()
            .filter(|registration| registration.selector.matches(document))
            .filter(|registration| {
                trigger_character.is_none_or(|typed| {
                    registration
                        .trigger_characters
                        .iter()
                        .any(|declared| declared == typed)
                })
            })
            .cloned()
            .collect()
    }

    /// Run one provider on its own task so a panic stays contained
    async fn invoke(
        &self,
        registration: &Registration<P, R>,
        document: &Arc<DocumentModel>,
        params: P,
        token: &CancellationToken,
    ) -> Option<R> {
        let provider = Arc::clone(&registration.provider);
        let document = Arc::clone(document);
        let provider_token = token.clone();

        let outcome = tokio::spawn(async move {
            provider.provide(document, params, provider_token).await
        })
        .await
        .unwrap_or_else(|join_error| Err(ProviderError::Panicked(join_error.to_string())));

        match outcome {
            Ok(result) => result,
            Err(ProviderError::Cancelled) => {
                trace!("{} provider #{} stopped on cancellation", self.kind, registration.handle);
                None
            }
            Err(e @ ProviderError::Panicked(_)) => {
                error!("{} provider #{}: {}", self.kind, registration.handle, e);
                None
            }
            Err(e) => {
                warn!("{} provider #{}: {}", self.kind, registration.handle, e);
                None
            }
        }
    }

    /// Return the first non-empty result; later providers are not called
    pub async fn first_non_empty(
        &self,
        document: &Arc<DocumentModel>,
        params: P,
        trigger_character: Option<&str>,
        token: &CancellationToken,
    ) -> Option<R>
    where
        R: ProviderResult,
    {
        let started = Instant::now();
        let candidates = self.matching(document, trigger_character).await;
        trace!("{}: {} matching provider(s) for {}", self.kind, candidates.len(), document.uri());

        let mut found = None;
        for registration in &candidates {
            if token.is_cancelled() {
                debug!("{} request cancelled before provider #{}", self.kind, registration.handle);
                break;
            }
            if let Some(result) = self.invoke(registration, document, params.clone(), token).await
                && !result.is_empty_result()
            {
                found = Some(result);
                break;
            }
        }

        log_timing!(Level::TRACE, self.kind.as_str(), started.elapsed());
        found
    }

    /// Query every matching provider and merge their results in order
    pub async fn aggregate(
        &self,
        document: &Arc<DocumentModel>,
        params: P,
        trigger_character: Option<&str>,
        token: &CancellationToken,
    ) -> R
    where
        R: Aggregate,
    {
        let started = Instant::now();
        let candidates = self.matching(document, trigger_character).await;
        trace!("{}: {} matching provider(s) for {}", self.kind, candidates.len(), document.uri());

        let mut merged = R::default();
        for registration in &candidates {
            if token.is_cancelled() {
                debug!("{} request cancelled before provider #{}", self.kind, registration.handle);
                break;
            }
            if let Some(result) = self.invoke(registration, document, params.clone(), token).await {
                merged.merge(result);
            }
        }

        log_timing!(Level::TRACE, self.kind.as_str(), started.elapsed());
        merged
    }
}

/// Removes exactly one registration when disposed
struct ProviderRegistration<P, R> {
    set: Weak<ProviderSet<P, R>>,
    handle: RegistrationHandle,
}

#[async_trait]
impl<P, R> Disposable for ProviderRegistration<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    async fn dispose(&self) -> Result<(), DisposeError> {
        if let Some(set) = self.set.upgrade() {
            set.unregister(self.handle).await;
        }
        Ok(())
    }
}
