//! Provider seam: one async callback per capability kind

use crate::model::DocumentModel;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider failed: {0}")]
    Failed(String),

    #[error("Provider observed cancellation")]
    Cancelled,

    #[error("Provider panicked: {0}")]
    Panicked(String),

    #[error("Invalid provider result: {0}")]
    InvalidResult(#[from] serde_json::Error),
}

/// Supplies one kind of language feature for matching documents.
///
/// `Ok(None)` means "nothing to contribute"; the dispatcher moves on.
#[async_trait]
pub trait Provider<P, R>: Send + Sync {
    async fn provide(
        &self,
        document: Arc<DocumentModel>,
        params: P,
        token: CancellationToken,
    ) -> Result<Option<R>, ProviderError>;
}

/// Adapts an async closure into a [`Provider`]
pub struct FnProvider<F, P, R> {
    callback: F,
    _marker: PhantomData<fn(P) -> R>,
}

#[async_trait]
impl<F, Fut, P, R> Provider<P, R> for FnProvider<F, P, R>
where
    F: Fn(Arc<DocumentModel>, P, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<R>, ProviderError>> + Send + 'static,
    P: Send + 'static,
    R: Send + 'static,
{
    async fn provide(
        &self,
        document: Arc<DocumentModel>,
        params: P,
        token: CancellationToken,
    ) -> Result<Option<R>, ProviderError> {
        (self.callback)(document, params, token).await
    }
}

pub fn provider_fn<F, Fut, P, R>(callback: F) -> Arc<dyn Provider<P, R>>
where
    F: Fn(Arc<DocumentModel>, P, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<R>, ProviderError>> + Send + 'static,
    P: Send + 'static,
    R: Send + 'static,
{
    Arc::new(FnProvider {
        callback,
        _marker: PhantomData,
    })
}

/// Lets short-circuit dispatch skip results that carry nothing
pub trait ProviderResult {
    fn is_empty_result(&self) -> bool;
}

impl<T> ProviderResult for Vec<T> {
    fn is_empty_result(&self) -> bool {
        self.is_empty()
    }
}

impl ProviderResult for lsp_types::Hover {
    fn is_empty_result(&self) -> bool {
        match &self.contents {
            lsp_types::HoverContents::Scalar(marked) => marked_string_is_empty(marked),
            lsp_types::HoverContents::Array(items) => items.iter().all(marked_string_is_empty),
            lsp_types::HoverContents::Markup(markup) => markup.value.trim().is_empty(),
        }
    }
}

fn marked_string_is_empty(marked: &lsp_types::MarkedString) -> bool {
    match marked {
        lsp_types::MarkedString::String(text) => text.trim().is_empty(),
        lsp_types::MarkedString::LanguageString(code) => code.value.trim().is_empty(),
    }
}

impl ProviderResult for lsp_types::SignatureHelp {
    fn is_empty_result(&self) -> bool {
        self.signatures.is_empty()
    }
}

impl ProviderResult for lsp_types::WorkspaceEdit {
    fn is_empty_result(&self) -> bool {
        let no_changes = self
            .changes
            .as_ref()
            .is_none_or(|changes| changes.values().all(Vec::is_empty));
        let no_document_changes = match &self.document_changes {
            None => true,
            Some(lsp_types::DocumentChanges::Edits(edits)) => edits.is_empty(),
            Some(lsp_types::DocumentChanges::Operations(operations)) => operations.is_empty(),
        };
        no_changes && no_document_changes
    }
}

impl ProviderResult for lsp_types::PrepareRenameResponse {
    fn is_empty_result(&self) -> bool {
        false
    }
}

/// Lets aggregate dispatch fold provider results together
pub trait Aggregate: Default {
    fn merge(&mut self, other: Self);
}

impl<T> Aggregate for Vec<T> {
    fn merge(&mut self, other: Self) {
        self.extend(other);
    }
}

impl Aggregate for lsp_types::CompletionList {
    fn merge(&mut self, other: Self) {
        self.is_incomplete |= other.is_incomplete;
        self.items.extend(other.items);
    }
}
