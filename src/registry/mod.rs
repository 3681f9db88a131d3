//! Capability registry: per-kind provider collections and dispatch
//!
//! Each kind has a fixed policy. Short-circuit kinds return the first
//! non-empty result; aggregate kinds concatenate every matching provider's
//! result in registration order.

pub mod params;
pub mod provider;
pub mod provider_set;
pub mod selector;

pub use params::{
    CodeActionParams, CompletionParams, DocumentFormattingParams, InlineCompletionItem,
    InlineCompletionParams, OnTypeFormattingParams, PositionParams, RangeFormattingParams,
    ReferenceParams, RenameParams, SignatureHelpParams,
};
pub use provider::{Aggregate, Provider, ProviderError, ProviderResult, provider_fn};
pub use provider_set::{CapabilityKind, ProviderSet, RegistrationHandle};
pub use selector::{DocumentFilter, DocumentSelector, GlobPattern, SelectorError, SelectorSpec};

use crate::model::DocumentModel;
use lsp_types::{
    CodeActionOrCommand, CodeLens, CompletionList, DocumentSymbol, Hover, Location,
    PrepareRenameResponse, SignatureHelp, TextEdit, WorkspaceEdit,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct CapabilityRegistry {
    pub completion: Arc<ProviderSet<CompletionParams, CompletionList>>,
    pub inline_completion: Arc<ProviderSet<InlineCompletionParams, Vec<InlineCompletionItem>>>,
    pub hover: Arc<ProviderSet<PositionParams, Hover>>,
    pub definition: Arc<ProviderSet<PositionParams, Vec<Location>>>,
    pub declaration: Arc<ProviderSet<PositionParams, Vec<Location>>>,
    pub type_definition: Arc<ProviderSet<PositionParams, Vec<Location>>>,
    pub implementation: Arc<ProviderSet<PositionParams, Vec<Location>>>,
    pub references: Arc<ProviderSet<ReferenceParams, Vec<Location>>>,
    pub document_symbols: Arc<ProviderSet<(), Vec<DocumentSymbol>>>,
    pub signature_help: Arc<ProviderSet<SignatureHelpParams, SignatureHelp>>,
    pub rename: Arc<ProviderSet<RenameParams, WorkspaceEdit>>,
    pub prepare_rename: Arc<ProviderSet<PositionParams, PrepareRenameResponse>>,
    pub code_actions: Arc<ProviderSet<CodeActionParams, Vec<CodeActionOrCommand>>>,
    pub code_lenses: Arc<ProviderSet<(), Vec<CodeLens>>>,
    pub document_formatting: Arc<ProviderSet<DocumentFormattingParams, Vec<TextEdit>>>,
    pub range_formatting: Arc<ProviderSet<RangeFormattingParams, Vec<TextEdit>>>,
    pub on_type_formatting: Arc<ProviderSet<OnTypeFormattingParams, Vec<TextEdit>>>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            completion: ProviderSet::new(CapabilityKind::Completion),
            inline_completion: ProviderSet::new(CapabilityKind::InlineCompletion),
            hover: ProviderSet::new(CapabilityKind::Hover),
            definition: ProviderSet::new(CapabilityKind::Definition),
            declaration: ProviderSet::new(CapabilityKind::Declaration),
            type_definition: ProviderSet::new(CapabilityKind::TypeDefinition),
            implementation: ProviderSet::new(CapabilityKind::Implementation),
            references: ProviderSet::new(CapabilityKind::References),
            document_symbols: ProviderSet::new(CapabilityKind::DocumentSymbols),
            signature_help: ProviderSet::new(CapabilityKind::SignatureHelp),
            rename: ProviderSet::new(CapabilityKind::Rename),
            prepare_rename: ProviderSet::new(CapabilityKind::PrepareRename),
            code_actions: ProviderSet::new(CapabilityKind::CodeActions),
            code_lenses: ProviderSet::new(CapabilityKind::CodeLenses),
            document_formatting: ProviderSet::new(CapabilityKind::DocumentFormatting),
            range_formatting: ProviderSet::new(CapabilityKind::RangeFormatting),
            on_type_formatting: ProviderSet::new(CapabilityKind::OnTypeFormatting),
        }
    }

    // Aggregate kinds

    pub async fn provide_completions(
        &self,
        document: &Arc<DocumentModel>,
        params: CompletionParams,
        token: &CancellationToken,
    ) -> CompletionList {
        let trigger = params.trigger_character().map(str::to_string);
        self.completion
            .aggregate(document, params, trigger.as_deref(), token)
            .await
    }

    pub async fn provide_inline_completions(
        &self,
        document: &Arc<DocumentModel>,
        params: InlineCompletionParams,
        token: &CancellationToken,
    ) -> Vec<InlineCompletionItem> {
        self.inline_completion.aggregate(document, params, None, token).await
    }

    pub async fn provide_document_symbols(
        &self,
        document: &Arc<DocumentModel>,
        token: &CancellationToken,
    ) -> Vec<DocumentSymbol> {
        self.document_symbols.aggregate(document, (), None, token).await
    }

    pub async fn provide_code_actions(
        &self,
        document: &Arc<DocumentModel>,
        params: CodeActionParams,
        token: &CancellationToken,
    ) -> Vec<CodeActionOrCommand> {
        self.code_actions.aggregate(document, params, None, token).await
    }

    pub async fn provide_code_lenses(
        &self,
        document: &Arc<DocumentModel>,
        token: &CancellationToken,
    ) -> Vec<CodeLens> {
        self.code_lenses.aggregate(document, (), None, token).await
    }

    pub async fn provide_document_formatting_edits(
        &self,
        document: &Arc<DocumentModel>,
        params: DocumentFormattingParams,
        token: &CancellationToken,
    ) -> Vec<TextEdit> {
        self.document_formatting.aggregate(document, params, None, token).await
    }

    pub async fn provide_range_formatting_edits(
        &self,
        document: &Arc<DocumentModel>,
        params: RangeFormattingParams,
        token: &CancellationToken,
    ) -> Vec<TextEdit> {
        self.range_formatting.aggregate(document, params, None, token).await
    }

    /// Only providers that declared the typed character are asked
    pub async fn provide_on_type_formatting_edits(
        &self,
        document: &Arc<DocumentModel>,
        params: OnTypeFormattingParams,
        token: &CancellationToken,
    ) -> Vec<TextEdit> {
        let typed = params.ch.clone();
        self.on_type_formatting
            .aggregate(document, params, Some(&typed), token)
            .await
    }

    // Short-circuit kinds

    pub async fn provide_hover(
        &self,
        document: &Arc<DocumentModel>,
        params: PositionParams,
        token: &CancellationToken,
    ) -> Option<Hover> {
        self.hover.first_non_empty(document, params, None, token).await
    }

    pub async fn provide_definition(
        &self,
        document: &Arc<DocumentModel>,
        params: PositionParams,
        token: &CancellationToken,
    ) -> Option<Vec<Location>> {
        self.definition.first_non_empty(document, params, None, token).await
    }

    pub async fn provide_declaration(
        &self,
        document: &Arc<DocumentModel>,
        params: PositionParams,
        token: &CancellationToken,
    ) -> Option<Vec<Location>> {
        self.declaration.first_non_empty(document, params, None, token).await
    }

    pub async fn provide_type_definition(
        &self,
        document: &Arc<DocumentModel>,
        params: PositionParams,
        token: &CancellationToken,
    ) -> Option<Vec<Location>> {
        self.type_definition
            .first_non_empty(document, params, None, token)
            .await
    }

    pub async fn provide_implementation(
        &self,
        document: &Arc<DocumentModel>,
        params: PositionParams,
        token: &CancellationToken,
    ) -> Option<Vec<Location>> {
        self.implementation
            .first_non_empty(document, params, None, token)
            .await
    }

    pub async fn provide_references(
        &self,
        document: &Arc<DocumentModel>,
        params: ReferenceParams,
        token: &CancellationToken,
    ) -> Option<Vec<Location>> {
        self.references.first_non_empty(document, params, None, token).await
    }

    pub async fn provide_signature_help(
        &self,
        document: &Arc<DocumentModel>,
        params: SignatureHelpParams,
        token: &CancellationToken,
    ) -> Option<SignatureHelp> {
        let trigger = params.trigger_character().map(str::to_string);
        self.signature_help
            .first_non_empty(document, params, trigger.as_deref(), token)
            .await
    }

    pub async fn provide_rename_edits(
        &self,
        document: &Arc<DocumentModel>,
        params: RenameParams,
        token: &CancellationToken,
    ) -> Option<WorkspaceEdit> {
        self.rename.first_non_empty(document, params, None, token).await
    }

    pub async fn prepare_rename(
        &self,
        document: &Arc<DocumentModel>,
        params: PositionParams,
        token: &CancellationToken,
    ) -> Option<PrepareRenameResponse> {
        self.prepare_rename
            .first_non_empty(document, params, None, token)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentUri, Position};
    use lsp_types::{CompletionItem, HoverContents, MarkedString};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn python_doc() -> Arc<DocumentModel> {
        Arc::new(DocumentModel::new(
            DocumentUri::parse("file:///ws/app.py").unwrap(),
            "python",
            1,
            "import os\n".into(),
        ))
    }

    fn completions(labels: &'static [&'static str], incomplete: bool) -> Arc<dyn Provider<CompletionParams, CompletionList>> {
        provider_fn(move |_, _: CompletionParams, _| async move {
            Ok(Some(CompletionList {
                is_incomplete: incomplete,
                items: labels
                    .iter()
                    .map(|label| CompletionItem::new_simple(label.to_string(), String::new()))
                    .collect(),
            }))
        })
    }

    fn at(line: u32, character: u32) -> PositionParams {
        PositionParams {
            position: Position::new(line, character),
        }
    }

    #[tokio::test]
    async fn test_completions_merge_five_items_in_order() {
        let registry = CapabilityRegistry::new();
        registry
            .completion
            .register(DocumentSelector::language("python"), completions(&["a", "b"], false))
            .await;
        registry
            .completion
            .register(DocumentSelector::language("python"), completions(&["c", "d", "e"], true))
            .await;

        let list = registry
            .provide_completions(
                &python_doc(),
                CompletionParams {
                    position: Position::new(0, 0),
                    context: None,
                },
                &CancellationToken::new(),
            )
            .await;

        let labels: Vec<_> = list.items.iter().map(|item| item.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "b", "c", "d", "e"]);
        assert!(list.is_incomplete);
    }

    #[tokio::test]
    async fn test_hover_short_circuits() {
        let registry = CapabilityRegistry::new();
        let late_calls = Arc::new(AtomicUsize::new(0));

        registry
            .hover
            .register(
                DocumentSelector::any(),
                provider_fn(|_, _: PositionParams, _| async { Ok(None) }),
            )
            .await;
        registry
            .hover
            .register(
                DocumentSelector::any(),
                provider_fn(|_, _: PositionParams, _| async {
                    Ok(Some(Hover {
                        contents: HoverContents::Scalar(MarkedString::String("os module".into())),
                        range: None,
                    }))
                }),
            )
            .await;
        let counter = Arc::clone(&late_calls);
        registry
            .hover
            .register(
                DocumentSelector::any(),
                provider_fn(move |_, _: PositionParams, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(None) }
                }),
            )
            .await;

        let hover = registry
            .provide_hover(&python_doc(), at(0, 8), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(hover.contents, HoverContents::Scalar(MarkedString::String(ref s)) if s == "os module"));
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_providers_yields_empty_results() {
        let registry = CapabilityRegistry::new();
        let doc = python_doc();
        let token = CancellationToken::new();

        assert!(registry.provide_definition(&doc, at(0, 0), &token).await.is_none());
        assert!(registry.provide_document_symbols(&doc, &token).await.is_empty());
        assert!(registry.provide_code_lenses(&doc, &token).await.is_empty());
    }

    #[tokio::test]
    async fn test_on_type_formatting_uses_typed_character() {
        let registry = CapabilityRegistry::new();
        registry
            .on_type_formatting
            .register_with_triggers(
                DocumentSelector::any(),
                provider_fn(|_, _: OnTypeFormattingParams, _| async {
                    Ok(Some(vec![TextEdit::new(
                        lsp_types::Range::default(),
                        "    ".into(),
                    )]))
                }),
                vec!["}".into()],
            )
            .await;

        let doc = python_doc();
        let token = CancellationToken::new();
        let params = |ch: &str| OnTypeFormattingParams {
            position: Position::new(0, 1),
            ch: ch.into(),
            options: Default::default(),
        };
        assert_eq!(
            registry
                .provide_on_type_formatting_edits(&doc, params("}"), &token)
                .await
                .len(),
            1
        );
        assert!(registry
            .provide_on_type_formatting_edits(&doc, params(";"), &token)
            .await
            .is_empty());
    }
}
