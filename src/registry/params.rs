//! Request parameters handed to providers, one struct per capability kind
//!
//! Result payloads reuse `lsp_types`; parameters are local because the
//! document itself travels separately as a resolved snapshot.

use crate::model::{Position, Range};
use lsp_types::{
    CodeActionContext, CompletionContext, CompletionTriggerKind, FormattingOptions,
    SignatureHelpContext, SignatureHelpTriggerKind,
};
use serde::{Deserialize, Serialize};

/// Hover, definition, declaration, type definition and implementation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionParams {
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionParams {
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<CompletionContext>,
}

impl CompletionParams {
    pub fn trigger_character(&self) -> Option<&str> {
        let context = self.context.as_ref()?;
        if context.trigger_kind == CompletionTriggerKind::TRIGGER_CHARACTER {
            context.trigger_character.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineCompletionParams {
    pub position: Position,
    /// Invoked explicitly rather than while typing
    #[serde(default)]
    pub explicit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineCompletionItem {
    pub insert_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<lsp_types::Command>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceParams {
    pub position: Position,
    #[serde(default)]
    pub include_declaration: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureHelpParams {
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<SignatureHelpContext>,
}

impl SignatureHelpParams {
    pub fn trigger_character(&self) -> Option<&str> {
        let context = self.context.as_ref()?;
        if context.trigger_kind == SignatureHelpTriggerKind::TRIGGER_CHARACTER {
            context.trigger_character.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameParams {
    pub position: Position,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeActionParams {
    pub range: Range,
    #[serde(default)]
    pub context: CodeActionContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFormattingParams {
    #[serde(default)]
    pub options: FormattingOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeFormattingParams {
    pub range: Range,
    #[serde(default)]
    pub options: FormattingOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnTypeFormattingParams {
    pub position: Position,
    /// Character that was typed
    pub ch: String,
    #[serde(default)]
    pub options: FormattingOptions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completion_trigger_character_only_for_character_triggers() {
        let typed: CompletionParams = serde_json::from_value(json!({
            "position": {"line": 0, "character": 4},
            "context": {"triggerKind": 2, "triggerCharacter": "."}
        }))
        .unwrap();
        assert_eq!(typed.trigger_character(), Some("."));

        let invoked: CompletionParams = serde_json::from_value(json!({
            "position": {"line": 0, "character": 4},
            "context": {"triggerKind": 1}
        }))
        .unwrap();
        assert_eq!(invoked.trigger_character(), None);
    }

    #[test]
    fn test_defaults_when_optional_fields_absent() {
        let params: CodeActionParams = serde_json::from_value(json!({
            "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}}
        }))
        .unwrap();
        assert!(params.context.diagnostics.is_empty());

        let references: ReferenceParams =
            serde_json::from_value(json!({"position": {"line": 1, "character": 2}})).unwrap();
        assert!(!references.include_declaration);
    }
}
