//! RPC method names
//!
//! Inbound requests are `extensionHost.$<verb>`, inbound notifications
//! `extensionHost.on<Event>`. Outbound calls to the shell live under `host.`.

pub const PROVIDE_COMPLETIONS: &str = "extensionHost.$provideCompletionItems";
pub const PROVIDE_INLINE_COMPLETIONS: &str = "extensionHost.$provideInlineCompletionItems";
pub const PROVIDE_HOVER: &str = "extensionHost.$provideHover";
pub const PROVIDE_DEFINITION: &str = "extensionHost.$provideDefinition";
pub const PROVIDE_DECLARATION: &str = "extensionHost.$provideDeclaration";
pub const PROVIDE_TYPE_DEFINITION: &str = "extensionHost.$provideTypeDefinition";
pub const PROVIDE_IMPLEMENTATION: &str = "extensionHost.$provideImplementation";
pub const PROVIDE_REFERENCES: &str = "extensionHost.$provideReferences";
pub const PROVIDE_DOCUMENT_SYMBOLS: &str = "extensionHost.$provideDocumentSymbols";
pub const PROVIDE_SIGNATURE_HELP: &str = "extensionHost.$provideSignatureHelp";
pub const PROVIDE_CODE_ACTIONS: &str = "extensionHost.$provideCodeActions";
pub const PROVIDE_CODE_LENSES: &str = "extensionHost.$provideCodeLenses";
pub const PROVIDE_DOCUMENT_FORMATTING_EDITS: &str = "extensionHost.$provideDocumentFormattingEdits";
pub const PROVIDE_RANGE_FORMATTING_EDITS: &str = "extensionHost.$provideDocumentRangeFormattingEdits";
pub const PROVIDE_ON_TYPE_FORMATTING_EDITS: &str = "extensionHost.$provideOnTypeFormattingEdits";
pub const PROVIDE_RENAME_EDITS: &str = "extensionHost.$provideRenameEdits";
pub const PREPARE_RENAME: &str = "extensionHost.$prepareRename";
pub const EXECUTE_COMMAND: &str = "extensionHost.$executeCommand";
pub const RESOLVE_WEBVIEW_VIEW: &str = "extensionHost.$resolveWebviewView";
pub const DISPOSE_WEBVIEW_VIEW: &str = "extensionHost.$disposeWebviewView";
pub const ACTIVATE_BY_EVENT: &str = "extensionHost.$activateByEvent";
pub const SET_ENABLEMENT: &str = "extensionHost.$setExtensionEnablement";
pub const SHUTDOWN: &str = "extensionHost.$shutdown";
pub const RELOAD: &str = "extensionHost.$reload";

pub const DID_OPEN_TEXT_DOCUMENT: &str = "extensionHost.onDidOpenTextDocument";
pub const DID_CHANGE_TEXT_DOCUMENT: &str = "extensionHost.onDidChangeTextDocument";
pub const DID_CLOSE_TEXT_DOCUMENT: &str = "extensionHost.onDidCloseTextDocument";
pub const DID_SAVE_TEXT_DOCUMENT: &str = "extensionHost.onDidSaveTextDocument";
pub const DID_CREATE_FILES: &str = "extensionHost.onDidCreateFiles";
pub const DID_DELETE_FILES: &str = "extensionHost.onDidDeleteFiles";
pub const DID_RENAME_FILES: &str = "extensionHost.onDidRenameFiles";
pub const DID_CHANGE_SELECTION: &str = "extensionHost.onDidChangeTextEditorSelection";
pub const DID_CHANGE_VIEW_VISIBILITY: &str = "extensionHost.onDidChangeViewVisibility";
pub const DID_RECEIVE_WEBVIEW_MESSAGE: &str = "extensionHost.onDidReceiveWebviewMessage";

pub const HOST_SHOW_MESSAGE: &str = "host.showMessage";
pub const HOST_SHOW_INPUT_BOX: &str = "host.$showInputBox";
pub const HOST_SHOW_QUICK_PICK: &str = "host.$showQuickPick";
pub const HOST_OPEN_EXTERNAL: &str = "host.$openExternal";
pub const HOST_POST_WEBVIEW_MESSAGE: &str = "host.postWebviewMessage";
pub const HOST_DIAGNOSTICS: &str = "host.onDiagnostics";
pub const HOST_EXTENSION_STATE_CHANGED: &str = "host.onExtensionStateChanged";

/// Built-in command listing extensions and their states
pub const LIST_EXTENSIONS_COMMAND: &str = "extensionHost.listExtensions";

/// Built-in command forwarding `[command, ...args]` to the language daemon
pub const DAEMON_EXECUTE_COMMAND: &str = "extensionHost.daemon.executeCommand";
