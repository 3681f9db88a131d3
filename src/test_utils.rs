//! Test utilities and global setup
//!
//! Provides centralized test logging configuration, a recording host sink
//! and on-disk extension fixtures.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG`, defaulting to debug for this crate and info for
    /// tokio. Output goes through the test writer so it is captured per test.
    ///
    /// ```bash
    /// RUST_LOG=ext_host::extensions=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok(); // Another test may have installed a subscriber already
        });
    }
}

/// Initialize test logging for every test in the enclosing module
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}

/// A [`HostSink`](crate::host::HostSink) that records everything sent to it
#[cfg(test)]
pub mod sink {
    use crate::extensions::ExtensionStateChange;
    use crate::host::{HostSink, InputBoxOptions, MessageSeverity, QuickPickItem, QuickPickOptions};
    use crate::model::DocumentUri;
    use crate::rpc::RpcError;
    use async_trait::async_trait;
    use lsp_types::Diagnostic;
    use serde_json::Value;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum SinkEvent {
        Message(MessageSeverity, String),
        InputBox(InputBoxOptions),
        QuickPick(Vec<QuickPickItem>),
        OpenExternal(String),
        WebviewMessage { handle: String, message: Value },
        Diagnostics { uri: DocumentUri, count: usize },
        StateChanged(ExtensionStateChange),
    }

    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<SinkEvent>>,
        /// Answer for input boxes; `None` simulates cancel
        pub input_reply: Mutex<Option<String>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<SinkEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn state_changes(&self) -> Vec<ExtensionStateChange> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    SinkEvent::StateChanged(change) => Some(change),
                    _ => None,
                })
                .collect()
        }

        fn record(&self, event: SinkEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[async_trait]
    impl HostSink for RecordingSink {
        fn show_message(&self, severity: MessageSeverity, message: &str) {
            self.record(SinkEvent::Message(severity, message.to_string()));
        }

        async fn show_input_box(&self, options: InputBoxOptions) -> Result<Option<String>, RpcError> {
            self.record(SinkEvent::InputBox(options));
            Ok(self.input_reply.lock().unwrap().clone())
        }

        async fn show_quick_pick(
            &self,
            items: Vec<QuickPickItem>,
            _options: QuickPickOptions,
        ) -> Result<Option<Vec<QuickPickItem>>, RpcError> {
            let first = items.first().cloned();
            self.record(SinkEvent::QuickPick(items));
            Ok(first.map(|item| vec![item]))
        }

        async fn open_external(&self, uri: &str) -> Result<bool, RpcError> {
            self.record(SinkEvent::OpenExternal(uri.to_string()));
            Ok(true)
        }

        fn post_webview_message(&self, handle: &str, message: Value) {
            self.record(SinkEvent::WebviewMessage {
                handle: handle.to_string(),
                message,
            });
        }

        fn publish_diagnostics(&self, uri: &DocumentUri, diagnostics: &[Diagnostic]) {
            self.record(SinkEvent::Diagnostics {
                uri: uri.clone(),
                count: diagnostics.len(),
            });
        }

        fn extension_state_changed(&self, change: &ExtensionStateChange) {
            self.record(SinkEvent::StateChanged(change.clone()));
        }
    }
}

/// Temporary workspace, extensions directory and storage root
#[cfg(test)]
pub mod fixtures {
    use super::sink::RecordingSink;
    use crate::commands::CommandRegistry;
    use crate::daemon::DiagnosticCollection;
    use crate::documents::DocumentSynchronizer;
    use crate::extensions::HostApi;
    use crate::io::RealFileSystem;
    use crate::registry::CapabilityRegistry;
    use crate::views::SessionManager;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tempfile::TempDir;

    pub struct TestWorkspace {
        _temp_dir: TempDir, // Keeps the directories alive until drop
        pub workspace: PathBuf,
        pub extensions: PathBuf,
        pub storage: PathBuf,
    }

    impl TestWorkspace {
        pub fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let root = temp_dir.path().to_path_buf();
            let workspace = root.join("workspace");
            let extensions = root.join("extensions");
            let storage = root.join("storage");
            for dir in [&workspace, &extensions, &storage] {
                fs::create_dir_all(dir).unwrap();
            }
            Self {
                _temp_dir: temp_dir,
                workspace,
                extensions,
                storage,
            }
        }

        /// Write `<extensions>/<dir>/package.json`
        pub fn add_extension(&self, dir: &str, manifest: serde_json::Value) -> PathBuf {
            let path = self.extensions.join(dir);
            fs::create_dir_all(&path).unwrap();
            fs::write(path.join("package.json"), manifest.to_string()).unwrap();
            path
        }

        pub fn touch(&self, relative: &str) {
            let path = self.workspace.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }
    }

    /// Fresh collaborators around `sink`
    pub fn host_api(workspace_root: &Path, sink: Arc<RecordingSink>) -> HostApi {
        HostApi {
            registry: Arc::new(CapabilityRegistry::new()),
            commands: CommandRegistry::new(),
            documents: Arc::new(DocumentSynchronizer::new(Arc::new(RealFileSystem))),
            views: SessionManager::new(sink.clone()),
            window: sink,
            diagnostics: Arc::new(DiagnosticCollection::new()),
            workspace_root: workspace_root.to_path_buf(),
        }
    }
}
