//! The view object an extension fills in when its provider resolves

use crate::host::HostSink;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tracing::debug;

const MESSAGE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebviewOptions {
    #[serde(default)]
    pub enable_scripts: bool,
    #[serde(default)]
    pub local_resource_roots: Vec<String>,
}

#[derive(Debug, Default)]
struct Content {
    html: String,
    options: WebviewOptions,
    title: Option<String>,
}

pub struct WebviewView {
    handle: String,
    view_id: String,
    content: Mutex<Content>,
    visible: watch::Sender<bool>,
    disposed: AtomicBool,
    messages: broadcast::Sender<Value>,
    sink: Arc<dyn HostSink>,
}

impl WebviewView {
    pub(crate) fn new(handle: String, view_id: String, sink: Arc<dyn HostSink>) -> Self {
        let (messages, _) = broadcast::channel(MESSAGE_CAPACITY);
        let (visible, _) = watch::channel(true);
        Self {
            handle,
            view_id,
            content: Mutex::new(Content::default()),
            visible,
            disposed: AtomicBool::new(false),
            messages,
            sink,
        }
    }

    fn content(&self) -> MutexGuard<'_, Content> {
        match self.content.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn view_id(&self) -> &str {
        &self.view_id
    }

    pub fn html(&self) -> String {
        self.content().html.clone()
    }

    pub fn set_html(&self, html: impl Into<String>) {
        self.content().html = html.into();
    }

    pub fn options(&self) -> WebviewOptions {
        self.content().options.clone()
    }

    pub fn set_options(&self, options: WebviewOptions) {
        self.content().options = options;
    }

    pub fn title(&self) -> Option<String> {
        self.content().title.clone()
    }

    pub fn set_title(&self, title: Option<String>) {
        self.content().title = title;
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    pub fn on_did_change_visibility(&self) -> watch::Receiver<bool> {
        self.visible.subscribe()
    }

    pub(crate) fn set_visible(&self, visible: bool) {
        self.visible.send_replace(visible);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_disposed(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    /// Messages sent by the view's page
    pub fn on_did_receive_message(&self) -> broadcast::Receiver<Value> {
        self.messages.subscribe()
    }

    pub(crate) fn deliver(&self, message: Value) {
        let _ = self.messages.send(message);
    }

    /// Send a message to the view's page; returns false once disposed
    pub fn post_message(&self, message: Value) -> bool {
        if self.is_disposed() {
            debug!("Dropping message for disposed view {}", self.view_id);
            return false;
        }
        self.sink.post_webview_message(&self.handle, message);
        true
    }
}
