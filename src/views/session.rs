//! Resolution, caching and teardown of webview view sessions

use super::webview::{WebviewOptions, WebviewView};
use crate::disposable::{Disposable, DisposeError};
use crate::host::HostSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OnceCell, RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 64;

pub type ResolveError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No view provider registered for '{0}'")]
    NoProvider(String),

    #[error("A view provider is already registered for '{0}'")]
    ProviderExists(String),

    #[error("Unknown view handle: {0}")]
    UnknownHandle(String),

    #[error("Resolving view '{view_id}' failed: {message}")]
    ResolveFailed { view_id: String, message: String },

    #[error("View provider for '{0}' panicked")]
    Panicked(String),

    #[error("Resolving view '{0}' was cancelled")]
    Cancelled(String),

    #[error("View '{0}' was disposed while resolving")]
    Disposed(String),
}

/// Fills in a [`WebviewView`] when the shell first shows it
#[async_trait]
pub trait WebviewViewProvider: Send + Sync {
    async fn resolve(&self, view: Arc<WebviewView>, token: CancellationToken) -> Result<(), ResolveError>;
}

/// Cached outcome of a successful resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedView {
    pub handle: String,
    pub view_id: String,
    pub html: String,
    pub options: WebviewOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    Resolved { handle: String, view_id: String },
    VisibilityChanged { handle: String, visible: bool },
    Disposed { handle: String, view_id: String },
}

struct ProviderEntry {
    generation: u64,
    provider: Arc<dyn WebviewViewProvider>,
}

pub struct SessionManager {
    sink: Arc<dyn HostSink>,
    providers: RwLock<HashMap<String, ProviderEntry>>,
    next_generation: AtomicU64,
    /// viewId to handle; survives re-resolution, cleared on dispose
    handles: Mutex<HashMap<String, String>>,
    sessions: RwLock<HashMap<String, Arc<WebviewView>>>,
    resolved: RwLock<HashMap<String, ResolvedView>>,
    in_flight: Mutex<HashMap<String, Arc<OnceCell<ResolvedView>>>>,
    events: broadcast::Sender<ViewEvent>,
}

impl SessionManager {
    pub fn new(sink: Arc<dyn HostSink>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            sink,
            providers: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            handles: Mutex::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            resolved: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ViewEvent) {
        let _ = self.events.send(event);
    }

    pub async fn register_provider(
        self: &Arc<Self>,
        view_id: &str,
        provider: Arc<dyn WebviewViewProvider>,
    ) -> Result<Box<dyn Disposable>, SessionError> {
        let mut providers = self.providers.write().await;
        if providers.contains_key(view_id) {
            return Err(SessionError::ProviderExists(view_id.to_string()));
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        providers.insert(view_id.to_string(), ProviderEntry { generation, provider });
        debug!("Registered view provider for {}", view_id);

        Ok(Box::new(ViewProviderRegistration {
            manager: Arc::downgrade(self),
            view_id: view_id.to_string(),
            generation,
        }))
    }

    pub async fn has_provider(&self, view_id: &str) -> bool {
        self.providers.read().await.contains_key(view_id)
    }

    async fn unregister_provider(&self, view_id: &str, generation: u64) {
        let mut providers = self.providers.write().await;
        if providers.get(view_id).is_some_and(|entry| entry.generation == generation) {
            providers.remove(view_id);
            drop(providers);
            // The next resolve must reach whichever provider replaces this one
            self.resolved.write().await.remove(view_id);
            debug!("Unregistered view provider for {}", view_id);
        }
    }

    /// Resolve `view_id`, reusing a cached or in-flight resolution.
    ///
    /// Concurrent callers for the same view share one provider invocation.
    pub async fn resolve(&self, view_id: &str, token: CancellationToken) -> Result<ResolvedView, SessionError> {
        if let Some(cached) = self.cached(view_id).await {
            return Ok(cached);
        }
        self.resolve_shared(view_id, token).await
    }

    async fn cached(&self, view_id: &str) -> Option<ResolvedView> {
        self.resolved.read().await.get(view_id).cloned()
    }

    /// Join or start the in-flight resolution for `view_id`.
    ///
    /// A resolution may have finished since the caller missed the cache, so
    /// the cache is consulted again before the provider runs.
    async fn resolve_shared(&self, view_id: &str, token: CancellationToken) -> Result<ResolvedView, SessionError> {
        let cell = Arc::clone(
            self.in_flight
                .lock()
                .await
                .entry(view_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        let result = cell
            .get_or_try_init(|| async move {
                match self.cached(view_id).await {
                    Some(cached) => Ok(cached),
                    None => self.resolve_uncached(view_id, token).await,
                }
            })
            .await
            .cloned();

        let mut in_flight = self.in_flight.lock().await;
        if in_flight.get(view_id).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            in_flight.remove(view_id);
        }

        result
    }

    async fn resolve_uncached(&self, view_id: &str, token: CancellationToken) -> Result<ResolvedView, SessionError> {
        let provider = self
            .providers
            .read()
            .await
            .get(view_id)
            .map(|entry| Arc::clone(&entry.provider))
            .ok_or_else(|| SessionError::NoProvider(view_id.to_string()))?;

        let handle = self
            .handles
            .lock()
            .await
            .entry(view_id.to_string())
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone();

        let view = Arc::new(WebviewView::new(
            handle.clone(),
            view_id.to_string(),
            Arc::clone(&self.sink),
        ));
        if let Some(previous) = self
            .sessions
            .write()
            .await
            .insert(handle.clone(), Arc::clone(&view))
        {
            previous.mark_disposed();
        }

        debug!("Resolving view {} as {}", view_id, handle);
        let outcome = {
            let view = Arc::clone(&view);
            let token = token.clone();
            tokio::spawn(async move { provider.resolve(view, token).await }).await
        };

        let failure = match outcome {
            Ok(Ok(())) if token.is_cancelled() => Some(SessionError::Cancelled(view_id.to_string())),
            Ok(Ok(())) if view.is_disposed() => Some(SessionError::Disposed(view_id.to_string())),
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(SessionError::ResolveFailed {
                view_id: view_id.to_string(),
                message: e.to_string(),
            }),
            Err(join_error) => {
                error!("View provider for {} panicked: {}", view_id, join_error);
                Some(SessionError::Panicked(view_id.to_string()))
            }
        };

        if let Some(failure) = failure {
            let mut sessions = self.sessions.write().await;
            if sessions.get(&handle).is_some_and(|current| Arc::ptr_eq(current, &view)) {
                sessions.remove(&handle);
            }
            return Err(failure);
        }

        let resolved = ResolvedView {
            handle: handle.clone(),
            view_id: view_id.to_string(),
            html: view.html(),
            options: view.options(),
            title: view.title(),
        };
        self.resolved
            .write()
            .await
            .insert(view_id.to_string(), resolved.clone());
        self.emit(ViewEvent::Resolved {
            handle,
            view_id: view_id.to_string(),
        });
        Ok(resolved)
    }

    pub async fn session(&self, handle: &str) -> Option<Arc<WebviewView>> {
        self.sessions.read().await.get(handle).cloned()
    }

    pub async fn handle_for(&self, view_id: &str) -> Option<String> {
        self.handles.lock().await.get(view_id).cloned()
    }

    async fn require(&self, handle: &str) -> Result<Arc<WebviewView>, SessionError> {
        self.session(handle)
            .await
            .ok_or_else(|| SessionError::UnknownHandle(handle.to_string()))
    }

    /// Route a message from the shell to the view's listeners
    pub async fn deliver_message(&self, handle: &str, message: Value) -> Result<(), SessionError> {
        self.require(handle).await?.deliver(message);
        Ok(())
    }

    /// Send a message to the view's page
    pub async fn post_message(&self, handle: &str, message: Value) -> Result<bool, SessionError> {
        Ok(self.require(handle).await?.post_message(message))
    }

    pub async fn set_visible(&self, handle: &str, visible: bool) -> Result<(), SessionError> {
        let view = self.require(handle).await?;
        if view.is_visible() != visible {
            view.set_visible(visible);
            self.emit(ViewEvent::VisibilityChanged {
                handle: handle.to_string(),
                visible,
            });
        }
        Ok(())
    }

    /// Tear down the session behind `handle`. Returns false for unknown handles.
    pub async fn dispose(&self, handle: &str) -> bool {
        let Some(view) = self.sessions.write().await.remove(handle) else {
            return false;
        };
        view.mark_disposed();

        let view_id = view.view_id().to_string();
        self.handles.lock().await.remove(&view_id);
        self.resolved.write().await.remove(&view_id);
        self.in_flight.lock().await.remove(&view_id);

        debug!("Disposed view {} ({})", view_id, handle);
        self.emit(ViewEvent::Disposed {
            handle: handle.to_string(),
            view_id,
        });
        true
    }

    /// Dispose every live session
    pub async fn dispose_all(&self) {
        let handles: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for handle in handles {
            self.dispose(&handle).await;
        }
    }
}

struct ViewProviderRegistration {
    manager: Weak<SessionManager>,
    view_id: String,
    generation: u64,
}

#[async_trait]
impl Disposable for ViewProviderRegistration {
    async fn dispose(&self) -> Result<(), DisposeError> {
        if let Some(manager) = self.manager.upgrade() {
            manager.unregister_provider(&self.view_id, self.generation).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sink::{RecordingSink, SinkEvent};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingProvider {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingProvider {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl WebviewViewProvider for CountingProvider {
        async fn resolve(&self, view: Arc<WebviewView>, _token: CancellationToken) -> Result<(), ResolveError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            view.set_html(format!("<p>call {call}</p>"));
            view.set_options(WebviewOptions {
                enable_scripts: true,
                local_resource_roots: vec![],
            });
            Ok(())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl WebviewViewProvider for FailingProvider {
        async fn resolve(&self, _view: Arc<WebviewView>, _token: CancellationToken) -> Result<(), ResolveError> {
            Err("no backend".into())
        }
    }

    fn manager() -> (Arc<SessionManager>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        (SessionManager::new(sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_concurrent_resolve_invokes_provider_once() {
        let (manager, _sink) = manager();
        let provider = CountingProvider::new(Duration::from_millis(50));
        manager.register_provider("demo.view", provider.clone()).await.unwrap();

        let (first, second) = tokio::join!(
            manager.resolve("demo.view", CancellationToken::new()),
            manager.resolve("demo.view", CancellationToken::new()),
        );

        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(first.html, "<p>call 1</p>");
        assert!(first.options.enable_scripts);
    }

    #[tokio::test]
    async fn test_cached_resolution_is_reused() {
        let (manager, _sink) = manager();
        let provider = CountingProvider::new(Duration::ZERO);
        manager.register_provider("demo.view", provider.clone()).await.unwrap();

        let first = manager.resolve("demo.view", CancellationToken::new()).await.unwrap();
        let second = manager.resolve("demo.view", CancellationToken::new()).await.unwrap();
        assert_eq!(first.handle, second.handle);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_late_joiner_reuses_finished_resolution() {
        let (manager, _sink) = manager();
        let provider = CountingProvider::new(Duration::ZERO);
        manager.register_provider("demo.view", provider.clone()).await.unwrap();

        let first = manager.resolve("demo.view", CancellationToken::new()).await.unwrap();
        let view = manager.session(&first.handle).await.unwrap();

        // A caller that missed the cache just before the first one finished
        let late = manager
            .resolve_shared("demo.view", CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(late, first);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        let live = manager.session(&first.handle).await.unwrap();
        assert!(Arc::ptr_eq(&live, &view));
        assert!(!view.is_disposed());
    }

    #[tokio::test]
    async fn test_dispose_clears_cache_and_handle() {
        let (manager, _sink) = manager();
        let provider = CountingProvider::new(Duration::ZERO);
        manager.register_provider("demo.view", provider.clone()).await.unwrap();
        let mut events = manager.subscribe();

        let first = manager.resolve("demo.view", CancellationToken::new()).await.unwrap();
        let view = manager.session(&first.handle).await.unwrap();

        assert!(manager.dispose(&first.handle).await);
        assert!(view.is_disposed());
        assert!(!view.post_message(json!("late")));
        assert!(!manager.dispose(&first.handle).await);
        assert_eq!(manager.handle_for("demo.view").await, None);

        let mut saw_disposed = false;
        while let Ok(event) = events.try_recv() {
            if event
                == (ViewEvent::Disposed {
                    handle: first.handle.clone(),
                    view_id: "demo.view".into(),
                })
            {
                saw_disposed = true;
            }
        }
        assert!(saw_disposed);

        let second = manager.resolve("demo.view", CancellationToken::new()).await.unwrap();
        assert_ne!(first.handle, second.handle);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handle_stable_across_provider_replacement() {
        let (manager, _sink) = manager();
        let registration = manager
            .register_provider("demo.view", CountingProvider::new(Duration::ZERO))
            .await
            .unwrap();
        let first = manager.resolve("demo.view", CancellationToken::new()).await.unwrap();

        registration.dispose().await.unwrap();
        assert!(!manager.has_provider("demo.view").await);
        assert!(matches!(
            manager.resolve("demo.view", CancellationToken::new()).await,
            Err(SessionError::NoProvider(_))
        ));

        manager
            .register_provider("demo.view", CountingProvider::new(Duration::ZERO))
            .await
            .unwrap();
        let second = manager.resolve("demo.view", CancellationToken::new()).await.unwrap();
        assert_eq!(first.handle, second.handle);
    }

    #[tokio::test]
    async fn test_failed_resolution_is_retried() {
        let (manager, _sink) = manager();
        let registration = manager
            .register_provider("demo.view", Arc::new(FailingProvider))
            .await
            .unwrap();

        assert!(matches!(
            manager.resolve("demo.view", CancellationToken::new()).await,
            Err(SessionError::ResolveFailed { .. })
        ));

        registration.dispose().await.unwrap();
        let provider = CountingProvider::new(Duration::ZERO);
        manager.register_provider("demo.view", provider.clone()).await.unwrap();
        assert!(manager.resolve("demo.view", CancellationToken::new()).await.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_messages_are_correlated_by_handle() {
        let (manager, sink) = manager();
        manager
            .register_provider("demo.view", CountingProvider::new(Duration::ZERO))
            .await
            .unwrap();
        let resolved = manager.resolve("demo.view", CancellationToken::new()).await.unwrap();
        let view = manager.session(&resolved.handle).await.unwrap();

        let mut received = view.on_did_receive_message();
        manager
            .deliver_message(&resolved.handle, json!({"type": "ping"}))
            .await
            .unwrap();
        assert_eq!(received.recv().await.unwrap(), json!({"type": "ping"}));

        assert!(view.post_message(json!({"type": "pong"})));
        assert_eq!(
            sink.events(),
            vec![SinkEvent::WebviewMessage {
                handle: resolved.handle.clone(),
                message: json!({"type": "pong"}),
            }]
        );

        assert!(matches!(
            manager.deliver_message("missing", json!(null)).await,
            Err(SessionError::UnknownHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_visibility_changes() {
        let (manager, _sink) = manager();
        manager
            .register_provider("demo.view", CountingProvider::new(Duration::ZERO))
            .await
            .unwrap();
        let resolved = manager.resolve("demo.view", CancellationToken::new()).await.unwrap();
        let view = manager.session(&resolved.handle).await.unwrap();
        let visibility = view.on_did_change_visibility();

        manager.set_visible(&resolved.handle, false).await.unwrap();
        assert!(!view.is_visible());
        assert!(!*visibility.borrow());
    }

    #[tokio::test]
    async fn test_duplicate_provider_rejected() {
        let (manager, _sink) = manager();
        manager
            .register_provider("demo.view", CountingProvider::new(Duration::ZERO))
            .await
            .unwrap();
        assert!(matches!(
            manager
                .register_provider("demo.view", CountingProvider::new(Duration::ZERO))
                .await,
            Err(SessionError::ProviderExists(_))
        ));
    }
}
