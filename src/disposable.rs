//! Releasable resources handed out by registries
//!
//! Every registration (provider, command, view provider, listener) returns a
//! [`Disposable`]. Extensions push them into their context subscriptions and
//! the activation engine disposes them in order on deactivation.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::warn;

pub type DisposeError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait]
pub trait Disposable: Send + Sync {
    /// Release the resource. Calling this twice is harmless.
    async fn dispose(&self) -> Result<(), DisposeError>;
}

type Callback = Box<dyn FnOnce() -> Result<(), DisposeError> + Send>;

/// Runs a closure once on first dispose
pub struct CallbackDisposable {
    callback: Mutex<Option<Callback>>,
}

impl CallbackDisposable {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce() -> Result<(), DisposeError> + Send + 'static,
    {
        Self {
            callback: Mutex::new(Some(Box::new(callback))),
        }
    }
}

#[async_trait]
impl Disposable for CallbackDisposable {
    async fn dispose(&self) -> Result<(), DisposeError> {
        let callback = match self.callback.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match callback {
            Some(callback) => callback(),
            None => Ok(()),
        }
    }
}

/// Dispose every item in order, logging failures instead of stopping.
///
/// Returns how many disposers failed.
pub async fn dispose_all(owner: &str, items: Vec<Box<dyn Disposable>>) -> usize {
    let mut failures = 0;
    for (index, item) in items.into_iter().enumerate() {
        if let Err(e) = item.dispose().await {
            failures += 1;
            warn!("{}: disposing subscription #{} failed: {}", owner, index, e);
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_callback_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let disposable = CallbackDisposable::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        disposable.dispose().await.unwrap();
        disposable.dispose().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispose_all_continues_past_failures() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut items: Vec<Box<dyn Disposable>> = Vec::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            items.push(Box::new(CallbackDisposable::new(move || {
                order.lock().unwrap().push(i);
                if i == 1 { Err("boom".into()) } else { Ok(()) }
            })));
        }

        assert_eq!(dispose_all("test.ext", items).await, 1);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
