//! Command registry
//!
//! Commands are identified by string ids and receive positional JSON
//! arguments. Lookup misses are reported as [`CommandError::NotFound`]; the
//! host layers just-in-time activation on top of that.

use crate::disposable::{Disposable, DisposeError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{debug, error};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Command already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("Command '{command}' failed: {message}")]
    Failed { command: String, message: String },

    #[error("Command '{0}' panicked")]
    Panicked(String),
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, args: Vec<Value>) -> Result<Value, CommandError>;
}

struct FnCommand<F>(F);

#[async_trait]
impl<F, Fut> CommandHandler for FnCommand<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, CommandError>> + Send + 'static,
{
    async fn execute(&self, args: Vec<Value>) -> Result<Value, CommandError> {
        (self.0)(args).await
    }
}

/// Adapt an async closure into a [`CommandHandler`]
pub fn command_fn<F, Fut>(callback: F) -> Arc<dyn CommandHandler>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CommandError>> + Send + 'static,
{
    Arc::new(FnCommand(callback))
}

struct Entry {
    generation: u64,
    handler: Arc<dyn CommandHandler>,
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, Entry>>,
    next_generation: AtomicU64,
}

impl CommandRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register(
        self: &Arc<Self>,
        id: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<Box<dyn Disposable>, CommandError> {
        let mut commands = self.commands.write().await;
        if commands.contains_key(id) {
            return Err(CommandError::AlreadyRegistered(id.to_string()));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        commands.insert(id.to_string(), Entry { generation, handler });
        debug!("Registered command {}", id);

        Ok(Box::new(CommandRegistration {
            registry: Arc::downgrade(self),
            id: id.to_string(),
            generation,
        }))
    }

    pub async fn unregister(&self, id: &str) -> bool {
        let removed = self.commands.write().await.remove(id).is_some();
        if removed {
            debug!("Unregistered command {}", id);
        }
        removed
    }

    async fn unregister_generation(&self, id: &str, generation: u64) {
        let mut commands = self.commands.write().await;
        if commands.get(id).is_some_and(|entry| entry.generation == generation) {
            commands.remove(id);
            debug!("Unregistered command {}", id);
        }
    }

    pub async fn has(&self, id: &str) -> bool {
        self.commands.read().await.contains_key(id)
    }

    /// Registered ids, sorted
    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.commands.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run a command on its own task; a panicking handler becomes an error
    pub async fn execute(&self, id: &str, args: Vec<Value>) -> Result<Value, CommandError> {
        let handler = self
            .commands
            .read()
            .await
            .get(id)
            .map(|entry| Arc::clone(&entry.handler))
            .ok_or_else(|| CommandError::NotFound(id.to_string()))?;

        debug!("Executing command {} with {} argument(s)", id, args.len());
        match tokio::spawn(async move { handler.execute(args).await }).await {
            Ok(result) => result,
            Err(join_error) => {
                error!("Command {} panicked: {}", id, join_error);
                Err(CommandError::Panicked(id.to_string()))
            }
        }
    }
}

struct CommandRegistration {
    registry: Weak<CommandRegistry>,
    id: String,
    generation: u64,
}

#[async_trait]
impl Disposable for CommandRegistration {
    async fn dispose(&self) -> Result<(), DisposeError> {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister_generation(&self.id, self.generation).await;
        }
        Ok(())
    }
}
