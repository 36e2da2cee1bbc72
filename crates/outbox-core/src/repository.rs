use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{config::ConfigDocument, error::OutboxError};

/// Persistence contract token providers use to cache credentials.
///
/// Implementations bind a store to a key policy, so callers never choose how
/// the document is protected.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Load the document; `ConfigNotFound` when nothing was saved yet.
    async fn load(&self) -> Result<ConfigDocument, OutboxError>;

    /// Replace the persisted document.
    async fn save(&self, document: &ConfigDocument) -> Result<(), OutboxError>;

    /// Load, or start from an empty document when none exists yet.
    async fn load_or_default(&self) -> Result<ConfigDocument, OutboxError> {
        match self.load().await {
            Ok(document) => Ok(document),
            Err(OutboxError::ConfigNotFound { .. }) => Ok(ConfigDocument::default()),
            Err(err) => Err(err),
        }
    }
}

/// Unencrypted in-memory repository for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct InMemoryConfigRepository {
    inner: Arc<Mutex<Option<ConfigDocument>>>,
}

impl InMemoryConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: ConfigDocument) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(document))),
        }
    }

    /// Snapshot of the last saved document.
    pub fn snapshot(&self) -> Option<ConfigDocument> {
        self.inner.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl ConfigRepository for InMemoryConfigRepository {
    async fn load(&self) -> Result<ConfigDocument, OutboxError> {
        let guard = self
            .inner
            .lock()
            .map_err(|err| OutboxError::storage(format!("lock poisoned: {err}")))?;
        guard.clone().ok_or_else(|| OutboxError::ConfigNotFound {
            path: "<memory>".to_string(),
        })
    }

    async fn save(&self, document: &ConfigDocument) -> Result<(), OutboxError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| OutboxError::storage(format!("lock poisoned: {err}")))?;
        *guard = Some(document.clone());
        Ok(())
    }
}
