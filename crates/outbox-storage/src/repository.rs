use std::sync::Arc;

use async_trait::async_trait;
use outbox_core::{ConfigDocument, ConfigRepository, KeyPolicy, OutboxError};
use tracing::instrument;

use crate::{config_store::SecureConfigStore, key_provider::KeyProvider};

/// Configuration repository backed by a [`SecureConfigStore`] under a fixed key policy.
pub struct SecureConfigRepository<P: KeyProvider> {
    store: Arc<SecureConfigStore<P>>,
    policy: KeyPolicy,
}

impl<P: KeyProvider> SecureConfigRepository<P> {
    pub fn new(store: Arc<SecureConfigStore<P>>, policy: KeyPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> KeyPolicy {
        self.policy
    }

    pub fn store(&self) -> &SecureConfigStore<P> {
        &self.store
    }
}

#[async_trait]
impl<P: KeyProvider> ConfigRepository for SecureConfigRepository<P> {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<ConfigDocument, OutboxError> {
        self.store.load(&self.policy).await
    }

    #[instrument(skip_all)]
    async fn save(&self, document: &ConfigDocument) -> Result<(), OutboxError> {
        self.store.save(document, &self.policy).await
    }
}
