//! High-level email client: encrypted provider configuration, OAuth tokens and
//! delivery behind one type.

use std::sync::Arc;

use outbox_auth::{send_scopes, DeviceCodeTokenProvider, OAuthHttp};
use outbox_core::{
    auth::LogPrompt, AccessToken, Backend, ConfigDocument, ConfigRepository, DeliveryResult,
    DeviceCodePrompt, KeyPolicy, Message, OutboxError, ProviderConfig, ProviderKind,
    TokenProvider,
};
use outbox_storage::{KeyProvider, PassphraseSource, SecureConfigStore};
use outbox_transport::TransportDispatcher;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Sends mail through one backend using credentials kept in an encrypted store.
pub struct EmailClient<P: KeyProvider + 'static> {
    store: Arc<SecureConfigStore<P>>,
    policy: KeyPolicy,
    dispatcher: TransportDispatcher,
    backend: Backend,
    smtp_provider: Option<ProviderKind>,
    prompt: Arc<dyn DeviceCodePrompt>,
    interactive: bool,
    cancel: CancellationToken,
    http: Option<Arc<dyn OAuthHttp>>,
}

impl<P: KeyProvider + 'static> EmailClient<P> {
    /// Defaults to the dry-run backend so nothing is sent until a backend is chosen.
    pub fn new(
        store: Arc<SecureConfigStore<P>>,
        policy: KeyPolicy,
        dispatcher: TransportDispatcher,
    ) -> Self {
        Self {
            store,
            policy,
            dispatcher,
            backend: Backend::DryRun,
            smtp_provider: None,
            prompt: Arc::new(LogPrompt),
            interactive: true,
            cancel: CancellationToken::new(),
            http: None,
        }
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn DeviceCodePrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// When false, sends fail with `ReauthorizationRequired` instead of starting a device flow.
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Which account authenticates SMTP when more than one is configured.
    pub fn with_smtp_provider(mut self, provider: ProviderKind) -> Self {
        self.smtp_provider = Some(provider);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_http(mut self, http: Arc<dyn OAuthHttp>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn policy(&self) -> KeyPolicy {
        self.policy
    }

    fn repository(&self) -> Arc<dyn ConfigRepository> {
        Arc::new(self.store.bind(self.policy))
    }

    /// Stored document, or an empty one when nothing was configured yet.
    pub async fn load_config(&self) -> Result<ConfigDocument, OutboxError> {
        self.repository().load_or_default().await
    }

    /// Add or update a provider. Cached tokens survive only if the client id is unchanged.
    #[instrument(skip_all, fields(provider = %config.kind()))]
    pub async fn configure(&self, config: ProviderConfig) -> Result<ConfigDocument, OutboxError> {
        let repository = self.repository();
        let mut document = repository.load_or_default().await?;
        let merged = match document.get(config.kind()) {
            Some(existing) => existing.merged_with(config),
            None => config,
        };
        document.upsert(merged);
        repository.save(&document).await?;
        info!("provider configuration saved");
        Ok(document)
    }

    /// Remove a provider and its cached tokens.
    pub async fn remove_provider(&self, kind: ProviderKind) -> Result<bool, OutboxError> {
        let repository = self.repository();
        let mut document = repository.load_or_default().await?;
        let removed = document.remove(kind).is_some();
        if removed {
            repository.save(&document).await?;
        }
        Ok(removed)
    }

    /// Provider whose account the backend sends as; `None` for dry runs.
    fn provider_for_backend(&self, document: &ConfigDocument) -> Result<Option<ProviderKind>, OutboxError> {
        let kind = match self.backend {
            Backend::DryRun => return Ok(None),
            Backend::MsGraph | Backend::GoogleApi => self.backend.required_provider(),
            Backend::Smtp => self
                .smtp_provider
                .or_else(|| document.providers().first().map(ProviderConfig::kind)),
        };
        let kind = kind.unwrap_or(ProviderKind::Microsoft);
        if document.get(kind).is_none() {
            return Err(OutboxError::ProviderNotConfigured { provider: kind });
        }
        Ok(Some(kind))
    }

    /// Device-code token provider for `kind`, scoped for the current backend.
    pub async fn token_provider(&self, kind: ProviderKind) -> Result<DeviceCodeTokenProvider, OutboxError> {
        let document = self.load_config().await?;
        self.build_token_provider(&document, kind, self.interactive)
    }

    fn build_token_provider(
        &self,
        document: &ConfigDocument,
        kind: ProviderKind,
        interactive: bool,
    ) -> Result<DeviceCodeTokenProvider, OutboxError> {
        let config = document
            .get(kind)
            .cloned()
            .ok_or(OutboxError::ProviderNotConfigured { provider: kind })?;
        let scopes = send_scopes(kind, self.backend == Backend::Smtp);

        let mut provider = DeviceCodeTokenProvider::new(config, scopes, self.repository())
            .with_prompt(Arc::clone(&self.prompt))
            .with_interactive(interactive)
            .with_cancellation(self.cancel.clone());
        if let Some(http) = &self.http {
            provider = provider.with_http(Arc::clone(http));
        }
        Ok(provider)
    }

    /// Make sure the backend's account holds a usable token, authorizing if needed.
    /// Dry runs need no credentials and return `None`.
    #[instrument(skip_all, fields(backend = %self.backend))]
    pub async fn device_code(&self) -> Result<Option<AccessToken>, OutboxError> {
        let document = self.load_config().await?;
        let Some(kind) = self.provider_for_backend(&document)? else {
            warn!("dry-run backend needs no authorization");
            return Ok(None);
        };
        let provider = self.build_token_provider(&document, kind, true)?;
        provider.access_token().await.map(Some)
    }

    /// Send `message` through the configured backend.
    ///
    /// An empty `from` is filled with the sending account's address.
    #[instrument(skip_all, fields(backend = %self.backend))]
    pub async fn send(&self, mut message: Message) -> Result<DeliveryResult, OutboxError> {
        let document = self.load_config().await?;
        let kind = self.provider_for_backend(&document)?;

        if message.from.trim().is_empty() {
            let sender = match kind {
                Some(kind) => document.get(kind),
                None => document.providers().first(),
            };
            message.from = sender
                .map(|config| config.email_address().to_string())
                .filter(|address| !address.is_empty())
                .ok_or_else(|| OutboxError::InvalidMessage {
                    reason: "no sender address; set one or configure a provider".to_string(),
                })?;
        }
        if !message.has_recipients() {
            return Err(OutboxError::InvalidMessage {
                reason: "at least one recipient is required".to_string(),
            });
        }

        match kind {
            None => self.dispatcher.dispatch(self.backend, &message, None).await,
            Some(kind) => {
                let provider = self.build_token_provider(&document, kind, self.interactive)?;
                self.dispatcher
                    .dispatch(self.backend, &message, Some(&provider as &dyn TokenProvider))
                    .await
            }
        }
    }

    /// Re-encrypt the stored configuration under `new_policy`. The client uses the
    /// new policy afterwards; on failure nothing changes.
    pub async fn rekey(
        &mut self,
        new_policy: KeyPolicy,
        passphrase: Option<&dyn PassphraseSource>,
    ) -> Result<(), OutboxError> {
        new_policy.validate()?;
        self.store.rekey(&self.policy, &new_policy, passphrase).await?;
        self.policy = new_policy;
        Ok(())
    }
}
