use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{config::ProviderKind, error::OutboxError};

/// Bearer token handed to transports. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of OAuth access tokens for one provider account.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    fn provider(&self) -> ProviderKind;

    /// Mailbox the tokens belong to (used as SMTP user and default sender).
    fn account(&self) -> String;

    /// Return a valid access token, refreshing or authorizing as needed.
    async fn access_token(&self) -> Result<AccessToken, OutboxError>;

    /// Exchange the cached refresh token for a new access token.
    async fn refresh(&self) -> Result<AccessToken, OutboxError>;
}

/// Device authorization details the user must act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorization {
    pub provider: ProviderKind,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    /// Provider-supplied instructions, when present.
    pub message: Option<String>,
    pub interval_secs: u64,
    pub expires_in_secs: u64,
}

impl DeviceAuthorization {
    pub fn instructions(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        match &self.verification_uri_complete {
            Some(uri) => format!("Visit {uri} to authorize this device."),
            None => format!(
                "Visit {} and enter code: {}",
                self.verification_uri, self.user_code
            ),
        }
    }
}

/// Surfaces device-code instructions to the user (terminal, GUI, log...).
pub trait DeviceCodePrompt: Send + Sync {
    fn show(&self, authorization: &DeviceAuthorization);
}

impl<F> DeviceCodePrompt for F
where
    F: Fn(&DeviceAuthorization) + Send + Sync,
{
    fn show(&self, authorization: &DeviceAuthorization) {
        self(authorization)
    }
}

/// Prompt that only records the instructions in the log.
pub struct LogPrompt;

impl DeviceCodePrompt for LogPrompt {
    fn show(&self, authorization: &DeviceAuthorization) {
        tracing::info!(provider = %authorization.provider, "{}", authorization.instructions());
    }
}

/// Fixed-token provider for tests and offline smoke runs.
pub struct StaticTokenProvider {
    provider: ProviderKind,
    account: String,
    token: AccessToken,
}

impl StaticTokenProvider {
    pub fn new(provider: ProviderKind, account: impl Into<String>, token: AccessToken) -> Self {
        Self {
            provider,
            account: account.into(),
            token,
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    fn account(&self) -> String {
        self.account.clone()
    }

    async fn access_token(&self) -> Result<AccessToken, OutboxError> {
        Ok(self.token.clone())
    }

    async fn refresh(&self) -> Result<AccessToken, OutboxError> {
        Ok(self.token.clone())
    }
}
