use thiserror::Error;

use crate::{config::ProviderKind, transport::Backend};

/// Errors surfaced by every outbox crate.
///
/// Messages are meant to be shown to users as-is, so they describe what to do
/// next and never embed key material, passphrases, tokens or plaintext.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutboxError {
    /// The key policy leaves no way to encrypt the configuration.
    #[error("invalid key policy: {reason}")]
    InvalidPolicy { reason: String },
    /// Neither the keyring nor a passphrase-derived key could be used.
    #[error("secure storage unavailable: {reason}")]
    SecureStorageUnavailable { reason: String },
    /// Wrong key/passphrase or a corrupted document.
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },
    #[error("no configuration found at {path}")]
    ConfigNotFound { path: String },
    #[error("unsupported document version {found} (this build reads version {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("{provider} needs to be authorized again: {reason}")]
    ReauthorizationRequired { provider: ProviderKind, reason: String },
    #[error("the {provider} device code expired before authorization completed; start a new sign-in")]
    DeviceCodeExpired { provider: ProviderKind },
    #[error("the {provider} sign-in request was denied")]
    AuthorizationDenied { provider: ProviderKind },
    /// Non-retryable OAuth error other than a denial.
    #[error("{provider} authorization failed ({code}){}", fmt_detail(.description))]
    AuthorizationFailed {
        provider: ProviderKind,
        code: String,
        description: Option<String>,
    },
    #[error("{backend} delivery failed: {message}")]
    TransportDeliveryFailed {
        backend: Backend,
        /// HTTP status or SMTP reply code when the provider returned one.
        status: Option<u16>,
        /// Provider-specific error code.
        code: Option<String>,
        message: String,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error("{provider} is not configured; add its client id first")]
    ProviderNotConfigured { provider: ProviderKind },
    #[error("backend {backend} needs {expected} credentials")]
    MissingCredentials { backend: Backend, expected: String },
    #[error("invalid message: {reason}")]
    InvalidMessage { reason: String },
    #[error("unknown backend: {0} (expected ms_graph, google_api, smtp or dry_run)")]
    UnknownBackend(String),
    #[error("invalid profile name {0:?}: use letters, digits, '-' or '_'")]
    InvalidProfile(String),
    #[error("http failure: {reason}")]
    Http { reason: String },
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

fn fmt_detail(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(": {d}"))
        .unwrap_or_default()
}

impl OutboxError {
    pub fn storage<E: ToString>(err: E) -> Self {
        OutboxError::Storage {
            reason: err.to_string(),
        }
    }

    pub fn http<E: ToString>(err: E) -> Self {
        OutboxError::Http {
            reason: err.to_string(),
        }
    }

    pub fn decryption(reason: impl Into<String>) -> Self {
        OutboxError::DecryptionFailed {
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        OutboxError::SecureStorageUnavailable {
            reason: reason.into(),
        }
    }
}
