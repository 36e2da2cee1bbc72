use std::{fmt, path::PathBuf, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{auth::TokenProvider, config::ProviderKind, error::OutboxError, message::Message};

/// Delivery backend, resolved once per send.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    MsGraph,
    GoogleApi,
    Smtp,
    DryRun,
}

impl Backend {
    pub const ALL: [Backend; 4] = [
        Backend::MsGraph,
        Backend::GoogleApi,
        Backend::Smtp,
        Backend::DryRun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::MsGraph => "ms_graph",
            Backend::GoogleApi => "google_api",
            Backend::Smtp => "smtp",
            Backend::DryRun => "dry_run",
        }
    }

    /// Provider whose tokens the backend needs; `None` when any provider works
    /// (SMTP) or none is needed (dry-run). Use [`Backend::needs_credentials`]
    /// to tell those apart.
    pub fn required_provider(&self) -> Option<ProviderKind> {
        match self {
            Backend::MsGraph => Some(ProviderKind::Microsoft),
            Backend::GoogleApi => Some(ProviderKind::Google),
            Backend::Smtp | Backend::DryRun => None,
        }
    }

    pub fn needs_credentials(&self) -> bool {
        !matches!(self, Backend::DryRun)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "ms_graph" | "graph" => Ok(Backend::MsGraph),
            "google_api" | "google" | "gmail" => Ok(Backend::GoogleApi),
            "smtp" => Ok(Backend::Smtp),
            "dry_run" => Ok(Backend::DryRun),
            _ => Err(OutboxError::UnknownBackend(s.to_string())),
        }
    }
}

/// Successful hand-off of a message to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub backend: Backend,
    /// Provider message id, when the provider returns one.
    pub message_id: Option<String>,
    /// Where the dry-run transport wrote the message.
    pub location: Option<PathBuf>,
}

impl DeliveryResult {
    pub fn accepted(backend: Backend) -> Self {
        Self {
            backend,
            message_id: None,
            location: None,
        }
    }
}

/// Contract shared by every delivery mechanism.
#[async_trait]
pub trait Transport: Send + Sync {
    fn backend(&self) -> Backend;

    /// Deliver `message`, obtaining credentials from `credentials` when the
    /// backend needs them. Failures are reported, never retried.
    async fn deliver(
        &self,
        message: &Message,
        credentials: Option<&dyn TokenProvider>,
    ) -> Result<DeliveryResult, OutboxError>;
}
