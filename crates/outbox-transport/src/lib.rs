//! Delivery backends and the dispatcher that picks one per send.

pub mod dispatcher;
pub mod dry_run;
pub mod gmail;
pub mod graph;
pub mod render;
pub mod smtp;

use outbox_core::{Backend, OutboxError, TokenProvider};

pub use dispatcher::{DispatcherSettings, TransportDispatcher};
pub use dry_run::DryRunTransport;
pub use gmail::GmailTransport;
pub use graph::GraphTransport;
pub use smtp::{SmtpSecurity, SmtpSettings, SmtpTransport};

pub(crate) const USER_AGENT_VALUE: &str = concat!("outbox/", env!("CARGO_PKG_VERSION"));

/// Credentials a backend cannot work without, with the provider it needs.
pub(crate) fn require_credentials<'a>(
    backend: Backend,
    credentials: Option<&'a dyn TokenProvider>,
) -> Result<&'a dyn TokenProvider, OutboxError> {
    let expected = || match backend.required_provider() {
        Some(kind) => kind.to_string(),
        None => "OAuth".to_string(),
    };
    let credentials = credentials.ok_or_else(|| OutboxError::MissingCredentials {
        backend,
        expected: expected(),
    })?;
    if let Some(kind) = backend.required_provider() {
        if credentials.provider() != kind {
            return Err(OutboxError::MissingCredentials {
                backend,
                expected: expected(),
            });
        }
    }
    Ok(credentials)
}
