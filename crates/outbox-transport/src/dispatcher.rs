use std::{collections::HashMap, path::PathBuf, sync::Arc};

use outbox_core::{Backend, DeliveryResult, Message, OutboxError, TokenProvider, Transport};
use tracing::{info, instrument};

use crate::{
    dry_run::DryRunTransport, gmail::GmailTransport, graph::GraphTransport,
    require_credentials, smtp::SmtpSettings, smtp::SmtpTransport,
};

/// Construction inputs for the default transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherSettings {
    pub dry_run_dir: PathBuf,
    /// SMTP host override; provider defaults otherwise.
    pub smtp: Option<SmtpSettings>,
    pub graph_base_url: Option<String>,
    pub gmail_base_url: Option<String>,
}

impl DispatcherSettings {
    pub fn new(dry_run_dir: impl Into<PathBuf>) -> Self {
        Self {
            dry_run_dir: dry_run_dir.into(),
            smtp: None,
            graph_base_url: None,
            gmail_base_url: None,
        }
    }
}

/// Routes a message to the transport for the selected backend.
pub struct TransportDispatcher {
    transports: HashMap<Backend, Arc<dyn Transport>>,
}

impl TransportDispatcher {
    pub fn new(settings: DispatcherSettings) -> Self {
        let graph = settings
            .graph_base_url
            .map(GraphTransport::new)
            .unwrap_or_default();
        let gmail = settings
            .gmail_base_url
            .map(GmailTransport::new)
            .unwrap_or_default();

        let transports: [Arc<dyn Transport>; 4] = [
            Arc::new(graph),
            Arc::new(gmail),
            Arc::new(SmtpTransport::new(settings.smtp)),
            Arc::new(DryRunTransport::new(settings.dry_run_dir)),
        ];
        Self {
            transports: transports.into_iter().map(|t| (t.backend(), t)).collect(),
        }
    }

    /// Replace the transport for its backend (fakes in tests, custom relays).
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(transport.backend(), transport);
        self
    }

    /// Deliver through `backend`. Credentials are checked against the backend
    /// before anything is sent; dry runs ignore them.
    #[instrument(skip_all, fields(%backend))]
    pub async fn dispatch(
        &self,
        backend: Backend,
        message: &Message,
        credentials: Option<&dyn TokenProvider>,
    ) -> Result<DeliveryResult, OutboxError> {
        if !message.has_recipients() {
            return Err(OutboxError::InvalidMessage {
                reason: "at least one recipient is required".to_string(),
            });
        }
        if message.from.trim().is_empty() {
            return Err(OutboxError::InvalidMessage {
                reason: "the sender address is empty".to_string(),
            });
        }

        let credentials = if backend.needs_credentials() {
            Some(require_credentials(backend, credentials)?)
        } else {
            None
        };

        let transport = self
            .transports
            .get(&backend)
            .ok_or_else(|| OutboxError::UnknownBackend(backend.to_string()))?;
        let result = transport.deliver(message, credentials).await?;
        info!(message_id = ?result.message_id, "message handed off");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use outbox_core::{auth::StaticTokenProvider, AccessToken, ProviderKind};

    use super::*;

    /// Records what it was asked to deliver.
    struct RecordingTransport {
        backend: Backend,
        seen: Mutex<Vec<(String, Option<String>)>>,
    }

    impl RecordingTransport {
        fn new(backend: Backend) -> Arc<Self> {
            Arc::new(Self {
                backend,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn backend(&self) -> Backend {
            self.backend
        }

        async fn deliver(
            &self,
            message: &Message,
            credentials: Option<&dyn TokenProvider>,
        ) -> Result<DeliveryResult, OutboxError> {
            let token = match credentials {
                Some(provider) => Some(provider.access_token().await?.secret().to_string()),
                None => None,
            };
            self.seen
                .lock()
                .expect("lock")
                .push((message.subject.clone(), token));
            Ok(DeliveryResult::accepted(self.backend))
        }
    }

    fn token_provider(kind: ProviderKind) -> StaticTokenProvider {
        StaticTokenProvider::new(
            kind,
            "me@example.com",
            AccessToken::new("tok", Utc::now() + Duration::hours(1)),
        )
    }

    fn message() -> Message {
        Message::new("Hello").sender("me@example.com").to("you@example.com").text("hi")
    }

    fn dispatcher_with(recorder: &Arc<RecordingTransport>) -> TransportDispatcher {
        let dir = std::env::temp_dir().join("outbox-dispatcher-unused");
        TransportDispatcher::new(DispatcherSettings::new(dir))
            .with_transport(Arc::clone(recorder) as Arc<dyn Transport>)
    }

    #[tokio::test]
    async fn graph_requires_microsoft_credentials() {
        let recorder = RecordingTransport::new(Backend::MsGraph);
        let dispatcher = dispatcher_with(&recorder);

        let err = dispatcher
            .dispatch(Backend::MsGraph, &message(), None)
            .await
            .expect_err("no credentials");
        assert_eq!(
            err,
            OutboxError::MissingCredentials {
                backend: Backend::MsGraph,
                expected: "microsoft".into()
            }
        );

        let google = token_provider(ProviderKind::Google);
        let err = dispatcher
            .dispatch(Backend::MsGraph, &message(), Some(&google))
            .await
            .expect_err("wrong provider");
        assert!(matches!(err, OutboxError::MissingCredentials { .. }));

        let microsoft = token_provider(ProviderKind::Microsoft);
        dispatcher
            .dispatch(Backend::MsGraph, &message(), Some(&microsoft))
            .await
            .expect("delivered");
        let seen = recorder.seen.lock().expect("lock").clone();
        assert_eq!(seen, vec![("Hello".to_string(), Some("tok".to_string()))]);
    }

    #[tokio::test]
    async fn gmail_requires_google_and_smtp_accepts_either() {
        let gmail = RecordingTransport::new(Backend::GoogleApi);
        let smtp = RecordingTransport::new(Backend::Smtp);
        let dispatcher = dispatcher_with(&gmail).with_transport(Arc::clone(&smtp) as Arc<dyn Transport>);
        let microsoft = token_provider(ProviderKind::Microsoft);
        let google = token_provider(ProviderKind::Google);

        assert!(dispatcher
            .dispatch(Backend::GoogleApi, &message(), Some(&microsoft))
            .await
            .is_err());
        dispatcher
            .dispatch(Backend::GoogleApi, &message(), Some(&google))
            .await
            .expect("gmail");
        dispatcher
            .dispatch(Backend::Smtp, &message(), Some(&microsoft))
            .await
            .expect("smtp via microsoft");
        dispatcher
            .dispatch(Backend::Smtp, &message(), Some(&google))
            .await
            .expect("smtp via google");
        assert!(matches!(
            dispatcher.dispatch(Backend::Smtp, &message(), None).await,
            Err(OutboxError::MissingCredentials { backend: Backend::Smtp, .. })
        ));
        assert_eq!(smtp.seen.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn dry_run_ignores_credentials_and_writes_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dispatcher = TransportDispatcher::new(DispatcherSettings::new(dir.path()));
        let microsoft = token_provider(ProviderKind::Microsoft);

        let without = dispatcher
            .dispatch(Backend::DryRun, &message(), None)
            .await
            .expect("dry run");
        let with = dispatcher
            .dispatch(Backend::DryRun, &message(), Some(&microsoft))
            .await
            .expect("dry run");
        assert_eq!(without.message_id, with.message_id);
        assert!(without.location.expect("path").exists());
    }

    #[tokio::test]
    async fn messages_without_recipients_or_sender_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dispatcher = TransportDispatcher::new(DispatcherSettings::new(dir.path()));

        let no_recipients = Message::new("x").sender("me@example.com");
        assert!(matches!(
            dispatcher.dispatch(Backend::DryRun, &no_recipients, None).await,
            Err(OutboxError::InvalidMessage { .. })
        ));
        let no_sender = Message::new("x").to("you@example.com");
        assert!(matches!(
            dispatcher.dispatch(Backend::DryRun, &no_sender, None).await,
            Err(OutboxError::InvalidMessage { .. })
        ));
        assert_eq!(std::fs::read_dir(dir.path()).expect("dir").count(), 0);
    }
}
