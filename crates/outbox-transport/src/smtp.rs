use async_trait::async_trait;
use lettre::{
    address::{Address, Envelope},
    message::Mailbox,
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        Error as SmtpError,
    },
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use outbox_core::{
    Backend, DeliveryResult, Message, OutboxError, ProviderKind, TokenProvider, Transport,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    render::{render, RenderOptions},
    require_credentials,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS (submission port 587).
    StartTls,
    /// TLS from the first byte (port 465).
    Tls,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
}

impl SmtpSettings {
    pub fn for_provider(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Microsoft => Self {
                host: "smtp.office365.com".to_string(),
                port: 587,
                security: SmtpSecurity::StartTls,
            },
            ProviderKind::Google => Self {
                host: "smtp.gmail.com".to_string(),
                port: 465,
                security: SmtpSecurity::Tls,
            },
        }
    }
}

/// SMTP submission authenticated with XOAUTH2. Basic auth is never offered.
#[derive(Debug, Clone, Default)]
pub struct SmtpTransport {
    /// Replaces the provider defaults when set.
    settings: Option<SmtpSettings>,
}

impl SmtpTransport {
    pub fn new(settings: Option<SmtpSettings>) -> Self {
        Self { settings }
    }

    pub fn settings_for(&self, kind: ProviderKind) -> SmtpSettings {
        self.settings
            .clone()
            .unwrap_or_else(|| SmtpSettings::for_provider(kind))
    }
}

fn parse_address(value: &str) -> Result<Address, OutboxError> {
    value
        .parse::<Mailbox>()
        .map(|mailbox| mailbox.email)
        .map_err(|e| OutboxError::InvalidMessage {
            reason: format!("invalid address {value:?}: {e}"),
        })
}

/// SMTP envelope: sender plus every to/cc/bcc recipient.
pub fn envelope(message: &Message) -> Result<Envelope, OutboxError> {
    let from = parse_address(&message.from)?;
    let recipients = message
        .recipients()
        .map(parse_address)
        .collect::<Result<Vec<_>, _>>()?;
    Envelope::new(Some(from), recipients).map_err(|e| OutboxError::InvalidMessage {
        reason: e.to_string(),
    })
}

fn delivery_failure(err: SmtpError) -> OutboxError {
    OutboxError::TransportDeliveryFailed {
        backend: Backend::Smtp,
        status: err.status().and_then(|code| code.to_string().parse().ok()),
        code: None,
        message: err.to_string(),
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn backend(&self) -> Backend {
        Backend::Smtp
    }

    #[instrument(skip_all, fields(backend = "smtp", recipients = message.recipients().count()))]
    async fn deliver(
        &self,
        message: &Message,
        credentials: Option<&dyn TokenProvider>,
    ) -> Result<DeliveryResult, OutboxError> {
        let raw = render(message, RenderOptions { include_bcc: false })?;
        let envelope = envelope(message)?;
        let credentials = require_credentials(Backend::Smtp, credentials)?;
        let settings = self.settings_for(credentials.provider());
        let token = credentials.access_token().await?;

        let builder = match settings.security {
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            }
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host),
        }
        .map_err(delivery_failure)?;

        let mailer = builder
            .port(settings.port)
            .credentials(Credentials::new(credentials.account(), token.secret().to_string()))
            .authentication(vec![Mechanism::Xoauth2])
            .build();

        let response = mailer
            .send_raw(&envelope, raw.as_bytes())
            .await
            .map_err(delivery_failure)?;

        let message_id = response.message().next().map(str::to_string);
        info!(host = %settings.host, code = %response.code(), "accepted by SMTP server");
        Ok(DeliveryResult {
            message_id,
            ..DeliveryResult::accepted(Backend::Smtp)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_defaults() {
        let ms = SmtpSettings::for_provider(ProviderKind::Microsoft);
        assert_eq!((ms.host.as_str(), ms.port, ms.security), ("smtp.office365.com", 587, SmtpSecurity::StartTls));
        let google = SmtpSettings::for_provider(ProviderKind::Google);
        assert_eq!((google.host.as_str(), google.port, google.security), ("smtp.gmail.com", 465, SmtpSecurity::Tls));
    }

    #[test]
    fn override_replaces_defaults() {
        let custom = SmtpSettings {
            host: "mail.internal".into(),
            port: 2525,
            security: SmtpSecurity::StartTls,
        };
        let transport = SmtpTransport::new(Some(custom.clone()));
        assert_eq!(transport.settings_for(ProviderKind::Google), custom);
        assert_eq!(
            SmtpTransport::default().settings_for(ProviderKind::Google).port,
            465
        );
    }

    #[test]
    fn envelope_includes_bcc_recipients() {
        let message = Message::new("Hi")
            .sender("Sender <me@example.com>")
            .to("a@example.com")
            .cc("b@example.com")
            .bcc("c@example.com");
        let envelope = envelope(&message).expect("envelope");
        assert_eq!(envelope.from().map(ToString::to_string).as_deref(), Some("me@example.com"));
        assert_eq!(envelope.to().len(), 3);
    }

    #[test]
    fn invalid_addresses_are_rejected() {
        let message = Message::new("Hi").sender("me@example.com").to("not an address");
        assert!(matches!(envelope(&message), Err(OutboxError::InvalidMessage { .. })));
    }

    #[test]
    fn settings_deserialize_from_snake_case() {
        let settings: SmtpSettings =
            serde_json::from_str(r#"{"host":"h","port":25,"security":"start_tls"}"#).expect("parse");
        assert_eq!(settings.security, SmtpSecurity::StartTls);
    }
}
