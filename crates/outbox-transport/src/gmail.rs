use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use outbox_core::{Backend, DeliveryResult, Message, OutboxError, TokenProvider, Transport};
use reqwest::header::{HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    graph::api_failure,
    render::{render, RenderOptions},
    require_credentials, USER_AGENT_VALUE,
};

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

#[derive(Debug, Serialize)]
struct SendRequest {
    raw: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: Option<String>,
}

/// Gmail API `users.messages.send` with a rendered RFC 5322 message.
pub struct GmailTransport {
    client: reqwest::Client,
    base_url: String,
}

impl Default for GmailTransport {
    fn default() -> Self {
        Self::new(GMAIL_API_BASE)
    }
}

impl GmailTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// `raw` field: the rendered message (Bcc kept, Gmail strips it) in URL-safe base64.
pub fn gmail_raw(message: &Message) -> Result<String, OutboxError> {
    let rendered = render(message, RenderOptions { include_bcc: true })?;
    Ok(URL_SAFE.encode(rendered.as_bytes()))
}

#[async_trait]
impl Transport for GmailTransport {
    fn backend(&self) -> Backend {
        Backend::GoogleApi
    }

    #[instrument(skip_all, fields(backend = "google_api", recipients = message.recipients().count()))]
    async fn deliver(
        &self,
        message: &Message,
        credentials: Option<&dyn TokenProvider>,
    ) -> Result<DeliveryResult, OutboxError> {
        let raw = gmail_raw(message)?;
        let credentials = require_credentials(Backend::GoogleApi, credentials)?;
        let token = credentials.access_token().await?;

        let response = self
            .client
            .post(format!("{}/users/me/messages/send", self.base_url))
            .header(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE))
            .bearer_auth(token.secret())
            .json(&SendRequest { raw })
            .send()
            .await
            .map_err(OutboxError::http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_failure(Backend::GoogleApi, status.as_u16(), &body));
        }

        let sent: SendResponse = response.json().await.map_err(OutboxError::http)?;
        info!(message_id = ?sent.id, "accepted by Gmail");
        Ok(DeliveryResult {
            message_id: sent.id,
            ..DeliveryResult::accepted(Backend::GoogleApi)
        })
    }
}
