use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use outbox_core::{Backend, DeliveryResult, Message, OutboxError, TokenProvider, Transport};
use reqwest::header::{HeaderValue, USER_AGENT};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::{render::validate, require_credentials, USER_AGENT_VALUE};

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Microsoft Graph `sendMail`.
pub struct GraphTransport {
    client: reqwest::Client,
    base_url: String,
}

impl Default for GraphTransport {
    fn default() -> Self {
        Self::new(GRAPH_API_BASE)
    }
}

impl GraphTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

fn recipients(addresses: &[String]) -> Value {
    addresses
        .iter()
        .map(|address| json!({ "emailAddress": { "address": address } }))
        .collect()
}

/// `sendMail` request body. HTML wins over text when both are present.
pub fn graph_payload(message: &Message) -> Value {
    let (content_type, content) = match (&message.html, &message.text) {
        (Some(html), _) => ("HTML", html.as_str()),
        (None, Some(text)) => ("Text", text.as_str()),
        (None, None) => ("Text", ""),
    };

    let mut graph_message = json!({
        "subject": message.subject,
        "body": { "contentType": content_type, "content": content },
        "from": { "emailAddress": { "address": message.from } },
        "toRecipients": recipients(&message.to),
    });
    if !message.cc.is_empty() {
        graph_message["ccRecipients"] = recipients(&message.cc);
    }
    if !message.bcc.is_empty() {
        graph_message["bccRecipients"] = recipients(&message.bcc);
    }
    if !message.attachments.is_empty() {
        graph_message["attachments"] = message
            .attachments
            .iter()
            .map(|a| {
                json!({
                    "@odata.type": "#microsoft.graph.fileAttachment",
                    "name": a.filename,
                    "contentType": a.content_type,
                    "contentBytes": STANDARD.encode(&a.data),
                })
            })
            .collect();
    }

    json!({ "message": graph_message, "saveToSentItems": true })
}

/// Failure from a JSON API error body of the form `{"error": {"code", "message"}}`.
pub(crate) fn api_failure(backend: Backend, status: u16, body: &str) -> OutboxError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error = &parsed["error"];
    let code = error["code"]
        .as_str()
        .map(str::to_string)
        .or_else(|| error["status"].as_str().map(str::to_string));
    let message = error["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"));
    OutboxError::TransportDeliveryFailed {
        backend,
        status: Some(status),
        code,
        message,
    }
}

#[async_trait]
impl Transport for GraphTransport {
    fn backend(&self) -> Backend {
        Backend::MsGraph
    }

    #[instrument(skip_all, fields(backend = "ms_graph", recipients = message.recipients().count()))]
    async fn deliver(
        &self,
        message: &Message,
        credentials: Option<&dyn TokenProvider>,
    ) -> Result<DeliveryResult, OutboxError> {
        validate(message)?;
        let credentials = require_credentials(Backend::MsGraph, credentials)?;
        let token = credentials.access_token().await?;

        let response = self
            .client
            .post(format!("{}/me/sendMail", self.base_url))
            .header(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE))
            .bearer_auth(token.secret())
            .json(&graph_payload(message))
            .send()
            .await
            .map_err(OutboxError::http)?;

        let status = response.status().as_u16();
        if status == 200 || status == 202 {
            info!(status, "accepted by Microsoft Graph");
            return Ok(DeliveryResult::accepted(Backend::MsGraph));
        }
        let body = response.text().await.unwrap_or_default();
        Err(api_failure(Backend::MsGraph, status, &body))
    }
}
