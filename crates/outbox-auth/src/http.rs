use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use outbox_core::OutboxError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::instrument;

/// Status and JSON body of an OAuth endpoint reply. Non-JSON bodies become `Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthReply {
    pub status: u16,
    pub body: Value,
}

impl OAuthReply {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// Standard OAuth error reply (`{"error": code}`) with status 400.
    pub fn error(code: &str) -> Self {
        Self {
            status: 400,
            body: serde_json::json!({ "error": code }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) && self.body.get("error").is_none()
    }

    /// OAuth `error` code, or `http_<status>` when the body carries none.
    pub fn error_code(&self) -> String {
        self.body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("http_{}", self.status))
    }

    /// A 4xx reply whose OAuth error code says the grant itself is no longer
    /// accepted. Server errors and bodies without a code never qualify.
    pub fn is_grant_rejection(&self) -> bool {
        const REJECTIONS: [&str; 4] = [
            "invalid_grant",
            "invalid_client",
            "unauthorized_client",
            "invalid_scope",
        ];
        (400..500).contains(&self.status)
            && self
                .body
                .get("error")
                .and_then(Value::as_str)
                .is_some_and(|code| REJECTIONS.contains(&code))
    }

    pub fn error_description(&self) -> Option<String> {
        self.body
            .get("error_description")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub(crate) fn parse<T: DeserializeOwned>(&self, what: &str) -> Result<T, OutboxError> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| OutboxError::http(format!("unexpected {what} response: {e}")))
    }
}

/// Form-POST seam for OAuth endpoints, so flows can be tested without a network.
#[async_trait]
pub trait OAuthHttp: Send + Sync {
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<OAuthReply, OutboxError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestOAuthHttp {
    client: reqwest::Client,
}

impl ReqwestOAuthHttp {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OAuthHttp for ReqwestOAuthHttp {
    #[instrument(skip(self, form))]
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<OAuthReply, OutboxError> {
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(OutboxError::http)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(OutboxError::http)?;
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Ok(OAuthReply { status, body })
    }
}

/// A request seen by [`ScriptedOAuthHttp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: String,
    pub form: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Replays canned replies in order and records every request.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOAuthHttp {
    replies: Arc<Mutex<VecDeque<OAuthReply>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedOAuthHttp {
    pub fn new(replies: impl IntoIterator<Item = OAuthReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().collect())),
            requests: Arc::default(),
        }
    }

    pub fn push(&self, reply: OAuthReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl OAuthHttp for ScriptedOAuthHttp {
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<OAuthReply, OutboxError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                url: url.to_string(),
                form: form
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        }
        self.replies
            .lock()
            .map_err(|e| OutboxError::http(format!("lock poisoned: {e}")))?
            .pop_front()
            .ok_or_else(|| OutboxError::http(format!("no scripted reply for {url}")))
    }
}
