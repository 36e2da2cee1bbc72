//! Device authorization grant (RFC 8628): code request and token polling.

use std::time::Duration;

use outbox_core::{DeviceAuthorization, OutboxError, SecretString};
use serde::Deserialize;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::{
    endpoints::OAuthClient,
    http::{OAuthHttp, OAuthReply},
};

pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

const DEFAULT_INTERVAL_SECS: u64 = 5;
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;
/// Ceilings applied to provider-supplied timings before they become deadlines.
const MAX_DEVICE_CODE_LIFETIME_SECS: u64 = 24 * 60 * 60;
const MAX_INTERVAL_SECS: u64 = 300;

/// Where a token provider is in the device authorization flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    DeviceCodeRequested,
    AwaitingUserAuthorization,
    Polling,
    Authorized,
    Failed,
    Expired,
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    // Google still answers with the pre-RFC field name.
    #[serde(alias = "verification_url")]
    verification_uri: String,
    verification_uri_complete: Option<String>,
    message: Option<String>,
    #[serde(default = "default_interval")]
    interval: u64,
    expires_in: u64,
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

/// Successful token endpoint reply.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_lifetime")]
    pub expires_in: u64,
    pub id_token: Option<String>,
}

fn default_token_lifetime() -> u64 {
    DEFAULT_TOKEN_LIFETIME_SECS
}

/// A device code the user has been asked to approve.
pub(crate) struct PendingAuthorization {
    pub authorization: DeviceAuthorization,
    device_code: SecretString,
    interval: Duration,
    deadline: Instant,
}

#[instrument(skip_all, fields(provider = %client.provider))]
pub(crate) async fn request_device_code(
    http: &dyn OAuthHttp,
    client: &OAuthClient,
) -> Result<PendingAuthorization, OutboxError> {
    let scope = client.scope_param();
    let reply = http
        .post_form(
            &client.device_code_url,
            &[("client_id", client.client_id.as_str()), ("scope", scope.as_str())],
        )
        .await?;
    if !reply.is_success() {
        return Err(failure(client, &reply));
    }

    let response: DeviceCodeResponse = reply.parse("device code")?;
    let interval_secs = response.interval.clamp(1, MAX_INTERVAL_SECS);
    let expires_in = response.expires_in.min(MAX_DEVICE_CODE_LIFETIME_SECS);
    debug!(expires_in, interval = interval_secs, "device code issued");

    Ok(PendingAuthorization {
        authorization: DeviceAuthorization {
            provider: client.provider,
            user_code: response.user_code,
            verification_uri: response.verification_uri,
            verification_uri_complete: response.verification_uri_complete,
            message: response.message,
            interval_secs,
            expires_in_secs: expires_in,
        },
        device_code: SecretString::new(response.device_code),
        interval: Duration::from_secs(interval_secs),
        deadline: Instant::now() + Duration::from_secs(expires_in),
    })
}

/// Poll the token endpoint until the user approves, declines, or the code expires.
///
/// Waits and token requests honor `cancel`; pending and slow-down replies never surface.
#[instrument(skip_all, fields(provider = %client.provider))]
pub(crate) async fn poll_for_token(
    http: &dyn OAuthHttp,
    client: &OAuthClient,
    pending: &mut PendingAuthorization,
    cancel: &CancellationToken,
) -> Result<TokenResponse, OutboxError> {
    let expired = || OutboxError::DeviceCodeExpired {
        provider: client.provider,
    };

    loop {
        if Instant::now() >= pending.deadline {
            return Err(expired());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OutboxError::Cancelled),
            _ = sleep(pending.interval) => {}
        }

        if Instant::now() >= pending.deadline {
            return Err(expired());
        }

        let mut form = vec![
            ("grant_type", DEVICE_CODE_GRANT),
            ("client_id", client.client_id.as_str()),
            ("device_code", pending.device_code.expose()),
        ];
        if let Some(secret) = client.client_secret() {
            form.push(("client_secret", secret));
        }

        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OutboxError::Cancelled),
            reply = http.post_form(&client.token_url, &form) => reply?,
        };
        if reply.is_success() {
            return reply.parse("token");
        }

        match reply.error_code().as_str() {
            "authorization_pending" => continue,
            "slow_down" => {
                pending.interval += SLOW_DOWN_STEP;
                debug!(interval = pending.interval.as_secs(), "slowing down polling");
            }
            "expired_token" => return Err(expired()),
            "access_denied" | "authorization_declined" => {
                return Err(OutboxError::AuthorizationDenied {
                    provider: client.provider,
                })
            }
            _ => return Err(failure(client, &reply)),
        }
    }
}

pub(crate) fn failure(client: &OAuthClient, reply: &OAuthReply) -> OutboxError {
    OutboxError::AuthorizationFailed {
        provider: client.provider,
        code: reply.error_code(),
        description: reply.error_description(),
    }
}
