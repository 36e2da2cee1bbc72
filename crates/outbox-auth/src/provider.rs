use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use outbox_core::{
    auth::LogPrompt, AccessToken, CachedToken, ConfigRepository, DeviceAuthorization,
    DeviceCodePrompt, OutboxError, ProviderConfig, ProviderKind, SecretString, TokenProvider,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    device_code::{self, FlowState, PendingAuthorization, TokenResponse},
    endpoints::OAuthClient,
    http::{OAuthHttp, ReqwestOAuthHttp},
};

const MAX_TOKEN_LIFETIME_SECS: i64 = 365 * 24 * 3600;

struct FlowInner {
    state: FlowState,
    config: ProviderConfig,
    pending: Option<PendingAuthorization>,
}

/// Token provider for one configured account, backed by the device authorization grant.
///
/// Tokens are cached in the account's [`ProviderConfig`] and persisted through
/// the injected [`ConfigRepository`] after every authorization or refresh.
/// Operations are serialized; a second caller waits for the running flow.
pub struct DeviceCodeTokenProvider {
    client: OAuthClient,
    account: String,
    http: Arc<dyn OAuthHttp>,
    repository: Arc<dyn ConfigRepository>,
    prompt: Arc<dyn DeviceCodePrompt>,
    cancel: CancellationToken,
    interactive: bool,
    inner: Mutex<FlowInner>,
}

impl DeviceCodeTokenProvider {
    /// `scopes` are the resource scopes needed; empty means the provider default.
    pub fn new(
        config: ProviderConfig,
        scopes: Vec<String>,
        repository: Arc<dyn ConfigRepository>,
    ) -> Self {
        Self {
            client: OAuthClient::for_provider(&config, scopes),
            account: config.email_address().to_string(),
            http: Arc::new(ReqwestOAuthHttp::default()),
            repository,
            prompt: Arc::new(LogPrompt),
            cancel: CancellationToken::new(),
            interactive: true,
            inner: Mutex::new(FlowInner {
                state: FlowState::Idle,
                config,
                pending: None,
            }),
        }
    }

    pub fn with_http(mut self, http: Arc<dyn OAuthHttp>) -> Self {
        self.http = http;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn DeviceCodePrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Non-interactive providers never start a device flow on their own.
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_client(mut self, client: OAuthClient) -> Self {
        self.client = client;
        self
    }

    pub fn client(&self) -> &OAuthClient {
        &self.client
    }

    pub async fn state(&self) -> FlowState {
        self.inner.lock().await.state
    }

    /// Provider configuration including the currently cached token.
    pub async fn config(&self) -> ProviderConfig {
        self.inner.lock().await.config.clone()
    }

    /// Forget any pending or expired flow and return to `Idle`.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.pending = None;
        inner.state = FlowState::Idle;
    }

    /// Request a device code and show it through the prompt.
    #[instrument(skip_all, fields(provider = %self.client.provider))]
    pub async fn request_device_code(&self) -> Result<DeviceAuthorization, OutboxError> {
        let mut inner = self.inner.lock().await;
        self.request_locked(&mut inner).await
    }

    /// Poll for the token of the device code requested last.
    #[instrument(skip_all, fields(provider = %self.client.provider))]
    pub async fn poll(&self) -> Result<AccessToken, OutboxError> {
        let mut inner = self.inner.lock().await;
        self.poll_locked(&mut inner).await
    }

    /// Run the whole device flow: request, prompt, poll, persist.
    #[instrument(skip_all, fields(provider = %self.client.provider))]
    pub async fn authorize(&self) -> Result<AccessToken, OutboxError> {
        let mut inner = self.inner.lock().await;
        self.authorize_locked(&mut inner).await
    }

    fn ensure_not_expired(&self, inner: &FlowInner) -> Result<(), OutboxError> {
        if inner.state == FlowState::Expired {
            return Err(OutboxError::DeviceCodeExpired {
                provider: self.client.provider,
            });
        }
        Ok(())
    }

    async fn request_locked(&self, inner: &mut FlowInner) -> Result<DeviceAuthorization, OutboxError> {
        self.ensure_not_expired(inner)?;
        inner.pending = None;
        inner.state = FlowState::DeviceCodeRequested;

        let pending = match device_code::request_device_code(self.http.as_ref(), &self.client).await {
            Ok(pending) => pending,
            Err(err) => {
                inner.state = FlowState::Failed;
                return Err(err);
            }
        };

        let authorization = pending.authorization.clone();
        inner.pending = Some(pending);
        inner.state = FlowState::AwaitingUserAuthorization;
        self.prompt.show(&authorization);
        Ok(authorization)
    }

    async fn poll_locked(&self, inner: &mut FlowInner) -> Result<AccessToken, OutboxError> {
        self.ensure_not_expired(inner)?;
        let Some(mut pending) = inner.pending.take() else {
            return Err(OutboxError::AuthorizationFailed {
                provider: self.client.provider,
                code: "no_pending_authorization".to_string(),
                description: Some("request a device code before polling".to_string()),
            });
        };

        inner.state = FlowState::Polling;
        let result =
            device_code::poll_for_token(self.http.as_ref(), &self.client, &mut pending, &self.cancel)
                .await;

        match result {
            Ok(response) => {
                info!(account = %self.account, "device authorization completed");
                self.store_token(inner, response, None).await
            }
            Err(OutboxError::Cancelled) => {
                inner.state = FlowState::Idle;
                Err(OutboxError::Cancelled)
            }
            Err(err @ OutboxError::DeviceCodeExpired { .. }) => {
                inner.state = FlowState::Expired;
                Err(err)
            }
            Err(err) => {
                inner.state = FlowState::Failed;
                Err(err)
            }
        }
    }

    async fn authorize_locked(&self, inner: &mut FlowInner) -> Result<AccessToken, OutboxError> {
        self.request_locked(inner).await?;
        self.poll_locked(inner).await
    }

    async fn refresh_locked(&self, inner: &mut FlowInner) -> Result<AccessToken, OutboxError> {
        self.ensure_not_expired(inner)?;
        let Some(refresh_token) = inner.config.token().and_then(|t| t.refresh_token.clone()) else {
            return Err(OutboxError::ReauthorizationRequired {
                provider: self.client.provider,
                reason: "no refresh token is cached".to_string(),
            });
        };

        let scope = self.client.scope_param();
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", self.client.client_id.as_str()),
            ("refresh_token", refresh_token.expose()),
            ("scope", scope.as_str()),
        ];
        if let Some(secret) = self.client.client_secret() {
            form.push(("client_secret", secret));
        }

        let reply = self.http.post_form(&self.client.token_url, &form).await?;
        if !reply.is_success() {
            let code = reply.error_code();
            if !reply.is_grant_rejection() {
                // Server errors and unknown codes leave the cached token and state alone.
                warn!(%code, status = reply.status, "token refresh failed");
                if reply.status < 500 && reply.body.get("error").is_some() {
                    return Err(device_code::failure(&self.client, &reply));
                }
                return Err(OutboxError::http(format!(
                    "token endpoint answered {} ({code})",
                    reply.status
                )));
            }
            warn!(%code, "refresh token rejected; dropping cached token");
            inner.config.set_token(None);
            inner.state = FlowState::Idle;
            if let Err(err) = self.persist(&inner.config).await {
                warn!(error = %err, "could not persist the dropped token");
            }
            return Err(OutboxError::ReauthorizationRequired {
                provider: self.client.provider,
                reason: format!("the refresh token was rejected ({code})"),
            });
        }

        let response: TokenResponse = reply.parse("token")?;
        self.store_token(inner, response, Some(refresh_token)).await
    }

    /// Persist the token with the provider config, then cache it and move to
    /// `Authorized`. A failed persist leaves the cached config unchanged and
    /// the state `Failed`.
    async fn store_token(
        &self,
        inner: &mut FlowInner,
        response: TokenResponse,
        previous_refresh: Option<SecretString>,
    ) -> Result<AccessToken, OutboxError> {
        let lifetime = i64::try_from(response.expires_in)
            .unwrap_or(MAX_TOKEN_LIFETIME_SECS)
            .min(MAX_TOKEN_LIFETIME_SECS);
        let expires_at = Utc::now() + chrono::Duration::seconds(lifetime);
        let cached = CachedToken {
            access_token: SecretString::new(response.access_token),
            refresh_token: response.refresh_token.map(SecretString::new).or(previous_refresh),
            expires_at,
            scopes: self.client.scopes.clone(),
        };

        let mut config = inner.config.clone();
        if let (ProviderConfig::Microsoft(ms), Some(id_token)) =
            (&mut config, response.id_token.as_deref())
        {
            if let Some(username) = username_from_id_token(id_token) {
                ms.username = Some(username);
            }
        }

        let token = AccessToken::new(cached.access_token.expose(), expires_at);
        config.set_token(Some(cached));
        if let Err(err) = self.persist(&config).await {
            inner.state = FlowState::Failed;
            return Err(err);
        }
        inner.config = config;
        inner.state = FlowState::Authorized;
        Ok(token)
    }

    async fn persist(&self, config: &ProviderConfig) -> Result<(), OutboxError> {
        let mut document = self.repository.load_or_default().await?;
        document.upsert(config.clone());
        self.repository.save(&document).await
    }
}

#[async_trait]
impl TokenProvider for DeviceCodeTokenProvider {
    fn provider(&self) -> ProviderKind {
        self.client.provider
    }

    fn account(&self) -> String {
        self.account.clone()
    }

    #[instrument(skip_all, fields(provider = %self.client.provider))]
    async fn access_token(&self) -> Result<AccessToken, OutboxError> {
        let mut inner = self.inner.lock().await;
        self.ensure_not_expired(&inner)?;

        let cached = inner.config.token().cloned();
        if let Some(token) = &cached {
            if token.is_valid() && token.covers(&self.client.scopes) {
                return Ok(AccessToken::new(token.access_token.expose(), token.expires_at));
            }
        }

        if cached.as_ref().is_some_and(|t| t.refresh_token.is_some()) {
            match self.refresh_locked(&mut inner).await {
                Ok(token) => return Ok(token),
                Err(OutboxError::ReauthorizationRequired { .. }) if self.interactive => {
                    info!("refresh rejected; starting device authorization");
                }
                Err(err) => return Err(err),
            }
        } else if !self.interactive {
            return Err(OutboxError::ReauthorizationRequired {
                provider: self.client.provider,
                reason: "no cached credentials; run `outbox auth`".to_string(),
            });
        }

        self.authorize_locked(&mut inner).await
    }

    #[instrument(skip_all, fields(provider = %self.client.provider))]
    async fn refresh(&self) -> Result<AccessToken, OutboxError> {
        let mut inner = self.inner.lock().await;
        self.refresh_locked(&mut inner).await
    }
}

/// `preferred_username` (or `upn`) from an unverified ID token payload.
fn username_from_id_token(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    ["preferred_username", "upn"]
        .iter()
        .find_map(|claim| claims.get(claim).and_then(|v| v.as_str()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use chrono::Duration as ChronoDuration;
    use outbox_core::{
        ConfigDocument, GoogleConfig, InMemoryConfigRepository, MicrosoftConfig,
    };
    use serde_json::json;

    use super::*;
    use crate::http::{OAuthReply, ScriptedOAuthHttp};

    fn id_token(claims: serde_json::Value) -> String {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).expect("claims"));
        format!("eyJhbGciOiJub25lIn0.{payload}.sig")
    }

    fn ms_device_code() -> OAuthReply {
        OAuthReply::ok(json!({
            "device_code": "ms-device",
            "user_code": "WXYZ-1234",
            "verification_uri": "https://microsoft.com/devicelogin",
            "message": "To sign in, use a web browser to open https://microsoft.com/devicelogin and enter the code WXYZ-1234.",
            "interval": 5,
            "expires_in": 900
        }))
    }

    fn ms_config() -> ProviderConfig {
        ProviderConfig::Microsoft(MicrosoftConfig::new("sender@example.com", "ms-client"))
    }

    fn google_with_token(refresh: Option<&str>, valid: bool) -> ProviderConfig {
        let mut config = GoogleConfig::new("me@gmail.com", "gid");
        config.client_secret = Some("shh".into());
        let offset = if valid { ChronoDuration::hours(1) } else { ChronoDuration::minutes(-5) };
        config.token = Some(CachedToken {
            access_token: "old-access".into(),
            refresh_token: refresh.map(SecretString::from),
            expires_at: Utc::now() + offset,
            scopes: vec!["https://www.googleapis.com/auth/gmail.send".into()],
        });
        ProviderConfig::Google(config)
    }

    struct Harness {
        provider: DeviceCodeTokenProvider,
        http: ScriptedOAuthHttp,
        repo: InMemoryConfigRepository,
        shown: Arc<StdMutex<Vec<DeviceAuthorization>>>,
    }

    fn harness(config: ProviderConfig, replies: Vec<OAuthReply>, interactive: bool) -> Harness {
        let http = ScriptedOAuthHttp::new(replies);
        let repo = InMemoryConfigRepository::with_document(
            ConfigDocument::new().with_provider(config.clone()),
        );
        let shown = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&shown);
        let provider = DeviceCodeTokenProvider::new(config, Vec::new(), Arc::new(repo.clone()))
            .with_http(Arc::new(http.clone()))
            .with_prompt(Arc::new(move |auth: &DeviceAuthorization| {
                sink.lock().expect("prompt lock").push(auth.clone());
            }))
            .with_interactive(interactive);
        Harness {
            provider,
            http,
            repo,
            shown,
        }
    }

    fn stored_token(repo: &InMemoryConfigRepository, kind: ProviderKind) -> Option<CachedToken> {
        repo.snapshot()
            .and_then(|doc| doc.get(kind).and_then(|c| c.token().cloned()))
    }

    #[tokio::test(start_paused = true)]
    async fn device_flow_authorizes_and_persists_the_token() {
        let h = harness(
            ms_config(),
            vec![
                ms_device_code(),
                OAuthReply::error("authorization_pending"),
                OAuthReply::ok(json!({
                    "access_token": "ms-access",
                    "refresh_token": "ms-refresh",
                    "expires_in": 3600,
                    "id_token": id_token(json!({"preferred_username": "sender@contoso.com"}))
                })),
            ],
            true,
        );

        let token = h.provider.access_token().await.expect("authorized");
        assert_eq!(token.secret(), "ms-access");
        assert_eq!(h.provider.state().await, FlowState::Authorized);

        let shown = h.shown.lock().expect("lock").clone();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].user_code, "WXYZ-1234");

        let stored = stored_token(&h.repo, ProviderKind::Microsoft).expect("persisted");
        assert_eq!(stored.access_token.expose(), "ms-access");
        assert_eq!(stored.refresh_token.as_ref().map(SecretString::expose), Some("ms-refresh"));
        let doc = h.repo.snapshot().expect("document");
        assert_eq!(
            doc.microsoft().and_then(|ms| ms.username.clone()).as_deref(),
            Some("sender@contoso.com")
        );

        let requests = h.http.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[0].url,
            "https://login.microsoftonline.com/organizations/oauth2/v2.0/devicecode"
        );
        assert!(requests[0].field("scope").expect("scope").contains("offline_access"));

        // Cached token is reused without any request.
        let again = h.provider.access_token().await.expect("cached");
        assert_eq!(again.secret(), "ms-access");
        assert_eq!(h.http.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn request_device_code_moves_to_awaiting_authorization() {
        let h = harness(ms_config(), vec![ms_device_code()], true);
        let authorization = h.provider.request_device_code().await.expect("device code");
        assert_eq!(authorization.interval_secs, 5);
        assert!(authorization.instructions().contains("WXYZ-1234"));
        assert_eq!(h.provider.state().await, FlowState::AwaitingUserAuthorization);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_blocks_everything_until_reset() {
        let h = harness(
            ms_config(),
            vec![ms_device_code(), OAuthReply::error("expired_token")],
            true,
        );
        let err = h.provider.authorize().await.expect_err("expired");
        assert!(matches!(err, OutboxError::DeviceCodeExpired { .. }));
        assert_eq!(h.provider.state().await, FlowState::Expired);

        assert!(matches!(
            h.provider.poll().await,
            Err(OutboxError::DeviceCodeExpired { .. })
        ));
        assert!(matches!(
            h.provider.refresh().await,
            Err(OutboxError::DeviceCodeExpired { .. })
        ));
        assert!(matches!(
            h.provider.access_token().await,
            Err(OutboxError::DeviceCodeExpired { .. })
        ));
        assert_eq!(h.http.requests().len(), 2);

        h.provider.reset().await;
        assert_eq!(h.provider.state().await, FlowState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn declined_authorization_fails_without_persisting() {
        let h = harness(
            ms_config(),
            vec![ms_device_code(), OAuthReply::error("authorization_declined")],
            true,
        );
        let err = h.provider.authorize().await.expect_err("declined");
        assert_eq!(
            err,
            OutboxError::AuthorizationDenied {
                provider: ProviderKind::Microsoft
            }
        );
        assert_eq!(h.provider.state().await, FlowState::Failed);
        assert!(stored_token(&h.repo, ProviderKind::Microsoft).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_resets_to_idle_and_leaves_store_untouched() {
        let h = harness(ms_config(), vec![ms_device_code()], true);
        let cancel = CancellationToken::new();
        let provider = h.provider.with_cancellation(cancel.clone());
        let before = h.repo.snapshot();

        cancel.cancel();
        let err = provider.authorize().await.expect_err("cancelled");
        assert_eq!(err, OutboxError::Cancelled);
        assert_eq!(provider.state().await, FlowState::Idle);
        assert_eq!(h.repo.snapshot(), before);
        assert_eq!(h.http.requests().len(), 1);
    }

    #[tokio::test]
    async fn refresh_keeps_previous_refresh_token_when_none_returned() {
        let h = harness(
            google_with_token(Some("refresh-1"), false),
            vec![OAuthReply::ok(json!({"access_token": "new-access", "expires_in": 3600}))],
            false,
        );

        let token = h.provider.access_token().await.expect("refreshed");
        assert_eq!(token.secret(), "new-access");
        assert_eq!(h.provider.state().await, FlowState::Authorized);

        let stored = stored_token(&h.repo, ProviderKind::Google).expect("persisted");
        assert_eq!(stored.access_token.expose(), "new-access");
        assert_eq!(stored.refresh_token.as_ref().map(SecretString::expose), Some("refresh-1"));

        let request = &h.http.requests()[0];
        assert_eq!(request.url, "https://oauth2.googleapis.com/token");
        assert_eq!(request.field("grant_type"), Some("refresh_token"));
        assert_eq!(request.field("refresh_token"), Some("refresh-1"));
        assert_eq!(request.field("client_secret"), Some("shh"));
    }

    #[tokio::test]
    async fn refresh_stores_rotated_refresh_token() {
        let h = harness(
            google_with_token(Some("refresh-1"), true),
            vec![OAuthReply::ok(json!({
                "access_token": "new-access",
                "refresh_token": "refresh-2",
                "expires_in": 3600
            }))],
            false,
        );
        h.provider.refresh().await.expect("refreshed");
        let stored = stored_token(&h.repo, ProviderKind::Google).expect("persisted");
        assert_eq!(stored.refresh_token.as_ref().map(SecretString::expose), Some("refresh-2"));
    }

    #[tokio::test]
    async fn rejected_refresh_requires_reauthorization() {
        let h = harness(
            google_with_token(Some("revoked"), false),
            vec![OAuthReply::error("invalid_grant")],
            false,
        );

        let err = h.provider.access_token().await.expect_err("rejected");
        assert!(matches!(
            err,
            OutboxError::ReauthorizationRequired { provider: ProviderKind::Google, .. }
        ));
        assert_eq!(h.provider.state().await, FlowState::Idle);
        assert!(h.provider.config().await.token().is_none());
        assert!(stored_token(&h.repo, ProviderKind::Google).is_none());
    }

    #[tokio::test]
    async fn server_errors_during_refresh_keep_the_cached_token() {
        let h = harness(
            google_with_token(Some("still-good"), false),
            vec![
                OAuthReply {
                    status: 503,
                    body: serde_json::Value::Null,
                },
                OAuthReply {
                    status: 400,
                    body: json!({"error": "temporarily_unavailable"}),
                },
            ],
            true,
        );

        let err = h.provider.refresh().await.expect_err("unavailable");
        assert!(matches!(err, OutboxError::Http { .. }));
        let err = h.provider.access_token().await.expect_err("still failing");
        assert!(matches!(
            err,
            OutboxError::AuthorizationFailed { code, .. } if code == "temporarily_unavailable"
        ));

        assert_eq!(h.provider.state().await, FlowState::Idle);
        let cached = h.provider.config().await.token().cloned().expect("cached token kept");
        assert_eq!(cached.refresh_token.as_ref().map(SecretString::expose), Some("still-good"));
        let stored = stored_token(&h.repo, ProviderKind::Google).expect("stored token kept");
        assert_eq!(stored.refresh_token.as_ref().map(SecretString::expose), Some("still-good"));
        // No device flow was started for a transient failure.
        assert!(h.shown.lock().expect("lock").is_empty());
        assert_eq!(h.http.requests().len(), 2);
    }

    /// Loads fine, refuses every save.
    struct ReadOnlyRepository;

    #[async_trait]
    impl ConfigRepository for ReadOnlyRepository {
        async fn load(&self) -> Result<ConfigDocument, OutboxError> {
            Ok(ConfigDocument::new())
        }

        async fn save(&self, _document: &ConfigDocument) -> Result<(), OutboxError> {
            Err(OutboxError::storage("disk full"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_persist_does_not_report_authorized() {
        let http = ScriptedOAuthHttp::new([
            ms_device_code(),
            OAuthReply::ok(json!({"access_token": "ms-access", "refresh_token": "ms-refresh"})),
        ]);
        let provider = DeviceCodeTokenProvider::new(ms_config(), Vec::new(), Arc::new(ReadOnlyRepository))
            .with_http(Arc::new(http))
            .with_prompt(Arc::new(|_: &DeviceAuthorization| {}));

        let err = provider.authorize().await.expect_err("persist fails");
        assert!(matches!(err, OutboxError::Storage { .. }));
        assert_eq!(provider.state().await, FlowState::Failed);
        assert!(provider.config().await.token().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn interactive_provider_falls_back_to_device_flow_after_rejection() {
        let h = harness(
            google_with_token(Some("revoked"), false),
            vec![
                OAuthReply::error("invalid_grant"),
                OAuthReply::ok(json!({
                    "device_code": "g-device",
                    "user_code": "GGGG",
                    "verification_url": "https://www.google.com/device",
                    "expires_in": 1800
                })),
                OAuthReply::ok(json!({"access_token": "fresh", "refresh_token": "r2"})),
            ],
            true,
        );

        let token = h.provider.access_token().await.expect("authorized");
        assert_eq!(token.secret(), "fresh");
        assert_eq!(h.shown.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn non_interactive_provider_without_token_never_calls_out() {
        let h = harness(ms_config(), Vec::new(), false);
        let err = h.provider.access_token().await.expect_err("needs auth");
        assert!(matches!(err, OutboxError::ReauthorizationRequired { .. }));
        assert!(h.http.requests().is_empty());
    }

    #[tokio::test]
    async fn poll_without_device_code_is_rejected() {
        let h = harness(ms_config(), Vec::new(), true);
        let err = h.provider.poll().await.expect_err("nothing pending");
        assert!(matches!(
            err,
            OutboxError::AuthorizationFailed { code, .. } if code == "no_pending_authorization"
        ));
    }

    #[test]
    fn username_comes_from_preferred_username_or_upn() {
        assert_eq!(
            username_from_id_token(&id_token(json!({"preferred_username": "a@b.com"}))).as_deref(),
            Some("a@b.com")
        );
        assert_eq!(
            username_from_id_token(&id_token(json!({"upn": "c@d.com"}))).as_deref(),
            Some("c@d.com")
        );
        assert_eq!(username_from_id_token("not-a-jwt"), None);
    }
}
