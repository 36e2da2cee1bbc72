use outbox_core::{GoogleConfig, MicrosoftConfig, ProviderConfig, ProviderKind, SecretString};

pub const MICROSOFT_LOGIN_BASE: &str = "https://login.microsoftonline.com";
pub const GOOGLE_DEVICE_CODE_URL: &str = "https://oauth2.googleapis.com/device/code";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

pub const GRAPH_MAIL_SEND_SCOPE: &str = "https://graph.microsoft.com/Mail.Send";
pub const OUTLOOK_SMTP_SCOPE: &str = "https://outlook.office.com/SMTP.Send";
pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";
/// Gmail only accepts XOAUTH2 for SMTP with the full mail scope.
pub const GMAIL_FULL_SCOPE: &str = "https://mail.google.com/";

/// Scopes Microsoft adds to every request so refresh tokens and the ID token are issued.
const MICROSOFT_RESERVED_SCOPES: [&str; 3] = ["offline_access", "openid", "profile"];

/// Map a configured authority (alias, tenant id or URL) to an authority URL.
pub fn resolve_authority(authority: &str) -> String {
    let trimmed = authority.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return trimmed.trim_end_matches('/').to_string();
    }
    let tenant = match trimmed.to_ascii_lowercase().as_str() {
        "" | "organizations" | "org" | "work" | "work/school" | "work_school" => {
            "organizations".to_string()
        }
        "consumers" | "consumer" | "personal" | "outlook" => "consumers".to_string(),
        "common" => "common".to_string(),
        _ => trimmed.to_string(),
    };
    format!("{MICROSOFT_LOGIN_BASE}/{tenant}")
}

/// Scopes needed to send mail as `kind`, over SMTP or the provider's HTTP API.
pub fn send_scopes(kind: ProviderKind, smtp: bool) -> Vec<String> {
    let scope = match (kind, smtp) {
        (ProviderKind::Microsoft, false) => GRAPH_MAIL_SEND_SCOPE,
        (ProviderKind::Microsoft, true) => OUTLOOK_SMTP_SCOPE,
        (ProviderKind::Google, false) => GMAIL_SEND_SCOPE,
        (ProviderKind::Google, true) => GMAIL_FULL_SCOPE,
    };
    vec![scope.to_string()]
}

/// Endpoints and client registration for one OAuth application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClient {
    pub provider: ProviderKind,
    pub client_id: String,
    client_secret: Option<SecretString>,
    pub device_code_url: String,
    pub token_url: String,
    /// Resource scopes the cached token must cover.
    pub scopes: Vec<String>,
}

impl OAuthClient {
    pub fn microsoft(config: &MicrosoftConfig, scopes: Vec<String>) -> Self {
        let authority = resolve_authority(&config.authority);
        let scopes = if scopes.is_empty() {
            send_scopes(ProviderKind::Microsoft, false)
        } else {
            scopes
        };
        Self {
            provider: ProviderKind::Microsoft,
            client_id: config.client_id.clone(),
            client_secret: None,
            device_code_url: format!("{authority}/oauth2/v2.0/devicecode"),
            token_url: format!("{authority}/oauth2/v2.0/token"),
            scopes,
        }
    }

    /// Requested scopes fall back to the configured ones, then to `gmail.send`.
    pub fn google(config: &GoogleConfig, scopes: Vec<String>) -> Self {
        let scopes = if !scopes.is_empty() {
            scopes
        } else if !config.scopes.is_empty() {
            config.scopes.clone()
        } else {
            send_scopes(ProviderKind::Google, false)
        };
        Self {
            provider: ProviderKind::Google,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            device_code_url: GOOGLE_DEVICE_CODE_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            scopes,
        }
    }

    pub fn for_provider(config: &ProviderConfig, scopes: Vec<String>) -> Self {
        match config {
            ProviderConfig::Microsoft(ms) => Self::microsoft(ms, scopes),
            ProviderConfig::Google(google) => Self::google(google, scopes),
        }
    }

    /// Point the client at other endpoints (sovereign clouds, local fakes).
    pub fn with_endpoints(
        mut self,
        device_code_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        self.device_code_url = device_code_url.into();
        self.token_url = token_url.into();
        self
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_ref().map(SecretString::expose)
    }

    /// Space-separated `scope` form value.
    pub fn scope_param(&self) -> String {
        let mut scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        if self.provider == ProviderKind::Microsoft {
            for reserved in MICROSOFT_RESERVED_SCOPES {
                if !scopes.contains(&reserved) {
                    scopes.push(reserved);
                }
            }
        }
        scopes.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_aliases_resolve_to_login_urls() {
        for alias in ["organizations", "org", "Work", "work/school", "work_school", ""] {
            assert_eq!(
                resolve_authority(alias),
                "https://login.microsoftonline.com/organizations"
            );
        }
        for alias in ["consumers", "consumer", "personal", "outlook"] {
            assert_eq!(
                resolve_authority(alias),
                "https://login.microsoftonline.com/consumers"
            );
        }
        assert_eq!(
            resolve_authority("common"),
            "https://login.microsoftonline.com/common"
        );
    }

    #[test]
    fn urls_are_kept_and_other_values_are_tenants() {
        assert_eq!(
            resolve_authority("https://login.microsoftonline.us/contoso/"),
            "https://login.microsoftonline.us/contoso"
        );
        assert_eq!(
            resolve_authority("contoso.onmicrosoft.com"),
            "https://login.microsoftonline.com/contoso.onmicrosoft.com"
        );
    }

    #[test]
    fn microsoft_client_always_requests_offline_access() {
        let config = MicrosoftConfig::new("me@example.com", "client-1");
        let client = OAuthClient::microsoft(&config, Vec::new());

        assert_eq!(
            client.device_code_url,
            "https://login.microsoftonline.com/organizations/oauth2/v2.0/devicecode"
        );
        assert_eq!(client.scopes, vec![GRAPH_MAIL_SEND_SCOPE.to_string()]);
        assert_eq!(
            client.scope_param(),
            "https://graph.microsoft.com/Mail.Send offline_access openid profile"
        );
    }

    #[test]
    fn google_client_uses_configured_scopes_and_secret() {
        let mut config = GoogleConfig::new("me@gmail.com", "gid");
        config.client_secret = Some("shh".into());
        let client = OAuthClient::google(&config, Vec::new());
        assert_eq!(client.scope_param(), GMAIL_SEND_SCOPE);
        assert_eq!(client.client_secret(), Some("shh"));
        assert_eq!(client.token_url, GOOGLE_TOKEN_URL);

        config.scopes = vec![GMAIL_FULL_SCOPE.to_string()];
        let client = OAuthClient::google(&config, Vec::new());
        assert_eq!(client.scope_param(), GMAIL_FULL_SCOPE);

        let client = OAuthClient::google(&config, send_scopes(ProviderKind::Google, false));
        assert_eq!(client.scopes, vec![GMAIL_SEND_SCOPE.to_string()]);
    }

    #[test]
    fn smtp_uses_provider_specific_scopes() {
        assert_eq!(
            send_scopes(ProviderKind::Microsoft, true),
            vec![OUTLOOK_SMTP_SCOPE.to_string()]
        );
        assert_eq!(
            send_scopes(ProviderKind::Google, true),
            vec![GMAIL_FULL_SCOPE.to_string()]
        );
    }
}
