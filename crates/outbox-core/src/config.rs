//! Provider configuration persisted (encrypted) by the config store.
//!
//! The document is a tagged union per provider: each entry carries a
//! `provider` discriminator so the decoder reconstructs the right variant, and
//! the document itself carries a `schema` number for forward compatibility.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Current schema of [`ConfigDocument`].
pub const CONFIG_SCHEMA: u32 = 1;

/// Tokens expiring within this window are treated as already expired.
pub const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Microsoft,
    Google,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Microsoft => "microsoft",
            ProviderKind::Google => "google",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "microsoft" | "ms" | "outlook" => Ok(ProviderKind::Microsoft),
            "google" | "gmail" => Ok(ProviderKind::Google),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// String whose `Debug` output never reveals the value.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(<redacted>)")
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Token material cached after a successful authorization or refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedToken {
    pub access_token: SecretString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<SecretString>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl CachedToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - Duration::seconds(TOKEN_EXPIRY_SKEW_SECS)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// True when the token was granted for every requested scope.
    pub fn covers(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|s| self.scopes.iter().any(|have| have == s))
    }
}

fn default_authority() -> String {
    "organizations".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MicrosoftConfig {
    pub email_address: String,
    pub client_id: String,
    /// Alias (`organizations`, `consumers`, ...), tenant id, or full authority URL.
    #[serde(default = "default_authority")]
    pub authority: String,
    /// Account name reported by the identity provider after sign-in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<CachedToken>,
}

impl MicrosoftConfig {
    pub fn new(email_address: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            email_address: email_address.into(),
            client_id: client_id.into(),
            authority: default_authority(),
            username: None,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoogleConfig {
    pub email_address: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<SecretString>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<CachedToken>,
}

impl GoogleConfig {
    pub fn new(email_address: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            email_address: email_address.into(),
            client_id: client_id.into(),
            client_secret: None,
            scopes: Vec::new(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderConfig {
    Microsoft(MicrosoftConfig),
    Google(GoogleConfig),
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::Microsoft(_) => ProviderKind::Microsoft,
            ProviderConfig::Google(_) => ProviderKind::Google,
        }
    }

    pub fn email_address(&self) -> &str {
        match self {
            ProviderConfig::Microsoft(cfg) => &cfg.email_address,
            ProviderConfig::Google(cfg) => &cfg.email_address,
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            ProviderConfig::Microsoft(cfg) => &cfg.client_id,
            ProviderConfig::Google(cfg) => &cfg.client_id,
        }
    }

    pub fn token(&self) -> Option<&CachedToken> {
        match self {
            ProviderConfig::Microsoft(cfg) => cfg.token.as_ref(),
            ProviderConfig::Google(cfg) => cfg.token.as_ref(),
        }
    }

    pub fn set_token(&mut self, token: Option<CachedToken>) {
        match self {
            ProviderConfig::Microsoft(cfg) => cfg.token = token,
            ProviderConfig::Google(cfg) => cfg.token = token,
        }
    }

    /// Apply new client settings on top of `self`.
    ///
    /// Cached tokens (and the Microsoft username) survive only when the client
    /// id is unchanged; tokens issued to another client are useless.
    pub fn merged_with(&self, mut update: ProviderConfig) -> ProviderConfig {
        if self.kind() == update.kind() && self.client_id() == update.client_id() {
            if update.token().is_none() {
                update.set_token(self.token().cloned());
            }
            if let (ProviderConfig::Microsoft(old), ProviderConfig::Microsoft(new)) =
                (self, &mut update)
            {
                if new.username.is_none() {
                    new.username = old.username.clone();
                }
            }
        }
        update
    }
}

/// The whole configuration persisted for one profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigDocument {
    #[serde(default = "current_schema")]
    pub schema: u32,
    #[serde(default)]
    providers: Vec<ProviderConfig>,
}

fn current_schema() -> u32 {
    CONFIG_SCHEMA
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            schema: CONFIG_SCHEMA,
            providers: Vec::new(),
        }
    }
}

impl ConfigDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, config: ProviderConfig) -> Self {
        self.upsert(config);
        self
    }

    pub fn providers(&self) -> &[ProviderConfig] {
        &self.providers
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.kind() == kind)
    }

    pub fn microsoft(&self) -> Option<&MicrosoftConfig> {
        self.providers.iter().find_map(|p| match p {
            ProviderConfig::Microsoft(cfg) => Some(cfg),
            _ => None,
        })
    }

    pub fn google(&self) -> Option<&GoogleConfig> {
        self.providers.iter().find_map(|p| match p {
            ProviderConfig::Google(cfg) => Some(cfg),
            _ => None,
        })
    }

    /// Insert or replace the entry for `config.kind()`; entries stay sorted by kind.
    pub fn upsert(&mut self, config: ProviderConfig) {
        let kind = config.kind();
        match self.providers.iter_mut().find(|p| p.kind() == kind) {
            Some(existing) => *existing = config,
            None => {
                self.providers.push(config);
                self.providers.sort_by_key(|p| p.kind());
            }
        }
    }

    pub fn remove(&mut self, kind: ProviderKind) -> Option<ProviderConfig> {
        let index = self.providers.iter().position(|p| p.kind() == kind)?;
        Some(self.providers.remove(index))
    }
}
