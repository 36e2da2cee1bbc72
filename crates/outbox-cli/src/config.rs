use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use outbox_core::{Backend, KeyPolicy, ProviderKind};
use outbox_transport::SmtpSettings;
use serde::{Deserialize, Serialize};

/// User settings loaded from `<config dir>/outbox/settings.toml`. Holds no
/// secrets; credentials live in the encrypted per-profile document.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Profile used when neither `--profile` nor `OUTBOX_PROFILE` is given.
    pub profile: Option<String>,
    /// Replaces the platform config/state/data roots.
    pub root_dir: Option<PathBuf>,
    /// Backend for `send` and `auth` when `--backend` is absent.
    pub backend: Option<Backend>,
    pub key_policy: KeyPolicy,
    /// Where dry runs are written; `<data dir>/dry_run` otherwise.
    pub dry_run_dir: Option<PathBuf>,
    /// Account that authenticates SMTP when both providers are configured.
    pub smtp_provider: Option<ProviderKind>,
    /// Replaces the provider's SMTP host, port and security.
    pub smtp: Option<SmtpSettings>,
    pub microsoft: Option<MicrosoftSettings>,
    pub google: Option<GoogleSettings>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MicrosoftSettings {
    pub client_id: String,
    pub authority: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct GoogleSettings {
    pub client_id: String,
}

/// Load settings from `path`, or the default path; missing or empty files yield defaults.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => load_from_path(path),
        None => load_from_path(default_path()?),
    }
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Settings::default());
    }
    let settings: Settings = toml::from_str(&contents)?;
    Ok(settings)
}

/// Resolve the default settings path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("outbox").join("settings.toml"))
}

/// Write `settings` to `path` unless a file already exists there.
pub fn write_if_missing(settings: &Settings, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(settings)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use outbox_transport::SmtpSecurity;

    use super::*;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_from_path(dir.path().join("settings.toml")).expect("load");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.key_policy, KeyPolicy::keyring_only());
    }

    #[test]
    fn parses_custom_settings() {
        let contents = r#"
            profile = "client-a"
            root_dir = "/tmp/outbox-root"
            backend = "ms_graph"
            smtp_provider = "google"

            [key_policy]
            prefer_keyring = true
            allow_passphrase_fallback = true

            [smtp]
            host = "smtp.internal"
            port = 2525
            security = "start_tls"

            [microsoft]
            client_id = "ms-client"
            authority = "consumers"

            [google]
            client_id = "gid"
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        fs::write(&path, contents).expect("write temp settings");

        let settings = load_from_path(&path).expect("load");
        assert_eq!(
            settings,
            Settings {
                profile: Some("client-a".into()),
                root_dir: Some(PathBuf::from("/tmp/outbox-root")),
                backend: Some(Backend::MsGraph),
                key_policy: KeyPolicy::keyring_with_passphrase_fallback(),
                dry_run_dir: None,
                smtp_provider: Some(ProviderKind::Google),
                smtp: Some(SmtpSettings {
                    host: "smtp.internal".into(),
                    port: 2525,
                    security: SmtpSecurity::StartTls,
                }),
                microsoft: Some(MicrosoftSettings {
                    client_id: "ms-client".into(),
                    authority: Some("consumers".into()),
                }),
                google: Some(GoogleSettings {
                    client_id: "gid".into()
                }),
            }
        );
    }

    #[test]
    fn rejects_unknown_backend_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        fs::write(&path, "backend = \"fax\"\n").expect("write");
        assert!(load_from_path(&path).is_err());
    }

    #[test]
    fn write_if_missing_creates_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("settings.toml");
        let settings = Settings {
            profile: Some("work".into()),
            ..Settings::default()
        };

        write_if_missing(&settings, &path).expect("write should succeed");
        let other = Settings::default();
        let second = write_if_missing(&other, &path).expect("second write ok");
        assert_eq!(second, path);
        assert_eq!(load_from_path(&path).expect("load"), settings);
    }
}
