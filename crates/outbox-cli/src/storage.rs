use std::{path::PathBuf, sync::Arc};

use color_eyre::Result;
use outbox_core::KeyPolicy;
use outbox_storage::{
    AppPaths, KeyProvider, KeyringProvider, PassphraseSource, RuntimeContext, SecureConfigStore,
};
use tracing::debug;

use crate::config::Settings;

pub const KEYRING_SERVICE: &str = "outbox";
pub const KEYRING_ACCOUNT: &str = "config-key";

/// Resolve directories: `--profile` beats the settings file, which beats `OUTBOX_*`.
pub fn resolve_paths(settings: &Settings, profile: Option<&str>) -> Result<AppPaths> {
    let mut ctx = RuntimeContext::from_env();
    if let Some(root) = &settings.root_dir {
        ctx = ctx.with_root(root);
    }
    if let Some(profile) = profile.or(settings.profile.as_deref()) {
        ctx = ctx.with_profile(profile);
    }
    Ok(AppPaths::resolve(&ctx)?)
}

pub fn dry_run_dir(settings: &Settings, paths: &AppPaths) -> PathBuf {
    settings
        .dry_run_dir
        .clone()
        .unwrap_or_else(|| paths.dry_run_dir())
}

/// Encrypted profile store keyed by the OS keyring.
pub fn production_store(
    paths: &AppPaths,
    passphrase: Arc<dyn PassphraseSource>,
) -> Arc<SecureConfigStore<KeyringProvider>> {
    store_with(paths, KeyringProvider::new(KEYRING_SERVICE, KEYRING_ACCOUNT), passphrase)
}

pub fn store_with<P: KeyProvider>(
    paths: &AppPaths,
    key_provider: P,
    passphrase: Arc<dyn PassphraseSource>,
) -> Arc<SecureConfigStore<P>> {
    let path = paths.encrypted_config_path();
    debug!(path = %path.display(), profile = %paths.profile, "opening encrypted configuration");
    Arc::new(SecureConfigStore::new(path, key_provider).with_passphrase_source(passphrase))
}

/// Key policy from settings, rejected early when it has no viable path.
pub fn key_policy(settings: &Settings) -> Result<KeyPolicy> {
    settings.key_policy.validate()?;
    Ok(settings.key_policy)
}
