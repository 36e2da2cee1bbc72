use std::{
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Identifier recorded for keys generated or read by the providers here.
pub const CONFIG_KEY_ID: &str = "outbox-config";

pub const KEY_LEN: usize = 32;

/// AES-256 key for the configuration document. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    /// Safe to log; the bytes are not.
    pub id: String,
    pub bytes: [u8; KEY_LEN],
}

impl KeyMaterial {
    fn config_key(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            id: CONFIG_KEY_ID.to_string(),
            bytes,
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring unavailable: {0}")]
    Unavailable(String),
    #[error("could not store a new key in the keyring: {0}")]
    Store(String),
    #[error("stored key is corrupt: {0}")]
    Corrupt(String),
    #[error("no configuration key has been stored yet")]
    Missing,
    #[error("in-memory key provider poisoned")]
    Poisoned,
}

/// Source of the configuration key. Any error means the key is unavailable;
/// the store never substitutes an empty or default key.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Key for writing: the stored key, or a new one stored on first use.
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError>;

    /// Key for reading: never creates one (`Missing` instead).
    async fn get_existing(&self) -> Result<KeyMaterial, KeyError>;
}

/// Key kept base64-encoded in the OS keyring under `service`/`account`.
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

#[async_trait]
impl KeyProvider for KeyringProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let service = self.service.clone();
        let account = self.account.clone();
        // Keyring backends (D-Bus, Security framework) block.
        tokio::task::spawn_blocking(move || keyring_get_or_create(&service, &account))
            .await
            .map_err(|err| KeyError::Unavailable(format!("keyring task failed: {err}")))?
    }

    async fn get_existing(&self) -> Result<KeyMaterial, KeyError> {
        let service = self.service.clone();
        let account = self.account.clone();
        tokio::task::spawn_blocking(move || keyring_get(&service, &account))
            .await
            .map_err(|err| KeyError::Unavailable(format!("keyring task failed: {err}")))?
    }
}

fn keyring_get(service: &str, account: &str) -> Result<KeyMaterial, KeyError> {
    let entry =
        keyring::Entry::new(service, account).map_err(|e| KeyError::Unavailable(e.to_string()))?;
    match entry.get_password() {
        Ok(secret) => decode_key(&Zeroizing::new(secret)),
        Err(keyring::Error::NoEntry) => Err(KeyError::Missing),
        Err(err) => Err(KeyError::Unavailable(err.to_string())),
    }
}

fn keyring_get_or_create(service: &str, account: &str) -> Result<KeyMaterial, KeyError> {
    let entry =
        keyring::Entry::new(service, account).map_err(|e| KeyError::Unavailable(e.to_string()))?;

    match entry.get_password() {
        Ok(secret) => decode_key(&Zeroizing::new(secret)),
        Err(keyring::Error::NoEntry) => {
            let material = generate_key();
            entry
                .set_password(&encode_key(&material))
                .map_err(|e| KeyError::Store(e.to_string()))?;
            tracing::info!(%service, "generated configuration key in OS keyring");
            Ok(material)
        }
        // Only a missing entry creates a key; a locked keychain is an error.
        Err(err) => Err(KeyError::Unavailable(err.to_string())),
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut slot = self.inner.lock().map_err(|_| KeyError::Poisoned)?;
        Ok(slot.get_or_insert_with(generate_key).clone())
    }

    async fn get_existing(&self) -> Result<KeyMaterial, KeyError> {
        let slot = self.inner.lock().map_err(|_| KeyError::Poisoned)?;
        slot.clone().ok_or(KeyError::Missing)
    }
}

/// Provider for hosts without a usable keyring; always reports unavailable.
#[derive(Debug, Default, Clone)]
pub struct UnavailableKeyProvider;

#[async_trait]
impl KeyProvider for UnavailableKeyProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        Err(KeyError::Unavailable("no keyring backend on this host".to_string()))
    }

    async fn get_existing(&self) -> Result<KeyMaterial, KeyError> {
        self.get_or_create().await
    }
}

fn generate_key() -> KeyMaterial {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial::config_key(bytes)
}

fn encode_key(material: &KeyMaterial) -> Zeroizing<String> {
    Zeroizing::new(general_purpose::STANDARD.encode(material.bytes))
}

fn decode_key(secret: &str) -> Result<KeyMaterial, KeyError> {
    let decoded = Zeroizing::new(
        general_purpose::STANDARD
            .decode(secret)
            .map_err(|e| KeyError::Corrupt(e.to_string()))?,
    );
    let bytes: [u8; KEY_LEN] = decoded
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::Corrupt(format!("expected {KEY_LEN} bytes, got {}", decoded.len())))?;
    Ok(KeyMaterial::config_key(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_provider_keeps_one_key_across_clones() {
        let provider = InMemoryKeyProvider::default();
        let first = provider.get_or_create().await.expect("key");
        let second = provider.clone().get_or_create().await.expect("key");

        assert_eq!(first, second);
        assert_eq!(first.id, CONFIG_KEY_ID);
        assert_ne!(InMemoryKeyProvider::default().get_or_create().await.expect("key"), first);
    }

    #[tokio::test]
    async fn reading_never_creates_a_key() {
        let provider = InMemoryKeyProvider::default();
        assert!(matches!(provider.get_existing().await, Err(KeyError::Missing)));
        assert!(matches!(provider.get_existing().await, Err(KeyError::Missing)));

        let created = provider.get_or_create().await.expect("key");
        assert_eq!(provider.get_existing().await.expect("stored"), created);
    }

    #[tokio::test]
    async fn unavailable_provider_never_yields_a_key() {
        let err = UnavailableKeyProvider
            .get_or_create()
            .await
            .expect_err("must be unavailable");
        assert!(matches!(err, KeyError::Unavailable(_)));
    }

    #[test]
    fn corrupt_keyring_values_are_rejected() {
        assert!(matches!(decode_key("abcd"), Err(KeyError::Corrupt(_))));
        assert!(matches!(decode_key("not base64!"), Err(KeyError::Corrupt(_))));
    }

    #[test]
    fn encode_decode_preserves_key_bytes() {
        let key = generate_key();
        let decoded = decode_key(&encode_key(&key)).expect("decode");
        assert_eq!(decoded.bytes, key.bytes);
    }

    #[test]
    fn debug_output_hides_key_bytes() {
        let key = KeyMaterial::config_key([7u8; KEY_LEN]);
        let rendered = format!("{key:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("7, 7"));
    }
}
