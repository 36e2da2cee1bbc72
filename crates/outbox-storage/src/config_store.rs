use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use outbox_core::{ConfigDocument, KeyPolicy, OutboxError};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use crate::{
    key_provider::KeyProvider,
    passphrase::{
        derive_key, random_salt, KdfParams, NoPassphrase, PassphrasePurpose, PassphraseSource,
        SALT_LEN,
    },
    repository::SecureConfigRepository,
};

/// Envelope version written by this build.
pub const DOCUMENT_VERSION: u32 = 1;

const NONCE_LEN: usize = 12;
const KDF_ALGORITHM: &str = "argon2id";

/// How the document key was obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// AES-256-GCM with a key held in the OS keyring.
    Keyring,
    /// AES-256-GCM with an Argon2id passphrase-derived key.
    Passphrase,
}

impl Scheme {
    fn as_str(&self) -> &'static str {
        match self {
            Scheme::Keyring => "keyring",
            Scheme::Passphrase => "passphrase",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct KdfEnvelope {
    algorithm: String,
    salt: String,
    #[serde(flatten)]
    params: KdfParams,
}

/// On-disk artifact. Never contains key material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct EncryptedDocument {
    version: u32,
    scheme: Scheme,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kdf: Option<KdfEnvelope>,
    nonce: String,
    ciphertext: String,
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

struct SealingKey {
    scheme: Scheme,
    key: Zeroizing<[u8; 32]>,
    kdf: Option<KdfEnvelope>,
}

/// Encrypted, atomically replaced configuration document for one profile.
///
/// The key comes from the injected [`KeyProvider`] (OS keyring in production)
/// or from a passphrase obtained through the injected [`PassphraseSource`],
/// as allowed by the caller's [`KeyPolicy`]. When neither is usable the store
/// fails closed: nothing is written and nothing is stored in plaintext.
///
/// Single-writer: concurrent processes writing the same path are not
/// coordinated beyond the atomic rename.
pub struct SecureConfigStore<P: KeyProvider> {
    path: PathBuf,
    key_provider: P,
    passphrase: Arc<dyn PassphraseSource>,
    kdf: KdfParams,
}

impl<P: KeyProvider> SecureConfigStore<P> {
    pub fn new(path: impl Into<PathBuf>, key_provider: P) -> Self {
        Self {
            path: path.into(),
            key_provider,
            passphrase: Arc::new(NoPassphrase),
            kdf: KdfParams::default(),
        }
    }

    pub fn with_passphrase(self, source: impl PassphraseSource + 'static) -> Self {
        self.with_passphrase_source(Arc::new(source))
    }

    pub fn with_passphrase_source(mut self, source: Arc<dyn PassphraseSource>) -> Self {
        self.passphrase = source;
        self
    }

    /// Cost parameters for newly written passphrase documents.
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf = params;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Bind this store to `policy` as a [`outbox_core::ConfigRepository`].
    pub fn bind(self: &Arc<Self>, policy: KeyPolicy) -> SecureConfigRepository<P> {
        SecureConfigRepository::new(Arc::clone(self), policy)
    }

    /// Encrypt `config` under `policy` and atomically replace the document.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn save(&self, config: &ConfigDocument, policy: &KeyPolicy) -> Result<(), OutboxError> {
        self.save_with(config, policy, self.passphrase.as_ref()).await
    }

    /// Decrypt the document, obtaining the key the way its scheme requires.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self, policy: &KeyPolicy) -> Result<ConfigDocument, OutboxError> {
        let document = read_document(&self.path)?;
        let key = self
            .decryption_key(policy, &document, self.passphrase.as_ref())
            .await?;
        let plaintext = open(&key, &document)?;
        let config = serde_json::from_slice(&plaintext)
            .map_err(|_| OutboxError::decryption("decrypted payload is not a configuration document"))?;
        debug!(scheme = document.scheme.as_str(), "configuration loaded");
        Ok(config)
    }

    /// Re-encrypt the document under a new policy (and optionally a new
    /// passphrase). If the current document cannot be decrypted under `from`,
    /// the file is left untouched.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn rekey(
        &self,
        from: &KeyPolicy,
        to: &KeyPolicy,
        new_passphrase: Option<&dyn PassphraseSource>,
    ) -> Result<(), OutboxError> {
        let config = self.load(from).await?;
        let source = new_passphrase.unwrap_or(self.passphrase.as_ref());
        self.save_with(&config, to, source).await?;
        info!("configuration re-encrypted under new key policy");
        Ok(())
    }

    async fn save_with(
        &self,
        config: &ConfigDocument,
        policy: &KeyPolicy,
        passphrase: &dyn PassphraseSource,
    ) -> Result<(), OutboxError> {
        let key = self.encryption_key(policy, passphrase).await?;
        let plaintext = Zeroizing::new(serde_json::to_vec(config).map_err(OutboxError::storage)?);
        let document = seal(&key, &plaintext)?;
        write_document(&self.path, &document)?;
        info!(scheme = key.scheme.as_str(), "configuration saved");
        Ok(())
    }

    async fn encryption_key(
        &self,
        policy: &KeyPolicy,
        passphrase: &dyn PassphraseSource,
    ) -> Result<SealingKey, OutboxError> {
        if !policy.has_viable_path() {
            return Err(OutboxError::unavailable(
                "key policy allows neither the OS keyring nor a passphrase, \
                 and configuration is never stored unencrypted",
            ));
        }

        let mut keyring_problem = None;
        if policy.prefer_keyring {
            match self.key_provider.get_or_create().await {
                Ok(material) => {
                    return Ok(SealingKey {
                        scheme: Scheme::Keyring,
                        key: Zeroizing::new(material.bytes),
                        kdf: None,
                    })
                }
                Err(err) => {
                    warn!(error = %err, "keyring unavailable");
                    keyring_problem = Some(err.to_string());
                }
            }
        }

        if !policy.allow_passphrase_fallback {
            return Err(OutboxError::unavailable(format!(
                "keyring unavailable ({}) and passphrase fallback is disabled by the key policy",
                keyring_problem.unwrap_or_else(|| "not attempted".to_string())
            )));
        }

        let Some(passphrase) = usable(passphrase.passphrase(PassphrasePurpose::Encrypt)) else {
            return Err(OutboxError::unavailable(match keyring_problem {
                Some(problem) => {
                    format!("keyring unavailable ({problem}) and no passphrase was supplied")
                }
                None => "keyring disabled by the key policy and no passphrase was supplied".to_string(),
            }));
        };

        if !self.kdf.within_limits() {
            return Err(OutboxError::storage(
                "key-derivation parameters exceed what this build will read back",
            ));
        }
        let salt = random_salt();
        let key = derive_off_runtime(passphrase, salt.to_vec(), self.kdf).await?;
        Ok(SealingKey {
            scheme: Scheme::Passphrase,
            key,
            kdf: Some(KdfEnvelope {
                algorithm: KDF_ALGORITHM.to_string(),
                salt: URL_SAFE_NO_PAD.encode(salt),
                params: self.kdf,
            }),
        })
    }

    async fn decryption_key(
        &self,
        policy: &KeyPolicy,
        document: &EncryptedDocument,
        passphrase: &dyn PassphraseSource,
    ) -> Result<Zeroizing<[u8; 32]>, OutboxError> {
        match document.scheme {
            Scheme::Keyring => {
                if !policy.prefer_keyring {
                    return Err(OutboxError::unavailable(
                        "document is protected by the OS keyring but the key policy disables keyring access",
                    ));
                }
                let material = self.key_provider.get_existing().await.map_err(|e| {
                    OutboxError::unavailable(format!(
                        "document is protected by the OS keyring, which is unavailable: {e}"
                    ))
                })?;
                Ok(Zeroizing::new(material.bytes))
            }
            Scheme::Passphrase => {
                if !policy.allow_passphrase_fallback {
                    return Err(OutboxError::unavailable(
                        "document is passphrase-protected but the key policy disables passphrase keys",
                    ));
                }
                let kdf = document
                    .kdf
                    .as_ref()
                    .ok_or_else(|| OutboxError::decryption("missing key-derivation parameters"))?;
                if kdf.algorithm != KDF_ALGORITHM {
                    return Err(OutboxError::decryption(format!(
                        "unsupported key-derivation algorithm {:?}",
                        kdf.algorithm
                    )));
                }
                let passphrase = usable(passphrase.passphrase(PassphrasePurpose::Decrypt))
                    .ok_or_else(|| {
                        OutboxError::unavailable(
                            "document is passphrase-protected; supply the passphrase (OUTBOX_PASSPHRASE)",
                        )
                    })?;
                if !kdf.params.within_limits() {
                    return Err(OutboxError::decryption(
                        "key-derivation parameters are out of range",
                    ));
                }
                let salt = decode_field(&kdf.salt, "salt")?;
                if salt.len() < SALT_LEN {
                    return Err(OutboxError::decryption("salt is too short"));
                }
                derive_off_runtime(passphrase, salt, kdf.params)
                    .await
                    .map_err(|_| OutboxError::decryption("key derivation failed"))
            }
        }
    }
}

/// Argon2id is CPU and memory bound; run it on the blocking pool.
async fn derive_off_runtime(
    passphrase: Zeroizing<String>,
    salt: Vec<u8>,
    params: KdfParams,
) -> Result<Zeroizing<[u8; 32]>, OutboxError> {
    tokio::task::spawn_blocking(move || derive_key(&passphrase, &salt, params))
        .await
        .map_err(|err| OutboxError::storage(format!("key derivation task failed: {err}")))?
}

fn usable(passphrase: Option<Zeroizing<String>>) -> Option<Zeroizing<String>> {
    passphrase.filter(|p| !p.is_empty())
}

fn associated_data(version: u32, scheme: Scheme) -> Vec<u8> {
    format!("outbox-config:v{version}:{}", scheme.as_str()).into_bytes()
}

fn build_cipher(key: &[u8; 32]) -> Result<Aes256Gcm, OutboxError> {
    Aes256Gcm::new_from_slice(key)
        .map_err(|e| OutboxError::storage(format!("cipher init failed: {e}")))
}

fn seal(key: &SealingKey, plaintext: &[u8]) -> Result<EncryptedDocument, OutboxError> {
    let cipher = build_cipher(&key.key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let aad = associated_data(DOCUMENT_VERSION, key.scheme);
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|e| OutboxError::storage(format!("encrypt failed: {e}")))?;

    Ok(EncryptedDocument {
        version: DOCUMENT_VERSION,
        scheme: key.scheme,
        kdf: key.kdf.clone(),
        nonce: URL_SAFE_NO_PAD.encode(nonce.as_slice()),
        ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
    })
}

fn open(key: &[u8; 32], document: &EncryptedDocument) -> Result<Zeroizing<Vec<u8>>, OutboxError> {
    let cipher = build_cipher(key)?;
    let nonce_bytes = decode_field(&document.nonce, "nonce")?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(OutboxError::decryption("nonce has the wrong length"));
    }
    let ciphertext = decode_field(&document.ciphertext, "ciphertext")?;
    let aad = associated_data(document.version, document.scheme);

    cipher
        .decrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &ciphertext,
                aad: &aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| OutboxError::decryption("wrong key or passphrase, or the document was modified"))
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>, OutboxError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| OutboxError::decryption(format!("{field} is not valid base64")))
}

fn read_document(path: &Path) -> Result<EncryptedDocument, OutboxError> {
    let mut file = File::open(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            OutboxError::ConfigNotFound {
                path: path.display().to_string(),
            }
        } else {
            OutboxError::storage(err)
        }
    })?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(OutboxError::storage)?;

    let header: VersionHeader = serde_json::from_slice(&buf)
        .map_err(|_| OutboxError::decryption("file is not an encrypted configuration document"))?;
    if header.version != DOCUMENT_VERSION {
        return Err(OutboxError::UnsupportedVersion {
            found: header.version,
            supported: DOCUMENT_VERSION,
        });
    }

    serde_json::from_slice(&buf).map_err(|_| OutboxError::decryption("encrypted document is malformed"))
}

fn write_document(path: &Path, document: &EncryptedDocument) -> Result<(), OutboxError> {
    let staged = stage_document(path, document)?;
    staged.persist(path).map_err(|e| OutboxError::storage(e.error))?;
    Ok(())
}

/// Write the document to a temp file next to `path` (mode 0600 on unix) and
/// flush it to disk. Nothing at `path` changes until the file is persisted.
fn stage_document(path: &Path, document: &EncryptedDocument) -> Result<NamedTempFile, OutboxError> {
    let parent = path
        .parent()
        .ok_or_else(|| OutboxError::storage("invalid storage path"))?;
    fs::create_dir_all(parent).map_err(OutboxError::storage)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(OutboxError::storage)?;
    let json = serde_json::to_vec_pretty(document).map_err(OutboxError::storage)?;
    tmp.write_all(&json).map_err(OutboxError::storage)?;
    tmp.flush().map_err(OutboxError::storage)?;
    tmp.as_file().sync_all().map_err(OutboxError::storage)?;
    Ok(tmp)
}
