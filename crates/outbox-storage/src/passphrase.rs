//! Passphrase sources and Argon2id key derivation for the passphrase fallback.

use argon2::{Algorithm, Argon2, Params, Version};
use outbox_core::OutboxError;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Environment variable read by [`EnvPassphrase`].
pub const PASSPHRASE_ENV: &str = "OUTBOX_PASSPHRASE";

pub const SALT_LEN: usize = 16;

/// Ceilings for cost parameters read from a document. The envelope is not
/// authenticated until after derivation, so anything above these is refused.
pub const MAX_MEMORY_KIB: u32 = 1024 * 1024;
pub const MAX_ITERATIONS: u32 = 10;
pub const MAX_PARALLELISM: u32 = 16;

/// Why a passphrase is being requested; prompts may ask for confirmation on `Encrypt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassphrasePurpose {
    Encrypt,
    Decrypt,
}

/// Injected strategy for obtaining the passphrase. Returning `None` (or an
/// empty string) means no passphrase is available.
pub trait PassphraseSource: Send + Sync {
    fn passphrase(&self, purpose: PassphrasePurpose) -> Option<Zeroizing<String>>;
}

impl<F> PassphraseSource for F
where
    F: Fn(PassphrasePurpose) -> Option<Zeroizing<String>> + Send + Sync,
{
    fn passphrase(&self, purpose: PassphrasePurpose) -> Option<Zeroizing<String>> {
        self(purpose)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoPassphrase;

impl PassphraseSource for NoPassphrase {
    fn passphrase(&self, _purpose: PassphrasePurpose) -> Option<Zeroizing<String>> {
        None
    }
}

/// Passphrase supplied up front by the caller.
pub struct StaticPassphrase(Zeroizing<String>);

impl StaticPassphrase {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(Zeroizing::new(passphrase.into()))
    }
}

impl PassphraseSource for StaticPassphrase {
    fn passphrase(&self, _purpose: PassphrasePurpose) -> Option<Zeroizing<String>> {
        Some(self.0.clone())
    }
}

/// Reads the passphrase from `OUTBOX_PASSPHRASE` at the time it is needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvPassphrase;

impl PassphraseSource for EnvPassphrase {
    fn passphrase(&self, _purpose: PassphrasePurpose) -> Option<Zeroizing<String>> {
        std::env::var(PASSPHRASE_ENV).ok().map(Zeroizing::new)
    }
}

/// Argon2id cost parameters. Stored in the envelope so documents stay
/// decodable when defaults change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl KdfParams {
    pub fn within_limits(&self) -> bool {
        self.memory_kib <= MAX_MEMORY_KIB
            && (1..=MAX_ITERATIONS).contains(&self.iterations)
            && (1..=MAX_PARALLELISM).contains(&self.parallelism)
    }
}

pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit key from `passphrase` and `salt`.
pub fn derive_key(
    passphrase: &str,
    salt: &[u8],
    params: KdfParams,
) -> Result<Zeroizing<[u8; 32]>, OutboxError> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| OutboxError::storage(format!("invalid argon2 parameters: {e}")))?;

    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| OutboxError::storage(format!("key derivation failed: {e}")))?;
    Ok(key)
}

#[cfg(test)]
pub(crate) fn fast_params() -> KdfParams {
    KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}
