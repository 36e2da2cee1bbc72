use serde::{Deserialize, Serialize};

use crate::error::OutboxError;

/// Where the configuration encryption key may come from.
///
/// No policy stores the document unencrypted: at least one of the OS keyring
/// or a passphrase-derived key must be allowed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyPolicy {
    /// Try the OS keyring first.
    pub prefer_keyring: bool,
    /// Derive a key from a passphrase when the keyring is unavailable or disabled.
    pub allow_passphrase_fallback: bool,
}

impl KeyPolicy {
    /// Build a policy, rejecting combinations with no viable encryption path.
    pub fn new(prefer_keyring: bool, allow_passphrase_fallback: bool) -> Result<Self, OutboxError> {
        let policy = Self {
            prefer_keyring,
            allow_passphrase_fallback,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn keyring_only() -> Self {
        Self {
            prefer_keyring: true,
            allow_passphrase_fallback: false,
        }
    }

    pub fn passphrase_only() -> Self {
        Self {
            prefer_keyring: false,
            allow_passphrase_fallback: true,
        }
    }

    pub fn keyring_with_passphrase_fallback() -> Self {
        Self {
            prefer_keyring: true,
            allow_passphrase_fallback: true,
        }
    }

    pub fn has_viable_path(&self) -> bool {
        self.prefer_keyring || self.allow_passphrase_fallback
    }

    pub fn validate(&self) -> Result<(), OutboxError> {
        if self.has_viable_path() {
            Ok(())
        } else {
            Err(OutboxError::InvalidPolicy {
                reason: "enable prefer_keyring or allow_passphrase_fallback; \
                         configuration is never stored unencrypted"
                    .to_string(),
            })
        }
    }
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self::keyring_only()
    }
}
