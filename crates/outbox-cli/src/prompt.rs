use std::{io::IsTerminal, sync::Mutex};

use outbox_core::{DeviceAuthorization, DeviceCodePrompt};
use outbox_storage::{EnvPassphrase, PassphrasePurpose, PassphraseSource};
use tracing::warn;
use zeroize::Zeroizing;

/// `OUTBOX_PASSPHRASE` first, then a no-echo terminal prompt when stdin is a TTY.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPassphrase {
    /// Ask for a fresh passphrase (rekey) instead of reading the environment.
    pub fresh: bool,
}

impl TerminalPassphrase {
    pub fn fresh() -> Self {
        Self { fresh: true }
    }
}

impl PassphraseSource for TerminalPassphrase {
    fn passphrase(&self, purpose: PassphrasePurpose) -> Option<Zeroizing<String>> {
        if !self.fresh {
            if let Some(passphrase) = EnvPassphrase.passphrase(purpose) {
                return Some(passphrase);
            }
        }
        if !std::io::stdin().is_terminal() {
            return None;
        }

        let label = if self.fresh { "New passphrase: " } else { "Outbox passphrase: " };
        let first = read(label)?;
        if purpose == PassphrasePurpose::Encrypt {
            let confirm = read("Confirm passphrase: ")?;
            if *first != *confirm {
                warn!("passphrases did not match");
                return None;
            }
        }
        Some(first)
    }
}

/// Remembers the first passphrase `inner` yields, so one command prompts at
/// most once even when the document is saved after every token refresh.
pub struct CachedPassphrase<S> {
    inner: S,
    cached: Mutex<Option<Zeroizing<String>>>,
}

impl<S: PassphraseSource> CachedPassphrase<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
        }
    }
}

impl<S: PassphraseSource> PassphraseSource for CachedPassphrase<S> {
    fn passphrase(&self, purpose: PassphrasePurpose) -> Option<Zeroizing<String>> {
        let Ok(mut cached) = self.cached.lock() else {
            return self.inner.passphrase(purpose);
        };
        if let Some(passphrase) = cached.as_ref() {
            return Some(passphrase.clone());
        }
        let passphrase = self.inner.passphrase(purpose).filter(|p| !p.is_empty())?;
        *cached = Some(passphrase.clone());
        Some(passphrase)
    }
}

fn read(label: &str) -> Option<Zeroizing<String>> {
    match rpassword::prompt_password(label) {
        Ok(value) => Some(Zeroizing::new(value)),
        Err(err) => {
            warn!(error = %err, "could not read passphrase");
            None
        }
    }
}

/// Prints device sign-in instructions on stderr so stdout stays scriptable.
pub struct StderrPrompt;

impl DeviceCodePrompt for StderrPrompt {
    fn show(&self, authorization: &DeviceAuthorization) {
        eprintln!();
        eprintln!("{}", authorization.instructions());
        eprintln!(
            "Code: {}  (expires in {} minutes)",
            authorization.user_code,
            authorization.expires_in_secs / 60
        );
        eprintln!();
    }
}
