use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use outbox_core::{Backend, KeyPolicy, ProviderKind};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "outbox",
    about = "Send mail through Microsoft Graph, Gmail or SMTP with OAuth device sign-in",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Profile to use; overrides the settings file and OUTBOX_PROFILE.
    #[arg(long, global = true)]
    pub profile: Option<String>,
    /// Settings file (defaults to <config dir>/outbox/settings.toml).
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Render a message into the dry-run directory without sending it.
    DryRun(MessageArgs),
    /// Send a message.
    Send {
        /// ms_graph, google_api or smtp; defaults to the settings file.
        #[arg(long)]
        backend: Option<Backend>,
        /// Fail instead of starting a device sign-in when no token is usable.
        #[arg(long)]
        non_interactive: bool,
        #[command(flatten)]
        message: MessageArgs,
    },
    /// Sign in the account used by a backend with the device-code flow.
    Auth {
        #[arg(long)]
        backend: Option<Backend>,
    },
    /// Re-encrypt the stored configuration under another key policy.
    Rekey {
        #[arg(long, value_enum)]
        to: PolicyArg,
    },
    /// Manage settings and provider accounts.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default settings file if one does not exist.
    Init,
    /// Show resolved paths and configured accounts (never secrets).
    Show,
    /// Add or update the Microsoft account.
    Microsoft {
        #[arg(long)]
        email: String,
        /// Application (client) id; defaults to the settings file.
        #[arg(long)]
        client_id: Option<String>,
        /// organizations, consumers, common, a tenant id or an authority URL.
        #[arg(long)]
        authority: Option<String>,
    },
    /// Add or update the Google account.
    Google {
        #[arg(long)]
        email: String,
        #[arg(long)]
        client_id: Option<String>,
        /// Read the OAuth client secret from a terminal prompt.
        #[arg(long)]
        with_secret: bool,
    },
    /// Remove an account and its cached tokens.
    Remove { provider: ProviderKind },
}

#[derive(Args, Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageArgs {
    /// Sender; defaults to the account's address.
    #[arg(long)]
    pub from: Option<String>,
    #[arg(long, required = true)]
    pub to: Vec<String>,
    #[arg(long)]
    pub cc: Vec<String>,
    #[arg(long)]
    pub bcc: Vec<String>,
    #[arg(long, short, default_value = "")]
    pub subject: String,
    #[arg(long)]
    pub text: Option<String>,
    #[arg(long)]
    pub html: Option<String>,
    /// Files to attach (repeatable).
    #[arg(long = "attach")]
    pub attachments: Vec<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyArg {
    /// OS keyring only.
    Keyring,
    /// Passphrase-derived key only.
    Passphrase,
    /// OS keyring, passphrase when the keyring is unavailable.
    KeyringWithFallback,
}

impl From<PolicyArg> for KeyPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Keyring => KeyPolicy::keyring_only(),
            PolicyArg::Passphrase => KeyPolicy::passphrase_only(),
            PolicyArg::KeyringWithFallback => KeyPolicy::keyring_with_passphrase_fallback(),
        }
    }
}
