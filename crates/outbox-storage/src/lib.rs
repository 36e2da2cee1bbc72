//! Encrypted configuration storage.
//!
//! The document is sealed with AES-256-GCM. The key comes from the OS keyring
//! or, when the key policy allows it, from an Argon2id-derived passphrase key.

pub mod config_store;
pub mod key_provider;
pub mod passphrase;
pub mod paths;
pub mod repository;

pub use config_store::{Scheme, SecureConfigStore, DOCUMENT_VERSION};
pub use key_provider::{
    InMemoryKeyProvider, KeyError, KeyMaterial, KeyProvider, KeyringProvider,
    UnavailableKeyProvider,
};
pub use passphrase::{
    EnvPassphrase, KdfParams, NoPassphrase, PassphrasePurpose, PassphraseSource,
    StaticPassphrase, PASSPHRASE_ENV,
};
pub use paths::{AppPaths, Environment, RuntimeContext};
pub use repository::SecureConfigRepository;
