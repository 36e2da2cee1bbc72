//! Core abstractions for Outbox: key policy, configuration model, credential
//! and transport contracts. Implementations live in the sibling crates.

pub mod auth;
pub mod config;
pub mod error;
pub mod message;
pub mod policy;
pub mod repository;
pub mod transport;

pub use auth::{AccessToken, DeviceAuthorization, DeviceCodePrompt, TokenProvider};
pub use config::{
    CachedToken, ConfigDocument, GoogleConfig, MicrosoftConfig, ProviderConfig, ProviderKind,
    SecretString,
};
pub use error::OutboxError;
pub use message::{Attachment, Message};
pub use policy::KeyPolicy;
pub use repository::{ConfigRepository, InMemoryConfigRepository};
pub use transport::{Backend, DeliveryResult, Transport};
