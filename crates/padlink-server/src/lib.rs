//! Peer-Linker and Channel-Hub signaling brokers.
//!
//! Both brokers are sans-IO drivers ([`PeerLinkerDriver`],
//! [`ChannelHubDriver`]) behind a shared [`runtime`] shell: the runtime
//! accepts TCP (optionally TLS) connections, splits the byte stream into
//! frames and feeds [`SessionEvent`]s through the broker lock; the driver
//! answers with [`SessionAction`]s the runtime executes. Session activation
//! (HMAC certificates, optional external verifier) lives in [`activation`].

#![forbid(unsafe_code)]

pub mod activation;
pub mod args;
pub mod channel_hub;
pub mod driver;
pub mod error;
pub mod peer_linker;
pub mod runtime;
pub mod session_key;
pub mod transport;

pub use activation::ActivationConfig;
pub use channel_hub::{ChannelHubDriver, ChubError};
pub use driver::{Broker, SessionAction, SessionEvent};
pub use error::ServerError;
pub use peer_linker::{PeerLinkerDriver, PlinkError};
pub use runtime::{RuntimeConfig, Server};
pub use session_key::{CertificateError, SessionKey};
pub use transport::TlsSettings;
