//! Client sessions for the padlink signaling brokers.
//!
//! Three layers, lowest first:
//!
//! - [`plink`]: register a pad at the Peer-Linker, link it to a peer pad
//!   (initiating or authenticating), then exchange opaque payloads.
//! - [`chub`]: advertise channels at the Channel-Hub as a producer, or
//!   list channels and request pads as a consumer.
//! - [`ice`]: use a linked pad pair as the signaling path for ICE
//!   bring-up, then switch to direct peer-to-peer transport.

#![forbid(unsafe_code)]

pub mod chub;
pub mod ice;
pub mod plink;

pub use chub::{ChannelHubClient, ChannelHubParams, ChubClientError, PadRequestHandler};
pub use ice::{
    IceAgent, IceAgentEvent, IceAgentFactory, IceConfig, IceError, IceSession, IceSessionParams,
    SendPacketResult,
};
pub use plink::{
    FnHooks, PeerInfo, PeerLinkerHooks, PeerLinkerParams, PeerLinkerSession, PlinkClientError,
};
