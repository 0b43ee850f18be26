//! Wire protocol for the padlink signaling brokers.
//!
//! Everything on the wire is a [`Frame`]: an 8-byte packed little-endian
//! [`PacketHeader`] (`size`, `kind`, `id`) followed by a kind-specific raw
//! body. The `size` field covers the whole frame and is the length prefix
//! for stream transports; [`FrameCutter`] splits an ordered byte stream
//! back into frames.
//!
//! Kind numbering lives in [`kind`] (one space per broker protocol, sharing
//! a common prefix), typed bodies in [`payloads`].

mod body;
pub mod errors;
mod frame;
mod header;
pub mod kind;
pub mod payloads;

pub use body::{BodyReader, FrameBuilder};
pub use errors::ProtocolError;
pub use frame::{Frame, FrameCutter};
pub use header::PacketHeader;
pub use kind::{ChubKind, IceKind, PlinkKind, common};
