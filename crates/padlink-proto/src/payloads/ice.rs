//! ICE signaling messages.
//!
//! These ride between linked peers as inner frames inside Peer-Linker
//! `Payload` bodies: the broker relays the bytes opaquely, and each peer
//! runs the same frame codec on the payload body. Inner frames are
//! notifications (id 0, no acknowledgements); candidate exchange is
//! asynchronous by nature.

use bytes::Bytes;

use crate::{
    Frame, FrameBuilder, IceKind,
    errors::{ProtocolError, Result},
};

/// One ICE signaling message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IceMessage {
    /// Local session description of the sending peer.
    SessionDescription(String),
    /// One trickled candidate.
    Candidate(String),
    /// The sending peer finished gathering candidates.
    GatheringDone,
}

impl IceMessage {
    /// Encode as an inner frame, ready to be sent as a `Payload` body.
    pub fn encode(&self) -> Result<Bytes> {
        let frame = match self {
            Self::SessionDescription(sdp) => {
                FrameBuilder::new(IceKind::SessionDescription.to_u16(), 0).str(sdp).finish()?
            },
            Self::Candidate(sdp) => {
                FrameBuilder::new(IceKind::Candidate.to_u16(), 0).str(sdp).finish()?
            },
            Self::GatheringDone => Frame::empty(IceKind::GatheringDone.to_u16(), 0),
        };
        frame.to_bytes()
    }

    /// Decode from a `Payload` body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let frame = Frame::decode(body)?;
        let kind = IceKind::from_u16(frame.kind).ok_or(ProtocolError::UnknownKind(frame.kind))?;
        Ok(match kind {
            IceKind::SessionDescription => Self::SessionDescription(
                std::str::from_utf8(&frame.body).map_err(|_| ProtocolError::InvalidString)?.to_owned(),
            ),
            IceKind::Candidate => Self::Candidate(
                std::str::from_utf8(&frame.body).map_err(|_| ProtocolError::InvalidString)?.to_owned(),
            ),
            IceKind::GatheringDone => Self::GatheringDone,
        })
    }
}
