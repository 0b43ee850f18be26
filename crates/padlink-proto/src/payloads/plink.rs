//! Typed Peer-Linker payloads.
//!
//! Only multi-field bodies get a struct; single trailing-string bodies
//! (`RegisterPad`, `ActivateSession`) are built inline with
//! [`crate::FrameBuilder`].

use crate::{
    BodyReader, Frame, FrameBuilder, PlinkKind,
    errors::{ProtocolError, Result},
};

fn check_kind(frame: &Frame, expected: PlinkKind) -> Result<()> {
    if frame.kind == expected.to_u16() {
        Ok(())
    } else {
        Err(ProtocolError::KindMismatch { expected: expected.to_u16(), actual: frame.kind })
    }
}

fn decode_name_and_secret(body: &[u8]) -> Result<(String, Vec<u8>)> {
    let mut reader = BodyReader::new(body);
    let name_len = reader.u16()? as usize;
    let secret_len = reader.u16()? as usize;
    let name = reader.str_of(name_len)?.to_owned();
    let secret = reader.take(secret_len)?.to_vec();
    reader.expect_empty()?;
    Ok((name, secret))
}

/// Ask the broker to link the caller's pad to `requestee`.
///
/// Body: `u16 requestee_len, u16 secret_len, requestee, secret`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Pad the caller wants to link with.
    pub requestee: String,
    /// Opaque secret shown to the authenticator.
    pub secret: Vec<u8>,
}

impl Link {
    /// Encode as a frame with the given request id.
    pub fn to_frame(&self, id: u32) -> Result<Frame> {
        FrameBuilder::new(PlinkKind::Link.to_u16(), id)
            .u16(self.requestee.len() as u16)
            .u16(self.secret.len() as u16)
            .str(&self.requestee)
            .bytes(&self.secret)
            .finish()
    }

    /// Decode from a frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        check_kind(frame, PlinkKind::Link)?;
        let (requestee, secret) = decode_name_and_secret(&frame.body)?;
        Ok(Self { requestee, secret })
    }
}

/// Broker-to-authenticator question: may `requester` link with you?
///
/// Same body layout as [`Link`], sent with id 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkAuth {
    /// Pad asking for the link.
    pub requester: String,
    /// Secret the requester supplied.
    pub secret: Vec<u8>,
}

impl LinkAuth {
    /// Encode as a notification frame (id 0).
    pub fn to_frame(&self) -> Result<Frame> {
        FrameBuilder::new(PlinkKind::LinkAuth.to_u16(), 0)
            .u16(self.requester.len() as u16)
            .u16(self.secret.len() as u16)
            .str(&self.requester)
            .bytes(&self.secret)
            .finish()
    }

    /// Decode from a frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        check_kind(frame, PlinkKind::LinkAuth)?;
        let (requester, secret) = decode_name_and_secret(&frame.body)?;
        Ok(Self { requester, secret })
    }
}

/// Authenticator's verdict on a pending link request.
///
/// Body: `u16 ok, requester_name (trailing)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkAuthResponse {
    /// Whether the link is accepted.
    pub ok: bool,
    /// Pad whose link request is being answered.
    pub requester: String,
}

impl LinkAuthResponse {
    /// Encode as a frame with the given request id.
    pub fn to_frame(&self, id: u32) -> Result<Frame> {
        FrameBuilder::new(PlinkKind::LinkAuthResponse.to_u16(), id)
            .u16(u16::from(self.ok))
            .str(&self.requester)
            .finish()
    }

    /// Decode from a frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        check_kind(frame, PlinkKind::LinkAuthResponse)?;
        let mut reader = BodyReader::new(&frame.body);
        let ok = reader.u16()? != 0;
        let requester = reader.tail_str()?.to_owned();
        Ok(Self { ok, requester })
    }
}
