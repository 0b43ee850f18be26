//! Typed Channel-Hub payloads.

use crate::{
    BodyReader, ChubKind, Frame, FrameBuilder,
    errors::{ProtocolError, Result},
};

fn check_kind(frame: &Frame, expected: ChubKind) -> Result<()> {
    if frame.kind == expected.to_u16() {
        Ok(())
    } else {
        Err(ProtocolError::KindMismatch { expected: expected.to_u16(), actual: frame.kind })
    }
}

/// Reply to `GetChannels`: registered channel names in registration order.
///
/// Emitted with a trailing NUL after the last name; the decoder accepts
/// both variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelList {
    /// Channel names, oldest registration first.
    pub names: Vec<String>,
}

impl ChannelList {
    /// Encode as a reply to the request with the given id.
    pub fn to_frame(&self, id: u32) -> Result<Frame> {
        FrameBuilder::new(ChubKind::ChannelList.to_u16(), id)
            .nul_list(self.names.iter().map(String::as_str))
            .finish()
    }

    /// Decode from a frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        check_kind(frame, ChubKind::ChannelList)?;
        Ok(Self { names: BodyReader::new(&frame.body).nul_list()? })
    }
}

/// Producer's answer to a pad request, relayed to the consumer.
///
/// Body: `u16 ok, pad_name (trailing)`. `ok = 0` means denied; the pad
/// name is empty in that case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadRequestResponse {
    /// Whether a pad was created.
    pub ok: bool,
    /// Name of the freshly minted pad; empty when denied.
    pub pad_name: String,
}

impl PadRequestResponse {
    /// A denial reply.
    #[must_use]
    pub fn denied() -> Self {
        Self { ok: false, pad_name: String::new() }
    }

    /// Encode as a frame with the given request id.
    pub fn to_frame(&self, id: u32) -> Result<Frame> {
        FrameBuilder::new(ChubKind::PadRequestResponse.to_u16(), id)
            .u16(u16::from(self.ok))
            .str(&self.pad_name)
            .finish()
    }

    /// Decode from a frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        check_kind(frame, ChubKind::PadRequestResponse)?;
        let mut reader = BodyReader::new(&frame.body);
        let ok = reader.u16()? != 0;
        let pad_name = reader.tail_str()?.to_owned();
        Ok(Self { ok, pad_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_list_round_trip() {
        let list = ChannelList {
            names: vec!["channel1".to_owned(), "channel2".to_owned(), "channel3".to_owned()],
        };
        let frame = list.to_frame(3).unwrap();
        assert_eq!(frame.body.as_ref(), b"channel1\0channel2\0channel3\0");
        assert_eq!(ChannelList::from_frame(&frame).unwrap(), list);
    }

    #[test]
    fn channel_list_accepts_no_trailing_nul() {
        let frame = Frame::new(ChubKind::ChannelList.to_u16(), 1, &b"a\0b"[..]);
        let list = ChannelList::from_frame(&frame).unwrap();
        assert_eq!(list.names, vec!["a", "b"]);
    }

    #[test]
    fn empty_channel_list() {
        let list = ChannelList { names: Vec::new() };
        let frame = list.to_frame(1).unwrap();
        assert!(frame.body.is_empty());
        assert_eq!(ChannelList::from_frame(&frame).unwrap(), list);
    }

    #[test]
    fn pad_response_round_trip() {
        let ok = PadRequestResponse { ok: true, pad_name: "pad_a_1".to_owned() };
        let frame = ok.to_frame(9).unwrap();
        assert_eq!(PadRequestResponse::from_frame(&frame).unwrap(), ok);

        let denied = PadRequestResponse::denied();
        let frame = denied.to_frame(9).unwrap();
        assert_eq!(PadRequestResponse::from_frame(&frame).unwrap(), denied);
    }
}
