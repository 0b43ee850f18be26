//! Frame type and stream cutter.
//!
//! A [`Frame`] is one complete wire packet: the 8-byte header plus a raw
//! body whose layout depends on the kind. The [`FrameCutter`] turns an
//! ordered byte stream into frames using the header's own `size` field as
//! the length prefix.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    PacketHeader,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame.
///
/// Holds raw body bytes, not a decoded payload. Brokers can relay frames
/// without understanding the body; typed accessors live in
/// [`crate::payloads`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message kind (per-protocol numbering).
    pub kind: u16,
    /// Correlation id; 0 for unsolicited notifications.
    pub id: u32,
    /// Raw body bytes.
    pub body: Bytes,
}

impl Frame {
    /// Create a frame from parts.
    pub fn new(kind: u16, id: u32, body: impl Into<Bytes>) -> Self {
        Self { kind, id, body: body.into() }
    }

    /// Create a body-less frame (Success, Error, Unlink, ...).
    #[must_use]
    pub fn empty(kind: u16, id: u32) -> Self {
        Self { kind, id, body: Bytes::new() }
    }

    /// Total encoded length in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        PacketHeader::SIZE + self.body.len()
    }

    /// Encode the frame into `dst`.
    ///
    /// # Errors
    ///
    /// `ProtocolError::FrameOversize` if the body does not fit the u16
    /// `size` field.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let header = PacketHeader::new(self.kind, self.id, self.body.len())?;
        dst.put_slice(&header.to_bytes());
        dst.put_slice(&self.body);
        Ok(())
    }

    /// Encode the frame into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode a frame from a complete, exactly-sized buffer.
    ///
    /// A `size` field that disagrees with `bytes.len()` is a framing
    /// protocol error; transports that see it must drop the connection.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = PacketHeader::from_bytes(bytes)?;
        if header.size() as usize != bytes.len() {
            return Err(ProtocolError::SizeMismatch {
                claimed: header.size() as usize,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            kind: header.kind(),
            id: header.id(),
            body: Bytes::copy_from_slice(&bytes[PacketHeader::SIZE..]),
        })
    }
}

/// Incremental frame splitter for stream transports.
///
/// Feed received bytes in with [`FrameCutter::buffer_mut`] or
/// [`FrameCutter::extend`], then drain complete frames with
/// [`FrameCutter::next_frame`]. Partial frames stay buffered until more
/// bytes arrive.
#[derive(Debug, Default)]
pub struct FrameCutter {
    buf: BytesMut,
}

impl FrameCutter {
    /// Create an empty cutter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Buffer to read into directly (for `AsyncReadExt::read_buf`).
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Cut the next complete frame off the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A `size` field below
    /// the header size is unrecoverable: the stream offset is lost, so the
    /// connection must be dropped.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < PacketHeader::SIZE {
            return Ok(None);
        }
        let size = PacketHeader::from_bytes(&self.buf)?.size() as usize;
        if self.buf.len() < size {
            return Ok(None);
        }
        let frame = self.buf.split_to(size).freeze();
        Ok(Some(Frame {
            kind: u16::from_le_bytes([frame[2], frame[3]]),
            id: u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]),
            body: frame.slice(PacketHeader::SIZE..),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let frame = Frame::new(12, 7, &b"hello"[..]);
        let wire = frame.to_bytes().unwrap();
        assert_eq!(wire.len(), 13);

        let parsed = Frame::decode(&wire).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn decode_rejects_size_mismatch() {
        let mut wire = Frame::new(3, 1, &b"abc"[..]).to_bytes().unwrap().to_vec();
        wire.push(0); // one stray byte after the frame
        let result = Frame::decode(&wire);
        assert_eq!(result, Err(ProtocolError::SizeMismatch { claimed: 11, actual: 12 }));
    }

    #[test]
    fn cutter_splits_back_to_back_frames() {
        let a = Frame::new(1, 10, &b"aa"[..]);
        let b = Frame::new(2, 20, Bytes::new());

        let mut cutter = FrameCutter::new();
        let mut wire = Vec::new();
        a.encode(&mut wire).unwrap();
        b.encode(&mut wire).unwrap();

        // feed a byte at a time; frames must come out whole and in order
        let mut out = Vec::new();
        for byte in wire {
            cutter.extend(&[byte]);
            while let Some(frame) = cutter.next_frame().unwrap() {
                out.push(frame);
            }
        }
        assert_eq!(out, vec![a, b]);
    }

    #[test]
    fn cutter_waits_for_partial_frame() {
        let frame = Frame::new(5, 1, &b"body"[..]);
        let wire = frame.to_bytes().unwrap();

        let mut cutter = FrameCutter::new();
        cutter.extend(&wire[..wire.len() - 1]);
        assert_eq!(cutter.next_frame().unwrap(), None);

        cutter.extend(&wire[wire.len() - 1..]);
        assert_eq!(cutter.next_frame().unwrap(), Some(frame));
    }

    #[test]
    fn cutter_rejects_bad_size_field() {
        // size field of 2 is below the header size
        let mut cutter = FrameCutter::new();
        cutter.extend(&[2, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(cutter.next_frame(), Err(ProtocolError::SizeFieldTooSmall { .. })));
    }
}
