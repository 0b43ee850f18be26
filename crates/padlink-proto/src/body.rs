//! Body packing and unpacking helpers.
//!
//! Bodies are packed raw: integers little-endian, strings and byte spans
//! appended as-is with no terminator. Variable-length trailing fields take
//! the rest of the body; string lists are NUL-separated.

use bytes::{BufMut, BytesMut};

use crate::{
    Frame,
    errors::{ProtocolError, Result},
};

/// Builder that packs arguments into a frame body.
///
/// Mirrors the wire rule set: each argument is appended raw and the header
/// `size` is patched when the frame is finished.
#[derive(Debug)]
pub struct FrameBuilder {
    kind: u16,
    id: u32,
    body: BytesMut,
}

impl FrameBuilder {
    /// Start a frame of the given kind and correlation id.
    #[must_use]
    pub fn new(kind: u16, id: u32) -> Self {
        Self { kind, id, body: BytesMut::new() }
    }

    /// Append a little-endian u16.
    #[must_use]
    pub fn u16(mut self, value: u16) -> Self {
        self.body.put_u16_le(value);
        self
    }

    /// Append a little-endian u32.
    #[must_use]
    pub fn u32(mut self, value: u32) -> Self {
        self.body.put_u32_le(value);
        self
    }

    /// Append a string without terminator.
    #[must_use]
    pub fn str(mut self, value: &str) -> Self {
        self.body.put_slice(value.as_bytes());
        self
    }

    /// Append raw bytes.
    #[must_use]
    pub fn bytes(mut self, value: &[u8]) -> Self {
        self.body.put_slice(value);
        self
    }

    /// Append a NUL-separated string list, with a trailing NUL.
    #[must_use]
    pub fn nul_list<'a>(mut self, items: impl IntoIterator<Item = &'a str>) -> Self {
        for item in items {
            self.body.put_slice(item.as_bytes());
            self.body.put_u8(0);
        }
        self
    }

    /// Finish the frame.
    ///
    /// # Errors
    ///
    /// `ProtocolError::FrameOversize` if the body exceeds the u16 size
    /// field.
    pub fn finish(self) -> Result<Frame> {
        let frame = Frame::new(self.kind, self.id, self.body.freeze());
        if frame.encoded_len() > crate::PacketHeader::MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameOversize {
                size: frame.encoded_len(),
                max: crate::PacketHeader::MAX_FRAME_SIZE,
            });
        }
        Ok(frame)
    }
}

/// Cursor over a frame body.
#[derive(Debug)]
pub struct BodyReader<'a> {
    rest: &'a [u8],
}

impl<'a> BodyReader<'a> {
    /// Wrap a body slice.
    #[must_use]
    pub fn new(body: &'a [u8]) -> Self {
        Self { rest: body }
    }

    /// Read a little-endian u16.
    pub fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a little-endian u32.
    pub fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read exactly `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.rest.len() < n {
            return Err(ProtocolError::TruncatedBody { needed: n - self.rest.len() });
        }
        let (head, rest) = self.rest.split_at(n);
        self.rest = rest;
        Ok(head)
    }

    /// Read exactly `n` bytes as UTF-8.
    pub fn str_of(&mut self, n: usize) -> Result<&'a str> {
        std::str::from_utf8(self.take(n)?).map_err(|_| ProtocolError::InvalidString)
    }

    /// Consume the rest of the body.
    #[must_use]
    pub fn tail(self) -> &'a [u8] {
        self.rest
    }

    /// Consume the rest of the body as UTF-8.
    pub fn tail_str(self) -> Result<&'a str> {
        std::str::from_utf8(self.rest).map_err(|_| ProtocolError::InvalidString)
    }

    /// Consume the rest of the body as a NUL-separated string list.
    ///
    /// Accepts lists both with and without a trailing NUL; emitters write
    /// the trailing NUL (see [`FrameBuilder::nul_list`]).
    pub fn nul_list(self) -> Result<Vec<String>> {
        let text = std::str::from_utf8(self.rest).map_err(|_| ProtocolError::InvalidString)?;
        let trimmed = text.strip_suffix('\0').unwrap_or(text);
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        Ok(trimmed.split('\0').map(str::to_owned).collect())
    }

    /// Assert that nothing is left unread.
    pub fn expect_empty(self) -> Result<()> {
        if self.rest.is_empty() { Ok(()) } else { Err(ProtocolError::TrailingBytes(self.rest.len())) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_and_unpack_mixed_fields() {
        let frame = FrameBuilder::new(5, 9)
            .u16(3)
            .u16(6)
            .str("pad")
            .bytes(b"SECRET")
            .finish()
            .unwrap();

        let mut reader = BodyReader::new(&frame.body);
        let name_len = reader.u16().unwrap() as usize;
        let secret_len = reader.u16().unwrap() as usize;
        assert_eq!(reader.str_of(name_len).unwrap(), "pad");
        assert_eq!(reader.take(secret_len).unwrap(), b"SECRET");
        reader.expect_empty().unwrap();
    }

    #[test]
    fn trailing_string_takes_rest() {
        let frame = FrameBuilder::new(3, 1).str("pad name").finish().unwrap();
        assert_eq!(BodyReader::new(&frame.body).tail_str().unwrap(), "pad name");
    }

    #[test]
    fn truncated_read_reports_missing_bytes() {
        let mut reader = BodyReader::new(&[1]);
        assert_eq!(reader.u32(), Err(ProtocolError::TruncatedBody { needed: 3 }));
    }

    #[test]
    fn nul_list_round_trip_with_trailing_nul() {
        let frame = FrameBuilder::new(6, 0).nul_list(["a", "bb", "ccc"]).finish().unwrap();
        assert_eq!(frame.body.as_ref(), b"a\0bb\0ccc\0");
        let names = BodyReader::new(&frame.body).nul_list().unwrap();
        assert_eq!(names, vec!["a", "bb", "ccc"]);
    }

    #[test]
    fn nul_list_accepts_missing_trailing_nul() {
        let names = BodyReader::new(b"a\0bb\0ccc").nul_list().unwrap();
        assert_eq!(names, vec!["a", "bb", "ccc"]);
    }

    #[test]
    fn nul_list_empty_body_is_empty_list() {
        assert!(BodyReader::new(b"").nul_list().unwrap().is_empty());
    }

    #[test]
    fn nul_list_keeps_empty_entries_between_separators() {
        let names = BodyReader::new(b"a\0\0b\0").nul_list().unwrap();
        assert_eq!(names, vec!["a", "", "b"]);
    }
}
