//! Packet header with zero-copy parsing.
//!
//! Every message on the wire starts with this fixed 8-byte structure,
//! serialized as raw binary (little endian). The `size` field doubles as the
//! length prefix for stream transports: receivers accumulate bytes until a
//! whole frame is present.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Fixed 8-byte packet header (little-endian byte order).
///
/// Fields are stored as raw byte arrays to avoid alignment issues. The
/// `#[repr(C, packed)]` layout with zerocopy traits allows casting directly
/// from untrusted network bytes - every 8-byte pattern is a structurally
/// valid header, so parsing cannot hit undefined behavior.
///
/// # Invariants
///
/// - `size` counts the whole frame in bytes, header included. A header whose
///   `size` is below [`PacketHeader::SIZE`] can never describe a real frame
///   and is rejected during stream cutting.
/// - `id` is the correlation id chosen by the requester; unsolicited
///   server-to-client notifications carry id 0.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PacketHeader {
    size: [u8; 2],
    kind: [u8; 2],
    id: [u8; 4],
}

impl PacketHeader {
    /// Size of the serialized header (8 bytes).
    pub const SIZE: usize = 8;

    /// Maximum total frame size encodable in the u16 `size` field.
    pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

    /// Create a header for a frame with `body_len` body bytes.
    pub fn new(kind: u16, id: u32, body_len: usize) -> Result<Self> {
        let total = Self::SIZE + body_len;
        if total > Self::MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameOversize { size: total, max: Self::MAX_FRAME_SIZE });
        }
        Ok(Self {
            size: (total as u16).to_le_bytes(),
            kind: kind.to_le_bytes(),
            id: id.to_le_bytes(),
        })
    }

    /// Parse a header from the front of `bytes` (zero-copy).
    ///
    /// Only structural validity is checked here; whether `size` matches the
    /// received frame is the caller's concern (it depends on the transport).
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if (header.size() as usize) < Self::SIZE {
            return Err(ProtocolError::SizeFieldTooSmall {
                size: header.size(),
                header: Self::SIZE,
            });
        }

        Ok(header)
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Total frame length in bytes, header included.
    #[must_use]
    pub fn size(&self) -> u16 {
        u16::from_le_bytes(self.size)
    }

    /// Message kind (see the per-protocol kind enums).
    #[must_use]
    pub fn kind(&self) -> u16 {
        u16::from_le_bytes(self.kind)
    }

    /// Correlation id chosen by the requester; 0 for notifications.
    #[must_use]
    pub fn id(&self) -> u32 {
        u32::from_le_bytes(self.id)
    }

    /// Number of body bytes this header describes.
    #[must_use]
    pub fn body_len(&self) -> usize {
        (self.size() as usize).saturating_sub(Self::SIZE)
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketHeader")
            .field("size", &self.size())
            .field("kind", &self.kind())
            .field("id", &self.id())
            .finish()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for PacketHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PacketHeader {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<PacketHeader>(), PacketHeader::SIZE);
        assert_eq!(PacketHeader::SIZE, 8);
    }

    #[test]
    fn round_trip() {
        let header = PacketHeader::new(5, 0x1234_5678, 100).unwrap();
        let bytes = header.to_bytes();
        let parsed = PacketHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.size(), 108);
        assert_eq!(parsed.kind(), 5);
        assert_eq!(parsed.id(), 0x1234_5678);
        assert_eq!(parsed.body_len(), 100);
    }

    #[test]
    fn little_endian_layout() {
        let header = PacketHeader::new(0x0102, 0x0304_0506, 0).unwrap();
        assert_eq!(header.to_bytes(), [8, 0, 0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
    }

    #[test]
    fn reject_short_buffer() {
        let result = PacketHeader::from_bytes(&[0u8; 4]);
        assert_eq!(result, Err(ProtocolError::FrameTooShort { expected: 8, actual: 4 }));
    }

    #[test]
    fn reject_undersized_size_field() {
        // size field of 4 cannot even cover the header
        let bytes = [4, 0, 0, 0, 0, 0, 0, 0];
        let result = PacketHeader::from_bytes(&bytes);
        assert_eq!(result, Err(ProtocolError::SizeFieldTooSmall { size: 4, header: 8 }));
    }

    #[test]
    fn reject_oversized_body() {
        let result = PacketHeader::new(0, 0, PacketHeader::MAX_FRAME_SIZE);
        assert!(matches!(result, Err(ProtocolError::FrameOversize { .. })));
    }
}
