use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::{ProtocolError, Result};

/// Header: guid (16) + size (4) + type (4) = 24 bytes.
pub const HEADER_SIZE: usize = 24;

/// RDA protocol GUID `{4358458E-C996-4C86-AF4A-98BBF6C91450}` in wire order.
pub const RDA_GUID: [u8; 16] = [
    0x8E, 0x45, 0x58, 0x43, 0x96, 0xC9, 0x86, 0x4C, 0xAF, 0x4A, 0x98, 0xBB, 0xF6, 0xC9, 0x14, 0x50,
];

/// Message type discriminant carried in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Session metadata (channel count, sampling interval, names).
    Start,
    /// 16-bit integer data blocks. Not produced by current servers.
    LegacyData,
    /// Orderly session termination.
    Stop,
    /// 32-bit float data blocks.
    Data,
    /// Emitted by some servers between data blocks; carries nothing useful.
    Undocumented,
    /// Anything else.
    Other(u32),
}

impl MessageKind {
    pub const START: u32 = 1;
    pub const LEGACY_DATA: u32 = 2;
    pub const STOP: u32 = 3;
    pub const DATA: u32 = 4;
    pub const UNDOCUMENTED: u32 = 10000;

    /// Map a wire value to a kind.
    pub fn from_wire(value: u32) -> Self {
        match value {
            Self::START => MessageKind::Start,
            Self::LEGACY_DATA => MessageKind::LegacyData,
            Self::STOP => MessageKind::Stop,
            Self::DATA => MessageKind::Data,
            Self::UNDOCUMENTED => MessageKind::Undocumented,
            other => MessageKind::Other(other),
        }
    }

    /// The wire value of this kind.
    pub fn to_wire(self) -> u32 {
        match self {
            MessageKind::Start => Self::START,
            MessageKind::LegacyData => Self::LEGACY_DATA,
            MessageKind::Stop => Self::STOP,
            MessageKind::Data => Self::DATA,
            MessageKind::Undocumented => Self::UNDOCUMENTED,
            MessageKind::Other(value) => value,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Start => f.write_str("start"),
            MessageKind::LegacyData => f.write_str("legacy-data"),
            MessageKind::Stop => f.write_str("stop"),
            MessageKind::Data => f.write_str("data"),
            MessageKind::Undocumented => f.write_str("undocumented"),
            MessageKind::Other(value) => write!(f, "type-{value}"),
        }
    }
}

/// Fixed-size header preceding every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Protocol signature.
    pub guid: [u8; 16],
    /// Total frame size in bytes, header included.
    pub size: u32,
    /// Message type.
    pub kind: MessageKind,
}

impl MessageHeader {
    /// Create a header with the RDA signature.
    pub fn new(kind: MessageKind, size: u32) -> Self {
        Self {
            guid: RDA_GUID,
            size,
            kind,
        }
    }

    /// Parse a header from its wire bytes. Never fails; the signature is not checked.
    pub fn from_bytes(raw: &[u8; HEADER_SIZE]) -> Self {
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&raw[..16]);
        let size = u32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]);
        let kind = u32::from_le_bytes([raw[20], raw[21], raw[22], raw[23]]);
        Self {
            guid,
            size,
            kind: MessageKind::from_wire(kind),
        }
    }

    /// Append the wire representation to `dst`.
    pub fn put(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.guid);
        dst.put_u32_le(self.size);
        dst.put_u32_le(self.kind.to_wire());
    }

    /// Whether the signature matches [`RDA_GUID`].
    pub fn has_valid_signature(&self) -> bool {
        validate_signature(self)
    }

    /// The signature check as an error value, for logging.
    pub fn signature_error(&self) -> Option<ProtocolError> {
        (!self.has_valid_signature()).then_some(ProtocolError::SignatureMismatch { found: self.guid })
    }

    /// Number of bytes following the header.
    pub fn body_len(&self) -> Result<usize> {
        (self.size as usize)
            .checked_sub(HEADER_SIZE)
            .ok_or(ProtocolError::InvalidSize {
                size: self.size as usize,
                minimum: HEADER_SIZE,
            })
    }
}

/// Byte-wise comparison of the header signature against [`RDA_GUID`].
///
/// Returns false instead of failing; callers log and keep decoding.
pub fn validate_signature(header: &MessageHeader) -> bool {
    header.guid == RDA_GUID
}
