//! The 12-byte message header (§4.3).
//!
//! ```text
//! byte 0      magic number
//! byte 1      version
//! byte 2      bit 7   MessageType (0=Request, 1=Response)
//!             bit 6   Heartbeat
//!             bit 5   Oneway
//!             bits 4:2 CompressType
//!             bits 1:0 MessageStatusType
//! byte 3      SerializeType
//! bytes 4..11 Sequence number, big-endian u64
//! ```

use crate::error::RpcError;
use crate::types::{CompressType, MessageStatusType, MessageType, SerializeType};

/// First byte of every frame. Decoders check this before any allocation.
pub const MAGIC: u8 = 0x1c;

/// Current protocol version.
pub const VERSION: u8 = 1;

pub const HEADER_LEN: usize = 12;

const BIT_MESSAGE_TYPE: u8 = 1 << 7;
const BIT_HEARTBEAT: u8 = 1 << 6;
const BIT_ONEWAY: u8 = 1 << 5;
const MASK_COMPRESS: u8 = 0b0001_1100;
const SHIFT_COMPRESS: u8 = 2;
const MASK_STATUS: u8 = 0b0000_0011;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    flags: u8,
    serialize_type_bits: u8,
    pub seq: u64,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            version: VERSION,
            flags: 0,
            serialize_type_bits: SerializeType::default() as u8,
            seq: 0,
        }
    }
}

impl Header {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn message_type(&self) -> MessageType {
        if self.flags & BIT_MESSAGE_TYPE != 0 {
            MessageType::Response
        } else {
            MessageType::Request
        }
    }

    pub fn set_message_type(&mut self, t: MessageType) -> &mut Self {
        self.set_flag(BIT_MESSAGE_TYPE, matches!(t, MessageType::Response));
        self
    }

    pub fn is_heartbeat(&self) -> bool {
        self.flags & BIT_HEARTBEAT != 0
    }

    pub fn set_heartbeat(&mut self, v: bool) -> &mut Self {
        self.set_flag(BIT_HEARTBEAT, v);
        self
    }

    pub fn is_oneway(&self) -> bool {
        self.flags & BIT_ONEWAY != 0
    }

    pub fn set_oneway(&mut self, v: bool) -> &mut Self {
        self.set_flag(BIT_ONEWAY, v);
        self
    }

    pub fn compress_type(&self) -> Result<CompressType, RpcError> {
        CompressType::from_bits((self.flags & MASK_COMPRESS) >> SHIFT_COMPRESS)
    }

    pub fn set_compress_type(&mut self, c: CompressType) -> &mut Self {
        self.flags = (self.flags & !MASK_COMPRESS) | ((c as u8) << SHIFT_COMPRESS);
        self
    }

    pub fn status_type(&self) -> MessageStatusType {
        if self.flags & MASK_STATUS != 0 {
            MessageStatusType::Error
        } else {
            MessageStatusType::Normal
        }
    }

    pub fn set_status_type(&mut self, s: MessageStatusType) -> &mut Self {
        self.flags = (self.flags & !MASK_STATUS) | (s as u8 & MASK_STATUS);
        self
    }

    pub fn serialize_type(&self) -> Result<SerializeType, RpcError> {
        SerializeType::from_bits(self.serialize_type_bits)
    }

    pub fn set_serialize_type(&mut self, s: SerializeType) -> &mut Self {
        self.serialize_type_bits = s as u8;
        self
    }

    fn set_flag(&mut self, bit: u8, value: bool) {
        if value {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }

    /// Encode into a 12-byte buffer.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = MAGIC;
        buf[1] = self.version;
        buf[2] = self.flags;
        buf[3] = self.serialize_type_bits;
        buf[4..12].copy_from_slice(&self.seq.to_be_bytes());
        buf
    }

    /// Decode from exactly 12 bytes. Checks the magic byte first, before
    /// any further interpretation, per §4.1's invariant.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, RpcError> {
        if buf[0] != MAGIC {
            return Err(RpcError::BadMagic {
                expected: MAGIC,
                got: buf[0],
            });
        }
        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&buf[4..12]);
        Ok(Self {
            version: buf[1],
            flags: buf[2],
            serialize_type_bits: buf[3],
            seq: u64::from_be_bytes(seq_bytes),
        })
    }
}
