//! Protocol-level enums shared by the header, codec, and every crate built
//! on top of it: message type/status, compression, and serialization.

use crate::error::RpcError;

/// Request vs. response, carried in header byte 2 bit 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request = 0,
    Response = 1,
}

/// Normal vs. error response, carried in header byte 2 bits [1:0].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatusType {
    Normal = 0,
    Error = 1,
}

/// Payload compression, carried in header byte 2 bits [4:2].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressType {
    None = 0,
    Gzip = 1,
    Zstd = 2,
    Snappy = 3,
}

impl CompressType {
    pub fn from_bits(bits: u8) -> Result<Self, RpcError> {
        match bits {
            0 => Ok(Self::None),
            1 => Ok(Self::Gzip),
            2 => Ok(Self::Zstd),
            3 => Ok(Self::Snappy),
            other => Err(RpcError::UnsupportedCompressor(other)),
        }
    }
}

/// Wire serialization of ServicePath/Method arguments, carried in header
/// byte 3. Out-of-scope codecs (Protobuf, Thrift) still get a discriminant
/// so unknown-on-this-build values decode to a typed error rather than a
/// silent panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializeType {
    MsgPack = 0,
    Json = 1,
    Protobuf = 2,
    Thrift = 3,
}

impl SerializeType {
    pub fn from_bits(bits: u8) -> Result<Self, RpcError> {
        match bits {
            0 => Ok(Self::MsgPack),
            1 => Ok(Self::Json),
            2 => Ok(Self::Protobuf),
            3 => Ok(Self::Thrift),
            other => Err(RpcError::UnsupportedSerializer(other)),
        }
    }
}

impl Default for SerializeType {
    fn default() -> Self {
        Self::MsgPack
    }
}
