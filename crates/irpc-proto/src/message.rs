//! The on-the-wire [`Message`] and its framing (§3, §4.1).
//!
//! ```text
//! Header[12] | TotalLen:u32 | SPLen:u32 | SP | SMLen:u32 | SM
//!            | MetaLen:u32 | Meta | PayloadLen:u32 | Payload
//! ```
//! All multi-byte integers are big-endian. `TotalLen` counts every byte
//! after itself. `Meta` is a concatenation of `KLen:u32 | K | VLen:u32 | V`
//! records.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::compress::CompressorRegistry;
use crate::error::RpcError;
use crate::header::{HEADER_LEN, Header};
use crate::pool::BufferPool;
use crate::types::{CompressType, MessageStatusType, MessageType, SerializeType};

/// Well-known metadata keys (§4.5, §5, §7).
pub mod meta_key {
    /// Carries a server-reported error's rendered text on an Error response.
    pub const SERVICE_ERROR: &str = "__irpc_error__";
    /// Carries the bearer token / credential checked by `AuthFunc`.
    pub const AUTH_KEY: &str = "__irpc_auth__";
    /// Per-request server-side handler timeout, in milliseconds.
    pub const SERVER_TIMEOUT: &str = "__irpc_timeout_ms__";
}

/// One logical RPC message: the unit of both request and response.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: Header,
    pub service_path: String,
    pub service_method: String,
    /// Ordered-irrelevant mapping; kept as a `Vec` to avoid imposing a hash
    /// function on callers, compared as a multiset in tests.
    pub metadata: Vec<(String, String)>,
    pub payload: Bytes,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            header: Header::default(),
            service_path: String::new(),
            service_method: String::new(),
            metadata: Vec::new(),
            payload: Bytes::new(),
        }
    }
}

impl Message {
    pub fn new_request(service_path: impl Into<String>, service_method: impl Into<String>) -> Self {
        let mut header = Header::default();
        header.set_message_type(MessageType::Request);
        Self {
            header,
            service_path: service_path.into(),
            service_method: service_method.into(),
            ..Default::default()
        }
    }

    pub fn new_response(&self) -> Self {
        let mut response = Self::default();
        response.fill_response_from(self);
        response
    }

    /// Same shape as [`Message::new_response`], but written into `self` in
    /// place rather than allocating a new `Message` — the seam a response
    /// drawn from a [`crate::pool::MessagePool`] fills itself through
    /// (§4.2 step 5).
    pub fn fill_response_from(&mut self, request: &Message) {
        self.reset();
        self.header.seq = request.header.seq;
        self.header.version = request.header.version;
        self.header.set_message_type(MessageType::Response);
        let _ = self
            .header
            .set_serialize_type(request.header.serialize_type().unwrap_or_default());
        self.service_path.push_str(&request.service_path);
        self.service_method.push_str(&request.service_method);
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.header.set_status_type(MessageStatusType::Error);
        self.metadata
            .retain(|(k, _)| k != meta_key::SERVICE_ERROR);
        self.metadata
            .push((meta_key::SERVICE_ERROR.to_string(), message.into()));
    }

    pub fn get_meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Reset to a pristine state; used when returning a `Message` to its
    /// pool (§4.2). Callers must not reference the message after this.
    pub fn reset(&mut self) {
        self.header.reset();
        self.service_path.clear();
        self.service_method.clear();
        self.metadata.clear();
        self.payload = Bytes::new();
    }

    /// Best-effort encode to an owned buffer. If compression fails, falls
    /// back to `None` silently (§4.1 encode-to-slice path is best-effort).
    pub fn encode(&self, compressors: &CompressorRegistry) -> Result<Vec<u8>, RpcError> {
        let (compress_type, payload) = match self.header.compress_type().unwrap_or(CompressType::None) {
            CompressType::None => (CompressType::None, self.payload.to_vec()),
            other => match compressors
                .get(other)
                .and_then(|c| c.compress(&self.payload))
            {
                Ok(compressed) => (other, compressed),
                Err(_) => (CompressType::None, self.payload.to_vec()),
            },
        };

        let mut header = self.header;
        header.set_compress_type(compress_type);
        Ok(self.encode_with(&header, &payload))
    }

    /// Strict encode for the streaming path: compression failures are
    /// surfaced rather than silently downgraded (§4.1).
    pub async fn write_to<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        compressors: &CompressorRegistry,
    ) -> Result<(), RpcError> {
        let compress_type = self.header.compress_type().unwrap_or(CompressType::None);
        let payload = match compress_type {
            CompressType::None => self.payload.to_vec(),
            other => compressors.get(other)?.compress(&self.payload)?,
        };
        let mut header = self.header;
        header.set_compress_type(compress_type);
        let buf = self.encode_with(&header, &payload);
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    fn encode_with(&self, header: &Header, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(header, payload, &mut buf);
        buf
    }

    /// Same framing as [`Message::encode`]/[`Message::write_to`], but
    /// appended onto a caller-supplied buffer (typically drawn from a
    /// [`BufferPool`]) instead of always allocating a fresh one.
    fn encode_into(&self, header: &Header, payload: &[u8], buf: &mut Vec<u8>) {
        let sp = self.service_path.as_bytes();
        let sm = self.service_method.as_bytes();

        let mut meta = Vec::new();
        for (k, v) in &self.metadata {
            meta.extend_from_slice(&(k.len() as u32).to_be_bytes());
            meta.extend_from_slice(k.as_bytes());
            meta.extend_from_slice(&(v.len() as u32).to_be_bytes());
            meta.extend_from_slice(v.as_bytes());
        }

        let body_len = 4 + sp.len() + 4 + sm.len() + 4 + meta.len() + 4 + payload.len();

        buf.clear();
        buf.reserve(HEADER_LEN + 4 + body_len);
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&(body_len as u32).to_be_bytes());
        buf.extend_from_slice(&(sp.len() as u32).to_be_bytes());
        buf.extend_from_slice(sp);
        buf.extend_from_slice(&(sm.len() as u32).to_be_bytes());
        buf.extend_from_slice(sm);
        buf.extend_from_slice(&(meta.len() as u32).to_be_bytes());
        buf.extend_from_slice(&meta);
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
    }

    /// Same as [`Message::write_to`], but draws its encode scratch buffer
    /// from `buffer_pool` instead of allocating one per call (§4.2 step 5).
    pub async fn write_to_pooled<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        compressors: &CompressorRegistry,
        buffer_pool: &BufferPool,
    ) -> Result<(), RpcError> {
        let compress_type = self.header.compress_type().unwrap_or(CompressType::None);
        let payload = match compress_type {
            CompressType::None => self.payload.to_vec(),
            other => compressors.get(other)?.compress(&self.payload)?,
        };
        let mut header = self.header;
        header.set_compress_type(compress_type);

        let mut buf = buffer_pool.get(0);
        self.encode_into(&header, &payload, &mut buf);
        let result = writer.write_all(&buf).await;
        if result.is_ok() {
            writer.flush().await?;
        }
        buffer_pool.put(buf);
        result.map_err(RpcError::Io)
    }

    /// Decode a message already fully buffered in memory.
    pub fn decode(buf: &[u8], compressors: &CompressorRegistry, max_len: Option<u32>) -> Result<Self, RpcError> {
        if buf.len() < HEADER_LEN + 4 {
            return Err(RpcError::MetaKvMissing);
        }
        let mut header_bytes = [0u8; HEADER_LEN];
        header_bytes.copy_from_slice(&buf[..HEADER_LEN]);
        let header = Header::decode(&header_bytes)?;

        let mut cursor = &buf[HEADER_LEN..];
        let total_len = read_u32(&mut cursor)?;
        if let Some(max) = max_len {
            if max > 0 && total_len > max {
                return Err(RpcError::MessageTooLong { len: total_len, max });
            }
        }
        if cursor.len() < total_len as usize {
            return Err(RpcError::MetaKvMissing);
        }
        let mut body = &cursor[..total_len as usize];

        let sp_len = read_u32(&mut body)? as usize;
        let service_path = read_string(&mut body, sp_len)?;

        let sm_len = read_u32(&mut body)? as usize;
        let service_method = read_string(&mut body, sm_len)?;

        let meta_len = read_u32(&mut body)? as usize;
        if body.len() < meta_len {
            return Err(RpcError::MetaKvMissing);
        }
        let mut meta_buf = &body[..meta_len];
        body = &body[meta_len..];
        let metadata = decode_metadata(&mut meta_buf)?;

        let payload_len = read_u32(&mut body)? as usize;
        if body.len() < payload_len {
            return Err(RpcError::MetaKvMissing);
        }
        let raw_payload = &body[..payload_len];

        let compress_type = header.compress_type()?;
        let payload = match compress_type {
            CompressType::None => Bytes::copy_from_slice(raw_payload),
            other => Bytes::from(compressors.get(other)?.decompress(raw_payload)?),
        };

        Ok(Self {
            header,
            service_path,
            service_method,
            metadata,
            payload,
        })
    }

    /// Decode directly from an async stream (used by the server and client
    /// read loops), mirroring the teacher's `read_message` shape but for
    /// the full header+body frame instead of a bare length prefix.
    pub async fn read_from<R: AsyncRead + Unpin>(
        reader: &mut R,
        compressors: &CompressorRegistry,
        max_len: Option<u32>,
    ) -> Result<Self, RpcError> {
        let mut header_bytes = [0u8; HEADER_LEN];
        match reader.read_exact(&mut header_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(RpcError::ConnectionClosed);
            }
            Err(e) => return Err(RpcError::Io(e)),
        }
        if header_bytes[0] != crate::header::MAGIC {
            return Err(RpcError::BadMagic {
                expected: crate::header::MAGIC,
                got: header_bytes[0],
            });
        }
        let header = Header::decode(&header_bytes)?;

        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let total_len = u32::from_be_bytes(len_buf);
        if let Some(max) = max_len {
            if max > 0 && total_len > max {
                return Err(RpcError::MessageTooLong { len: total_len, max });
            }
        }

        let mut body = vec![0u8; total_len as usize];
        reader.read_exact(&mut body).await?;

        let mut cursor: &[u8] = &body;
        let sp_len = read_u32(&mut cursor)? as usize;
        let service_path = read_string(&mut cursor, sp_len)?;
        let sm_len = read_u32(&mut cursor)? as usize;
        let service_method = read_string(&mut cursor, sm_len)?;
        let meta_len = read_u32(&mut cursor)? as usize;
        if cursor.len() < meta_len {
            return Err(RpcError::MetaKvMissing);
        }
        let mut meta_buf = &cursor[..meta_len];
        cursor = &cursor[meta_len..];
        let metadata = decode_metadata(&mut meta_buf)?;
        let payload_len = read_u32(&mut cursor)? as usize;
        if cursor.len() < payload_len {
            return Err(RpcError::MetaKvMissing);
        }
        let raw_payload = &cursor[..payload_len];

        let compress_type = header.compress_type()?;
        let payload = match compress_type {
            CompressType::None => Bytes::copy_from_slice(raw_payload),
            other => Bytes::from(compressors.get(other)?.decompress(raw_payload)?),
        };

        Ok(Self {
            header,
            service_path,
            service_method,
            metadata,
            payload,
        })
    }

    /// Same frame as [`Message::read_from`], but decodes into `self`
    /// in place — reusing its `service_path`/`service_method`/`metadata`
    /// allocations — and draws its body scratch buffer from `buffer_pool`
    /// instead of allocating one per frame (§4.2 step 5). `self` should
    /// come from a [`crate::pool::MessagePool`].
    pub async fn read_from_pooled<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
        compressors: &CompressorRegistry,
        max_len: Option<u32>,
        buffer_pool: &BufferPool,
    ) -> Result<(), RpcError> {
        let mut header_bytes = [0u8; HEADER_LEN];
        match reader.read_exact(&mut header_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(RpcError::ConnectionClosed);
            }
            Err(e) => return Err(RpcError::Io(e)),
        }
        if header_bytes[0] != crate::header::MAGIC {
            return Err(RpcError::BadMagic {
                expected: crate::header::MAGIC,
                got: header_bytes[0],
            });
        }
        let header = Header::decode(&header_bytes)?;

        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let total_len = u32::from_be_bytes(len_buf);
        if let Some(max) = max_len {
            if max > 0 && total_len > max {
                return Err(RpcError::MessageTooLong { len: total_len, max });
            }
        }

        let mut body = buffer_pool.get(total_len as usize);
        reader.read_exact(&mut body).await?;

        let mut cursor: &[u8] = &body;
        let sp_len = read_u32(&mut cursor)? as usize;
        self.service_path.clear();
        read_string_into(&mut cursor, sp_len, &mut self.service_path)?;
        let sm_len = read_u32(&mut cursor)? as usize;
        self.service_method.clear();
        read_string_into(&mut cursor, sm_len, &mut self.service_method)?;
        let meta_len = read_u32(&mut cursor)? as usize;
        if cursor.len() < meta_len {
            return Err(RpcError::MetaKvMissing);
        }
        let mut meta_buf = &cursor[..meta_len];
        cursor = &cursor[meta_len..];
        self.metadata.clear();
        decode_metadata_into(&mut meta_buf, &mut self.metadata)?;
        let payload_len = read_u32(&mut cursor)? as usize;
        if cursor.len() < payload_len {
            return Err(RpcError::MetaKvMissing);
        }
        let raw_payload = &cursor[..payload_len];

        let compress_type = header.compress_type()?;
        self.payload = match compress_type {
            CompressType::None => Bytes::copy_from_slice(raw_payload),
            other => Bytes::from(compressors.get(other)?.decompress(raw_payload)?),
        };
        self.header = header;

        buffer_pool.put(body);
        Ok(())
    }
}

fn read_u32(cursor: &mut &[u8]) -> Result<u32, RpcError> {
    if cursor.len() < 4 {
        return Err(RpcError::MetaKvMissing);
    }
    let (head, tail) = cursor.split_at(4);
    *cursor = tail;
    Ok(u32::from_be_bytes(head.try_into().unwrap()))
}

fn read_string(cursor: &mut &[u8], len: usize) -> Result<String, RpcError> {
    if cursor.len() < len {
        return Err(RpcError::MetaKvMissing);
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    String::from_utf8(head.to_vec()).map_err(|_| RpcError::MetaKvMissing)
}

fn decode_metadata(cursor: &mut &[u8]) -> Result<Vec<(String, String)>, RpcError> {
    let mut out = Vec::new();
    while !cursor.is_empty() {
        let k_len = read_u32(cursor)? as usize;
        let k = read_string(cursor, k_len)?;
        let v_len = read_u32(cursor)? as usize;
        let v = read_string(cursor, v_len)?;
        out.push((k, v));
    }
    Ok(out)
}

/// Like [`read_string`], but appends into an existing `String` instead of
/// allocating a new one — the pooled-decode counterpart used by
/// [`Message::read_from_pooled`].
fn read_string_into(cursor: &mut &[u8], len: usize, out: &mut String) -> Result<(), RpcError> {
    if cursor.len() < len {
        return Err(RpcError::MetaKvMissing);
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    out.push_str(std::str::from_utf8(head).map_err(|_| RpcError::MetaKvMissing)?);
    Ok(())
}

/// Like [`decode_metadata`], but appends into an existing `Vec` instead of
/// allocating a new one.
fn decode_metadata_into(cursor: &mut &[u8], out: &mut Vec<(String, String)>) -> Result<(), RpcError> {
    while !cursor.is_empty() {
        let k_len = read_u32(cursor)? as usize;
        let mut k = String::new();
        read_string_into(cursor, k_len, &mut k)?;
        let v_len = read_u32(cursor)? as usize;
        let mut v = String::new();
        read_string_into(cursor, v_len, &mut v)?;
        out.push((k, v));
    }
    Ok(())
}

/// True if `metadata` contains the same key/value pairs as `other`,
/// ignoring order (§4.1's round-trip guarantee is "as an unordered
/// mapping").
pub fn metadata_eq_unordered(a: &[(String, String)], b: &[(String, String)]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|pair| b.contains(pair))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CompressorRegistry {
        CompressorRegistry::new()
    }

    #[test]
    fn round_trip_basic() {
        let mut msg = Message::new_request("Arith", "Mul");
        msg.metadata.push(("a".into(), "1".into()));
        msg.metadata.push(("b".into(), "2".into()));
        msg.payload = Bytes::from_static(b"hello world");

        let encoded = msg.encode(&registry()).unwrap();
        let decoded = Message::decode(&encoded, &registry(), None).unwrap();

        assert_eq!(decoded.service_path, "Arith");
        assert_eq!(decoded.service_method, "Mul");
        assert_eq!(decoded.payload, msg.payload);
        assert!(metadata_eq_unordered(&decoded.metadata, &msg.metadata));
    }

    #[test]
    fn first_byte_is_always_magic() {
        let msg = Message::new_request("A", "B");
        let encoded = msg.encode(&registry()).unwrap();
        assert_eq!(encoded[0], crate::header::MAGIC);
    }

    #[test]
    fn prefixing_bytes_breaks_magic_check() {
        let msg = Message::new_request("A", "B");
        let mut encoded = msg.encode(&registry()).unwrap();
        encoded.insert(0, 0xff);
        let err = Message::decode(&encoded, &registry(), None).unwrap_err();
        assert!(matches!(err, RpcError::BadMagic { .. }));
    }

    #[test]
    fn truncated_length_field_fails() {
        let msg = Message::new_request("A", "B");
        let encoded = msg.encode(&registry()).unwrap();
        let truncated = &encoded[..encoded.len() - 5];
        let err = Message::decode(truncated, &registry(), None).unwrap_err();
        assert!(matches!(err, RpcError::MetaKvMissing));
    }

    #[test]
    fn message_too_long_is_rejected() {
        let msg = Message::new_request("A", "B");
        let encoded = msg.encode(&registry()).unwrap();
        let err = Message::decode(&encoded, &registry(), Some(4)).unwrap_err();
        assert!(matches!(err, RpcError::MessageTooLong { .. }));
    }

    #[test]
    fn unknown_compressor_fails() {
        let mut msg = Message::new_request("A", "B");
        msg.header.set_compress_type(CompressType::Gzip);
        // Encode bypasses the registry lookup failure by falling back to
        // None (best-effort slice path); force an unknown-compressor wire
        // byte instead to exercise the decode-time check.
        let mut encoded = msg.encode(&registry()).unwrap();
        encoded[2] |= 0b0000_0100; // set compress bits to Gzip (1) post-hoc
        let err = Message::decode(&encoded, &registry(), None).unwrap_err();
        assert!(matches!(err, RpcError::UnsupportedCompressor(_)));
    }

    #[tokio::test]
    async fn read_from_round_trips_with_write_to() {
        let mut msg = Message::new_request("Arith", "Mul");
        msg.payload = Bytes::from_static(b"payload");
        let mut buf = Vec::new();
        msg.write_to(&mut buf, &registry()).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = Message::read_from(&mut cursor, &registry(), None)
            .await
            .unwrap();
        assert_eq!(decoded.payload, msg.payload);
    }

    #[tokio::test]
    async fn read_from_eof_is_connection_closed() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let err = Message::read_from(&mut cursor, &registry(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn pooled_round_trip_reuses_the_decode_target() {
        use crate::pool::BufferPool;

        let mut msg = Message::new_request("Arith", "Mul");
        msg.metadata.push(("a".into(), "1".into()));
        msg.payload = Bytes::from_static(b"payload");

        let buffer_pool = BufferPool::new();
        let mut buf = Vec::new();
        msg.write_to_pooled(&mut buf, &registry(), &buffer_pool)
            .await
            .unwrap();

        // Decode target starts out carrying stale data from a prior use,
        // the way a message drawn from `MessagePool::get` would.
        let mut decoded = Message::new_request("Stale", "Method");
        decoded.metadata.push(("stale".into(), "value".into()));

        let mut cursor = std::io::Cursor::new(buf);
        decoded
            .read_from_pooled(&mut cursor, &registry(), None, &buffer_pool)
            .await
            .unwrap();

        assert_eq!(decoded.service_path, "Arith");
        assert_eq!(decoded.service_method, "Mul");
        assert_eq!(decoded.payload, msg.payload);
        assert!(metadata_eq_unordered(&decoded.metadata, &msg.metadata));
    }
}
