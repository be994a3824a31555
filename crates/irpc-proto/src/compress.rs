//! Compression is an external collaborator (§1 Out of scope): this module
//! only defines the seam a real backend (gzip/zstd/snappy) plugs into, plus
//! the `None` identity implementation needed for the core to round-trip.
//!
//! Per Design Notes, the table is an explicit registry passed to the
//! codec rather than a process-global `init`-time registration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RpcError;
use crate::types::CompressType;

pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, RpcError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, RpcError>;
}

struct Identity;

impl Compressor for Identity {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        Ok(data.to_vec())
    }
}

/// Explicit, constructor-passed table of compressors keyed by
/// [`CompressType`]. `None` is always present; real backends are
/// registered by the embedding application.
#[derive(Clone)]
pub struct CompressorRegistry {
    compressors: HashMap<u8, Arc<dyn Compressor>>,
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        let mut compressors: HashMap<u8, Arc<dyn Compressor>> = HashMap::new();
        compressors.insert(CompressType::None as u8, Arc::new(Identity));
        Self { compressors }
    }
}

impl CompressorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: CompressType, compressor: Arc<dyn Compressor>) {
        self.compressors.insert(kind as u8, compressor);
    }

    pub fn get(&self, kind: CompressType) -> Result<&Arc<dyn Compressor>, RpcError> {
        self.compressors
            .get(&(kind as u8))
            .ok_or(RpcError::UnsupportedCompressor(kind as u8))
    }
}
