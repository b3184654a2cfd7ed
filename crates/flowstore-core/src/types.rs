//! Shared types and flow parameters

use serde::{Deserialize, Serialize, Serializer};

/// 32-byte Keccak-256 hash used as content address
pub type Hash = [u8; 32];

/// Default chunk size: 256 bytes
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Default number of chunks per segment
pub const DEFAULT_SEGMENT_MAX_CHUNKS: usize = 1024;

/// Default segment size: 256 KiB
pub const DEFAULT_SEGMENT_SIZE: usize = DEFAULT_CHUNK_SIZE * DEFAULT_SEGMENT_MAX_CHUNKS;

/// Convert hash to hex string
pub fn to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Convert hex string (with or without 0x prefix) to hash
pub fn from_hex(hex_str: &str) -> Result<Hash, hex::FromHexError> {
    let bytes = hex::decode(hex_str.trim_start_matches("0x"))?;
    if bytes.len() != 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

/// Serialize a hash as a hex string
pub fn serialize_hash<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&to_hex(hash))
}

/// Serialize opaque bytes as a hex string
pub fn serialize_bytes_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

/// Errors for malformed input, rejected before any tree is built
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("File is empty")]
    EmptyFile,
    #[error("Invalid flow config: {0}")]
    InvalidConfig(String),
    #[error("Segment index {index} out of range ({segments} segments)")]
    SegmentOutOfRange { index: u64, segments: u64 },
    /// A complete aligned subtree was not found in a built tree. Decomposition
    /// only asks for subtrees inside the chunk count, so this is an internal
    /// invariant violation.
    #[error("No subtree at chunk offset {offset}, height {height}")]
    MissingSubtree { offset: u64, height: u32 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunk and segment geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    pub chunk_size: usize,
    pub segment_max_chunks: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            segment_max_chunks: DEFAULT_SEGMENT_MAX_CHUNKS,
        }
    }
}

impl FlowConfig {
    pub fn new(chunk_size: usize, segment_max_chunks: usize) -> Result<Self, FlowError> {
        let config = Self {
            chunk_size,
            segment_max_chunks,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if self.chunk_size == 0 {
            return Err(FlowError::InvalidConfig("chunk_size must be > 0".to_string()));
        }
        if !self.segment_max_chunks.is_power_of_two() {
            return Err(FlowError::InvalidConfig(
                "segment_max_chunks must be a power of 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Segment size in bytes
    pub fn segment_size(&self) -> usize {
        self.chunk_size * self.segment_max_chunks
    }

    /// Height of a full segment subtree (log2 of chunks per segment)
    pub fn segment_height(&self) -> u32 {
        self.segment_max_chunks.trailing_zeros()
    }

    /// Number of chunks for a file of `size` bytes
    pub fn num_chunks(&self, size: u64) -> u64 {
        size.div_ceil(self.chunk_size as u64)
    }

    /// Number of segments for a file of `size` bytes
    pub fn num_segments(&self, size: u64) -> u64 {
        self.num_chunks(size).div_ceil(self.segment_max_chunks as u64)
    }

    /// Absolute height of the node a segment proof attests to
    ///
    /// A full segment subtree, unless the file fits in one segment, in which
    /// case it is the file root at its natural height.
    pub fn segment_proof_height(&self, num_chunks: u64) -> u32 {
        if num_chunks > self.segment_max_chunks as u64 {
            self.segment_height()
        } else {
            tree_height(num_chunks)
        }
    }

    /// Byte length of segment `index` as transmitted: whole chunks, trimmed
    /// after the last real chunk. None past the last segment.
    pub fn segment_len(&self, num_chunks: u64, index: u64) -> Option<u64> {
        let segment_chunks = self.segment_max_chunks as u64;
        let start = index.checked_mul(segment_chunks)?;
        if start >= num_chunks {
            return None;
        }
        Some((num_chunks - start).min(segment_chunks) * self.chunk_size as u64)
    }
}

/// Height of the smallest binary tree with at least `leaves` leaves
pub fn tree_height(leaves: u64) -> u32 {
    if leaves <= 1 {
        0
    } else {
        64 - (leaves - 1).leading_zeros()
    }
}
