//! Hashing utilities using Keccak-256

use sha3::{Digest, Keccak256};

use crate::types::Hash;

/// Compute Keccak-256 hash of data
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute hash of two concatenated hashes (parent = H(left || right))
pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Hash a chunk, zero-padding it to `chunk_size` first
pub fn hash_chunk(chunk: &[u8], chunk_size: usize) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(chunk);
    if chunk.len() < chunk_size {
        hasher.update(vec![0u8; chunk_size - chunk.len()]);
    }
    hasher.finalize().into()
}

/// Pad hashes for every tree level
///
/// pad(0) = H(zero chunk)
/// pad(n) = H(pad(n-1) || pad(n-1))
///
/// pad(n) is the root of an all-zero subtree covering 2^n chunks, so pairing
/// an odd trailing node with it gives the same root as explicit zero padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadHashes {
    levels: Vec<Hash>,
}

/// Levels precomputed; enough for any u64 chunk count
const PAD_LEVELS: usize = 65;

impl PadHashes {
    pub fn new(chunk_size: usize) -> Self {
        let mut levels = Vec::with_capacity(PAD_LEVELS);
        let mut pad = hash_chunk(&[], chunk_size);
        levels.push(pad);
        for _ in 1..PAD_LEVELS {
            pad = hash_pair(&pad, &pad);
            levels.push(pad);
        }
        Self { levels }
    }

    /// Pad hash at the given height
    pub fn at(&self, height: u32) -> Hash {
        self.levels[(height as usize).min(PAD_LEVELS - 1)]
    }
}
