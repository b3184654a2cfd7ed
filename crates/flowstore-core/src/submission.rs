//! Compact on-chain commitment of a file's merkle structure
//!
//! The chunk count is split into its binary representation, largest power of
//! two first. Each piece is a complete, aligned subtree of the file tree and is
//! anchored as `(root, height)`. A verifier can rebuild the file root from the
//! pieces, or append further pieces later.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::hash::{hash_pair, keccak256, PadHashes};
use crate::tree::FileTree;
use crate::types::{serialize_bytes_hex, serialize_hash, to_hex, tree_height, FlowError, Hash};

/// One anchored subtree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmissionNode {
    #[serde(serialize_with = "serialize_hash")]
    pub root: Hash,
    /// log2 of the number of chunks covered
    pub height: u32,
}

impl SubmissionNode {
    pub fn chunks(&self) -> u64 {
        1u64 << self.height
    }
}

/// On-chain anchoring payload for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    /// File size in bytes
    pub length: u64,
    /// Opaque tags, used by storage nodes for indexing
    #[serde(serialize_with = "serialize_bytes_hex")]
    pub tags: Vec<u8>,
    pub nodes: Vec<SubmissionNode>,
}

/// Split `num_chunks` into aligned power-of-two pieces, largest first
///
/// Returns `(chunk_offset, height)` per piece.
pub fn decompose(num_chunks: u64) -> Vec<(u64, u32)> {
    let mut pieces = Vec::with_capacity(num_chunks.count_ones() as usize);
    let mut offset = 0u64;
    for height in (0..64u32).rev() {
        let span = 1u64 << height;
        if num_chunks & span != 0 {
            pieces.push((offset, height));
            offset += span;
        }
    }
    pieces
}

impl Submission {
    /// Create the submission for a built file tree
    pub fn create(tree: &FileTree, length: u64, tags: Vec<u8>) -> Result<Self, FlowError> {
        if length == 0 || tree.num_chunks() == 0 {
            return Err(FlowError::EmptyFile);
        }

        let nodes = decompose(tree.num_chunks())
            .into_iter()
            .map(|(offset, height)| {
                tree.subtree_root(offset, height)
                    .map(|root| SubmissionNode { root, height })
                    .ok_or(FlowError::MissingSubtree { offset, height })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            length,
            tags,
            nodes,
        })
    }

    /// Total chunks covered by all nodes
    pub fn num_chunks(&self) -> u64 {
        self.nodes.iter().map(|n| n.chunks()).sum()
    }

    /// Node heights in submission order
    pub fn heights(&self) -> Vec<u32> {
        self.nodes.iter().map(|n| n.height).collect()
    }

    /// Rebuild the file merkle root from the anchored nodes
    ///
    /// Returns None if the nodes are not aligned largest-first pieces.
    pub fn root(&self, pads: &PadHashes) -> Option<Hash> {
        let total = self.num_chunks();
        if total == 0 {
            return None;
        }

        let mut pieces = HashMap::with_capacity(self.nodes.len());
        let mut offset = 0u64;
        for node in &self.nodes {
            if offset % node.chunks() != 0 {
                return None;
            }
            pieces.insert((offset, node.height), node.root);
            offset += node.chunks();
        }

        subtree(0, tree_height(total), total, &pieces, pads)
    }

    /// Digest over every field, identifying this exact submission
    pub fn digest(&self) -> Hash {
        let mut buf = Vec::with_capacity(16 + self.tags.len() + self.nodes.len() * 36);
        buf.extend_from_slice(&self.length.to_be_bytes());
        buf.extend_from_slice(&(self.tags.len() as u64).to_be_bytes());
        buf.extend_from_slice(&self.tags);
        for node in &self.nodes {
            buf.extend_from_slice(&node.root);
            buf.extend_from_slice(&node.height.to_be_bytes());
        }
        keccak256(&buf)
    }
}

fn subtree(
    offset: u64,
    height: u32,
    total: u64,
    pieces: &HashMap<(u64, u32), Hash>,
    pads: &PadHashes,
) -> Option<Hash> {
    if offset >= total {
        return Some(pads.at(height));
    }
    if let Some(root) = pieces.get(&(offset, height)) {
        return Some(*root);
    }
    if height == 0 {
        return None;
    }

    let half = 1u64 << (height - 1);
    let left = subtree(offset, height - 1, total, pieces, pads)?;
    let right = subtree(offset + half, height - 1, total, pieces, pads)?;
    Some(hash_pair(&left, &right))
}

impl fmt::Display for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ Size: {}, Heights: {:?} }}", self.length, self.heights())
    }
}

impl fmt::Display for SubmissionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", to_hex(&self.root), self.height)
    }
}
