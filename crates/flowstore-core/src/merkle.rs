//! Binary merkle tree over chunk or segment hashes
//!
//! Levels are kept in memory bottom-up. A level with an odd node count pairs
//! its trailing node with the pad hash of that level, which makes the tree
//! identical to one built over zero-padded input.

use crate::hash::{hash_chunk, hash_pair, PadHashes};
use crate::types::Hash;

/// Merkle tree whose leaf level sits at `base_height` in a larger tree
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
    base_height: u32,
    pads: PadHashes,
}

impl MerkleTree {
    /// Build tree from leaf hashes. Returns None for no leaves.
    pub fn build(leaves: Vec<Hash>, base_height: u32, pads: &PadHashes) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }

        let mut levels = vec![leaves];
        while levels[levels.len() - 1].len() > 1 {
            let level = levels.len() - 1;
            let pad = pads.at(base_height + level as u32);
            let next: Vec<Hash> = levels[level]
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pad)))
                .collect();
            levels.push(next);
        }

        Some(Self {
            levels,
            base_height,
            pads: pads.clone(),
        })
    }

    /// Build tree from raw chunk data (last chunk zero-padded)
    pub fn from_chunks(data: &[u8], chunk_size: usize, pads: &PadHashes) -> Option<Self> {
        let leaves = data
            .chunks(chunk_size)
            .map(|chunk| hash_chunk(chunk, chunk_size))
            .collect();
        Self::build(leaves, 0, pads)
    }

    pub fn root(&self) -> Hash {
        self.levels[self.levels.len() - 1][0]
    }

    /// Number of levels above the leaves
    pub fn height(&self) -> u32 {
        (self.levels.len() - 1) as u32
    }

    pub fn base_height(&self) -> u32 {
        self.base_height
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Node at `level` (relative to the leaves) and `index`
    pub fn node(&self, level: u32, index: usize) -> Option<Hash> {
        self.levels.get(level as usize)?.get(index).copied()
    }

    /// Root lifted to `height` levels above the leaves by pairing with pads
    pub fn root_at_height(&self, height: u32) -> Hash {
        let mut root = self.root();
        for level in self.height()..height {
            root = hash_pair(&root, &self.pads.at(self.base_height + level));
        }
        root
    }

    /// Inclusion proof for the node at `level`, `index`
    pub fn proof(&self, level: u32, index: usize) -> Option<Proof> {
        self.node(level, index)?;

        let mut siblings = Vec::with_capacity(self.levels.len() - level as usize - 1);
        let mut idx = index;
        for lvl in level as usize..self.levels.len() - 1 {
            let sibling = self.levels[lvl]
                .get(idx ^ 1)
                .copied()
                .unwrap_or_else(|| self.pads.at(self.base_height + lvl as u32));
            siblings.push(sibling);
            idx >>= 1;
        }

        Some(Proof {
            index: index as u64,
            height: self.base_height + level,
            siblings,
        })
    }
}

/// Inclusion proof: sibling hashes from the proven node up to the root
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Proof {
    /// Index of the proven node within its level
    pub index: u64,
    /// Absolute height of the proven node (0 = chunk leaves)
    pub height: u32,
    /// Sibling hashes, lowest level first
    pub siblings: Vec<Hash>,
}

impl Proof {
    /// Compute the root implied by `node` and this proof
    pub fn compute_root(&self, node: &Hash) -> Option<Hash> {
        let mut hash = *node;
        let mut idx = self.index;
        for sibling in &self.siblings {
            hash = if idx & 1 == 0 {
                hash_pair(&hash, sibling)
            } else {
                hash_pair(sibling, &hash)
            };
            idx >>= 1;
        }
        // index must address a node inside a tree of this depth
        (idx == 0).then_some(hash)
    }

    pub fn verify(&self, root: &Hash, node: &Hash) -> bool {
        self.compute_root(node).as_ref() == Some(root)
    }
}

/// Root of a segment's chunk tree lifted to `height`
///
/// This is the node a segment proof attests to, computable from the segment
/// bytes alone.
pub fn segment_root(data: &[u8], chunk_size: usize, height: u32, pads: &PadHashes) -> Hash {
    match MerkleTree::from_chunks(data, chunk_size, pads) {
        Some(tree) => tree.root_at_height(height),
        None => pads.at(height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::keccak256;

    fn leaf(val: u8) -> Hash {
        [val; 32]
    }

    fn pads() -> PadHashes {
        PadHashes::new(4)
    }

    #[test]
    fn test_empty_leaves() {
        assert!(MerkleTree::build(vec![], 0, &pads()).is_none());
    }

    #[test]
    fn test_single_leaf_is_root() {
        let tree = MerkleTree::build(vec![leaf(7)], 0, &pads()).unwrap();
        assert_eq!(tree.root(), leaf(7));
        assert_eq!(tree.height(), 0);
    }

    #[test]
    fn test_three_leaves_use_pad() {
        let pads = pads();
        let tree = MerkleTree::build(vec![leaf(1), leaf(2), leaf(3)], 0, &pads).unwrap();

        let ab = hash_pair(&leaf(1), &leaf(2));
        let c0 = hash_pair(&leaf(3), &pads.at(0));
        assert_eq!(tree.root(), hash_pair(&ab, &c0));
        assert_eq!(tree.height(), 2);
    }

    #[test]
    fn test_pad_matches_zero_chunks() {
        let pads = pads();
        let data = [9u8, 9, 9, 9, 8, 8, 8, 8, 7, 7];
        let padded = [9u8, 9, 9, 9, 8, 8, 8, 8, 7, 7, 0, 0, 0, 0, 0, 0];

        let a = MerkleTree::from_chunks(&data, 4, &pads).unwrap();
        let b = MerkleTree::from_chunks(&padded, 4, &pads).unwrap();
        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn test_root_at_height_matches_padded_tree() {
        let pads = pads();
        let data = [1u8; 12];
        let mut padded = data.to_vec();
        padded.resize(4 * 16, 0);

        let tree = MerkleTree::from_chunks(&data, 4, &pads).unwrap();
        let full = MerkleTree::from_chunks(&padded, 4, &pads).unwrap();
        assert_eq!(full.height(), 4);
        assert_eq!(tree.root_at_height(4), full.root());
        assert_eq!(segment_root(&data, 4, 4, &pads), full.root());
    }

    #[test]
    fn test_proof_every_leaf() {
        let pads = pads();
        let leaves: Vec<Hash> = (0..7).map(|i| keccak256(&[i])).collect();
        let tree = MerkleTree::build(leaves.clone(), 0, &pads).unwrap();

        for (i, leaf) in leaves.iter().enumerate() {
            let proof = tree.proof(0, i).unwrap();
            assert_eq!(proof.siblings.len(), 3);
            assert!(proof.verify(&tree.root(), leaf), "proof failed for leaf {}", i);
        }
    }

    #[test]
    fn test_proof_for_inner_node() {
        let pads = pads();
        let leaves: Vec<Hash> = (0..8).map(|i| keccak256(&[i])).collect();
        let tree = MerkleTree::build(leaves, 0, &pads).unwrap();

        let node = tree.node(2, 1).unwrap();
        let proof = tree.proof(2, 1).unwrap();
        assert_eq!(proof.height, 2);
        assert!(proof.verify(&tree.root(), &node));
    }

    #[test]
    fn test_proof_rejects_wrong_node_or_index() {
        let pads = pads();
        let leaves: Vec<Hash> = (0..4).map(|i| keccak256(&[i])).collect();
        let tree = MerkleTree::build(leaves.clone(), 0, &pads).unwrap();
        let mut proof = tree.proof(0, 2).unwrap();

        assert!(!proof.verify(&tree.root(), &leaves[1]));

        proof.index = 3;
        assert!(!proof.verify(&tree.root(), &leaves[2]));

        proof.index = 6;
        assert!(!proof.verify(&tree.root(), &leaves[2]));
    }

    #[test]
    fn test_proof_rejects_corrupted_sibling() {
        let pads = pads();
        let leaves: Vec<Hash> = (0..5).map(|i| keccak256(&[i])).collect();
        let tree = MerkleTree::build(leaves.clone(), 0, &pads).unwrap();
        let mut proof = tree.proof(0, 4).unwrap();
        proof.siblings[1][0] ^= 0xff;
        assert!(!proof.verify(&tree.root(), &leaves[4]));
    }

    #[test]
    fn test_out_of_range_proof() {
        let tree = MerkleTree::build(vec![leaf(1), leaf(2)], 0, &pads()).unwrap();
        assert!(tree.proof(0, 2).is_none());
        assert!(tree.proof(5, 0).is_none());
    }

    #[test]
    fn test_base_height_selects_pads() {
        let pads = pads();
        let tree = MerkleTree::build(vec![leaf(1)], 3, &pads).unwrap();
        assert_eq!(tree.root_at_height(1), hash_pair(&leaf(1), &pads.at(3)));
    }
}
