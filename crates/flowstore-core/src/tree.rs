//! File-level merkle tree: chunk trees per segment, an upper tree over
//! segment roots, and per-segment inclusion proofs

use crate::file::FlowFile;
use crate::hash::PadHashes;
use crate::merkle::{segment_root, MerkleTree, Proof};
use crate::types::{tree_height, FlowConfig, FlowError, Hash};

/// Merkle commitment over all chunks of a file
///
/// Built segment by segment, so only the segment roots and the last
/// segment's chunk tree are kept in memory.
#[derive(Debug, Clone)]
pub struct FileTree {
    config: FlowConfig,
    pads: PadHashes,
    num_chunks: u64,
    root: Hash,
    /// Tree over segment roots, present when the file spans several segments
    upper: Option<MerkleTree>,
    /// Chunk tree of the last segment
    last_segment: MerkleTree,
}

impl FileTree {
    /// Build the tree for a file. Identical bytes always give the same root.
    pub fn build(file: &FlowFile) -> Result<Self, FlowError> {
        let config = *file.config();
        let pads = PadHashes::new(config.chunk_size);
        let segment_height = config.segment_height();

        let mut segment_roots = Vec::with_capacity(file.num_segments() as usize);
        let mut last_segment = None;
        for segment in file.iterate(false)? {
            let segment = segment?;
            let tree = MerkleTree::from_chunks(&segment.data, config.chunk_size, &pads)
                .ok_or(FlowError::EmptyFile)?;
            segment_roots.push(tree.root_at_height(segment_height));
            last_segment = Some(tree);
        }
        let last_segment = last_segment.ok_or(FlowError::EmptyFile)?;

        let (root, upper) = if segment_roots.len() == 1 {
            (last_segment.root(), None)
        } else {
            let upper = MerkleTree::build(segment_roots, segment_height, &pads)
                .ok_or(FlowError::EmptyFile)?;
            (upper.root(), Some(upper))
        };

        Ok(Self {
            config,
            pads,
            num_chunks: file.num_chunks(),
            root,
            upper,
            last_segment,
        })
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn pads(&self) -> &PadHashes {
        &self.pads
    }

    pub fn num_chunks(&self) -> u64 {
        self.num_chunks
    }

    pub fn num_segments(&self) -> u64 {
        self.upper.as_ref().map_or(1, |u| u.leaf_count() as u64)
    }

    /// Height of the root above the chunk leaves
    pub fn height(&self) -> u32 {
        tree_height(self.num_chunks)
    }

    /// Height of the node a segment proof attests to
    ///
    /// A full segment subtree, unless the whole file fits in one segment, in
    /// which case the segment node is the root itself.
    pub fn segment_proof_height(&self) -> u32 {
        self.config.segment_proof_height(self.num_chunks)
    }

    /// Inclusion proof for a segment
    pub fn proof_at(&self, segment_index: u64) -> Result<Proof, FlowError> {
        let out_of_range = || FlowError::SegmentOutOfRange {
            index: segment_index,
            segments: self.num_segments(),
        };

        match &self.upper {
            Some(upper) => upper.proof(0, segment_index as usize).ok_or_else(out_of_range),
            None if segment_index == 0 => Ok(Proof {
                index: 0,
                height: self.height(),
                siblings: Vec::new(),
            }),
            None => Err(out_of_range()),
        }
    }

    /// Node hash a segment's bytes stand for in its proof
    pub fn segment_node(&self, data: &[u8]) -> Hash {
        segment_root(
            data,
            self.config.chunk_size,
            self.segment_proof_height(),
            &self.pads,
        )
    }

    /// Check segment bytes against this tree's root
    pub fn verify_segment(&self, data: &[u8], proof: &Proof) -> bool {
        proof.height == self.segment_proof_height()
            && proof.verify(&self.root, &self.segment_node(data))
    }

    /// Root of the complete, aligned subtree covering chunks
    /// `[offset, offset + 2^height)`
    ///
    /// Subtrees below segment height are only kept for the last segment.
    pub fn subtree_root(&self, offset: u64, height: u32) -> Option<Hash> {
        let span = 1u64.checked_shl(height)?;
        if offset % span != 0 || offset.checked_add(span)? > self.num_chunks {
            return None;
        }

        let segment_height = self.config.segment_height();
        if let Some(upper) = &self.upper {
            if height >= segment_height {
                return upper.node(height - segment_height, (offset >> height) as usize);
            }
        }

        let segment_chunks = self.config.segment_max_chunks as u64;
        let last_start = (self.num_segments() - 1) * segment_chunks;
        if offset < last_start {
            return None;
        }
        self.last_segment
            .node(height, ((offset - last_start) >> height) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_chunk;

    fn small_config() -> FlowConfig {
        FlowConfig::new(4, 4).unwrap()
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    /// Reference: one flat tree over every chunk
    fn flat_root(bytes: &[u8], config: &FlowConfig) -> Hash {
        let pads = PadHashes::new(config.chunk_size);
        MerkleTree::from_chunks(bytes, config.chunk_size, &pads)
            .unwrap()
            .root()
    }

    #[test]
    fn test_single_chunk_root_is_leaf() {
        let config = small_config();
        let file = FlowFile::from_bytes(vec![5u8, 6], config).unwrap();
        let tree = FileTree::build(&file).unwrap();
        assert_eq!(tree.root(), hash_chunk(&[5, 6], 4));
        assert_eq!(tree.height(), 0);
    }

    #[test]
    fn test_matches_flat_tree() {
        let config = small_config();
        for len in [1, 4, 5, 16, 17, 33, 64, 65, 100, 257] {
            let bytes = data(len);
            let file = FlowFile::from_bytes(bytes.clone(), config).unwrap();
            let tree = FileTree::build(&file).unwrap();
            assert_eq!(tree.root(), flat_root(&bytes, &config), "len {}", len);
        }
    }

    #[test]
    fn test_deterministic_and_sensitive() {
        let config = small_config();
        let bytes = data(90);
        let a = FileTree::build(&FlowFile::from_bytes(bytes.clone(), config).unwrap()).unwrap();
        let b = FileTree::build(&FlowFile::from_bytes(bytes.clone(), config).unwrap()).unwrap();
        assert_eq!(a.root(), b.root());

        let mut changed = bytes;
        changed[77] ^= 1;
        let c = FileTree::build(&FlowFile::from_bytes(changed, config).unwrap()).unwrap();
        assert_ne!(a.root(), c.root());
    }

    #[test]
    fn test_segment_proofs_verify() {
        let config = small_config();
        let bytes = data(90);
        let file = FlowFile::from_bytes(bytes, config).unwrap();
        let tree = FileTree::build(&file).unwrap();
        assert_eq!(tree.num_segments(), 6);

        for segment in file.iterate(false).unwrap() {
            let segment = segment.unwrap();
            let proof = tree.proof_at(segment.index).unwrap();
            assert_eq!(proof.height, 2);
            assert!(tree.verify_segment(&segment.data, &proof));

            let mut corrupted = segment.data.clone();
            corrupted[0] ^= 0xff;
            assert!(!tree.verify_segment(&corrupted, &proof));
        }
        assert!(tree.proof_at(6).is_err());
    }

    #[test]
    fn test_padded_last_segment_verifies() {
        let config = small_config();
        let file = FlowFile::from_bytes(data(21), config).unwrap();
        let tree = FileTree::build(&file).unwrap();

        let last = file.iterate(true).unwrap().last().unwrap().unwrap();
        assert_eq!(last.data.len(), 16);
        let proof = tree.proof_at(last.index).unwrap();
        assert!(tree.verify_segment(&last.data, &proof));
        assert!(tree.verify_segment(&last.data[..8], &proof));
    }

    #[test]
    fn test_single_segment_proof() {
        let config = small_config();
        let file = FlowFile::from_bytes(data(10), config).unwrap();
        let tree = FileTree::build(&file).unwrap();

        let proof = tree.proof_at(0).unwrap();
        assert!(proof.siblings.is_empty());
        assert_eq!(proof.height, 2);
        let segment = file.iterate(true).unwrap().next().unwrap().unwrap();
        assert!(tree.verify_segment(&segment.data, &proof));
        assert!(tree.proof_at(1).is_err());
    }

    #[test]
    fn test_subtree_roots() {
        let config = small_config();
        let bytes = data(4 * 11);
        let file = FlowFile::from_bytes(bytes.clone(), config).unwrap();
        let tree = FileTree::build(&file).unwrap();

        // 11 chunks = 8 + 2 + 1
        let first = flat_root(&bytes[..32], &config);
        assert_eq!(tree.subtree_root(0, 3), Some(first));
        assert_eq!(tree.subtree_root(8, 1), Some(flat_root(&bytes[32..40], &config)));
        assert_eq!(tree.subtree_root(10, 0), Some(hash_chunk(&bytes[40..44], 4)));

        // unaligned or incomplete
        assert_eq!(tree.subtree_root(4, 3), None);
        assert_eq!(tree.subtree_root(8, 2), None);
    }
}
