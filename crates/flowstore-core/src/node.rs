//! Storage node interface consumed by the uploader and downloader

use async_trait::async_trait;

use crate::hash::PadHashes;
use crate::merkle::{segment_root, Proof};
use crate::types::{FlowConfig, Hash};

/// Storage node's view of a file commitment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub root: Hash,
    /// File size in bytes
    pub size: u64,
    /// True once the commitment is confirmed and every segment ingested
    pub finalized: bool,
    /// Number of segments ingested so far
    pub uploaded_segments: u64,
    /// Ledger sequence number of the anchoring entry
    pub tx_seq: Option<u64>,
}

/// One segment with the proof tying it to the file root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentWithProof {
    pub root: Hash,
    pub data: Vec<u8>,
    pub index: u64,
    pub proof: Proof,
    pub file_size: u64,
}

/// Why a segment does not belong to a file
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentCheckError {
    #[error("segment index {index} out of range")]
    OutOfRange { index: u64 },
    #[error("segment {index} has {len} bytes, expected {expected}")]
    Length { index: u64, len: u64, expected: u64 },
    #[error("segment {index} proof position mismatch")]
    Position { index: u64 },
    #[error("segment {index} proof mismatch")]
    ProofMismatch { index: u64 },
}

impl SegmentWithProof {
    /// Check this segment against `root` for a file of `num_chunks` chunks
    pub fn check(
        &self,
        root: &Hash,
        num_chunks: u64,
        config: &FlowConfig,
        pads: &PadHashes,
    ) -> Result<(), SegmentCheckError> {
        let index = self.index;
        let expected = config
            .segment_len(num_chunks, index)
            .ok_or(SegmentCheckError::OutOfRange { index })?;
        let len = self.data.len() as u64;
        if len != expected {
            return Err(SegmentCheckError::Length {
                index,
                len,
                expected,
            });
        }

        let height = config.segment_proof_height(num_chunks);
        if self.proof.index != index || self.proof.height != height {
            return Err(SegmentCheckError::Position { index });
        }

        let node = segment_root(&self.data, config.chunk_size, height, pads);
        if !self.proof.verify(root, &node) {
            return Err(SegmentCheckError::ProofMismatch { index });
        }
        Ok(())
    }
}

/// Storage node error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Segment rejected: {0}")]
    Rejected(String),
}

/// Storage node RPC surface used for uploads
#[async_trait]
pub trait StorageNode: Send + Sync {
    /// File info by merkle root, None if the node has no log entry for it
    async fn get_file_info(&self, root: &Hash) -> Result<Option<FileInfo>, NodeError>;

    /// Upload one segment; fails on transport or validation error
    async fn upload_segment(&self, segment: &SegmentWithProof) -> Result<(), NodeError>;

    /// Segment `index` of a file with its proof, None if the node does not
    /// hold it
    async fn download_segment(
        &self,
        root: &Hash,
        index: u64,
    ) -> Result<Option<SegmentWithProof>, NodeError>;
}
