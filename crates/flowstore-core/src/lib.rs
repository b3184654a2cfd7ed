//! FlowStore - Client for ledger-anchored content-addressed storage
//!
//! Files are split into fixed-size chunks and committed to by a Keccak-256
//! binary merkle root. The commitment is anchored on a ledger, then the file
//! data is streamed to a storage node in segments, each with a proof tying it
//! to the root.
//!
//! # Core Concepts
//!
//! - **Chunk**: Smallest hashed unit (256 bytes by default)
//! - **Segment**: Upload unit of up to 1024 chunks
//! - **Submission**: Ledger commitment made of complete aligned subtrees
//! - **Uploader**: State machine driving submit, upload and finality
//! - **Downloader**: Fetches a finalized file and verifies every segment
//!
//! # Example
//!
//! ```rust
//! use flowstore_core::{FlowConfig, FlowFile, MemoryLedger, MemoryNode, UploadOption, Uploader};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = MemoryNode::default();
//!     let ledger = MemoryLedger::new(node.clone());
//!     let uploader = Uploader::new(Arc::new(node), Arc::new(ledger));
//!
//!     let file = FlowFile::from_bytes(vec![7u8; 10_000], FlowConfig::default())?;
//!     let option = UploadOption::default().with_poll_interval(Duration::from_millis(1));
//!     let report = uploader.upload(&file, &option).await?;
//!     assert_eq!(report.segments_uploaded, 1);
//!
//!     Ok(())
//! }
//! ```

pub mod downloader;
pub mod file;
pub mod hash;
pub mod ledger;
pub mod memory;
pub mod merkle;
pub mod node;
pub mod submission;
pub mod tree;
pub mod types;
pub mod uploader;

pub use downloader::{DownloadError, Downloader};
pub use file::{FlowFile, Segment, SegmentIter};
pub use hash::{hash_chunk, hash_pair, keccak256, PadHashes};
pub use ledger::{Ledger, LedgerError, TxHandle, TxOutcome};
pub use memory::{MemoryLedger, MemoryNode};
pub use merkle::{segment_root, MerkleTree, Proof};
pub use node::{FileInfo, NodeError, SegmentCheckError, SegmentWithProof, StorageNode};
pub use submission::{decompose, Submission, SubmissionNode};
pub use tree::FileTree;
pub use types::{
    from_hex, to_hex, tree_height, FlowConfig, FlowError, Hash, DEFAULT_CHUNK_SIZE,
    DEFAULT_SEGMENT_MAX_CHUNKS, DEFAULT_SEGMENT_SIZE,
};
pub use uploader::{
    UploadError, UploadOption, UploadPhase, UploadReport, UploadState, Uploader,
    DEFAULT_POLL_INTERVAL,
};
