//! Segment-by-segment file download
//!
//! The downloader only trusts the root it was asked for. Every segment is
//! checked against that root before its bytes are kept, and the joined data
//! is cut back to the file size reported by the node.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::hash::PadHashes;
use crate::node::{NodeError, SegmentCheckError, StorageNode};
use crate::types::{to_hex, FlowConfig, Hash};

/// Download error type
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Failed to query storage node: {0}")]
    Node(#[from] NodeError),
    #[error("File {} not found on storage node", to_hex(.0))]
    NotFound(Hash),
    #[error("File {} is not finalized yet", to_hex(.0))]
    NotFinalized(Hash),
    #[error("Storage node has no data for segment {0}")]
    MissingSegment(u64),
    #[error("Segment {index} reported for wrong root or file size")]
    WrongFile { index: u64 },
    #[error("Invalid segment: {0}")]
    InvalidSegment(#[from] SegmentCheckError),
    #[error("File {0} already exists")]
    FileExists(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fetches and verifies finalized files from a storage node
pub struct Downloader {
    node: Arc<dyn StorageNode>,
    config: FlowConfig,
    pads: PadHashes,
}

impl Downloader {
    pub fn new(node: Arc<dyn StorageNode>) -> Self {
        Self::with_config(node, FlowConfig::default())
    }

    pub fn with_config(node: Arc<dyn StorageNode>, config: FlowConfig) -> Self {
        Self {
            node,
            config,
            pads: PadHashes::new(config.chunk_size),
        }
    }

    /// Download the whole file committed to by `root`
    pub async fn download(&self, root: &Hash) -> Result<Vec<u8>, DownloadError> {
        let info = self
            .node
            .get_file_info(root)
            .await?
            .ok_or(DownloadError::NotFound(*root))?;
        if !info.finalized {
            return Err(DownloadError::NotFinalized(*root));
        }

        let num_chunks = self.config.num_chunks(info.size);
        let num_segments = self.config.num_segments(info.size);
        info!(root = %to_hex(root), size = info.size, num_segments, "Downloading file");

        let mut data = Vec::with_capacity(info.size as usize);
        for index in 0..num_segments {
            let segment = self
                .node
                .download_segment(root, index)
                .await?
                .ok_or(DownloadError::MissingSegment(index))?;
            if segment.root != *root || segment.index != index || segment.file_size != info.size {
                return Err(DownloadError::WrongFile { index });
            }
            segment.check(root, num_chunks, &self.config, &self.pads)?;

            debug!(index, len = segment.data.len(), "Segment verified");
            data.extend_from_slice(&segment.data);
        }

        data.truncate(info.size as usize);
        Ok(data)
    }

    /// Download into `path`. Returns the number of bytes written.
    ///
    /// Nothing is written unless every segment verifies.
    pub async fn download_to(
        &self,
        root: &Hash,
        path: impl AsRef<Path>,
        overwrite: bool,
    ) -> Result<u64, DownloadError> {
        let path = path.as_ref();
        if !overwrite && path.exists() {
            return Err(DownloadError::FileExists(path.display().to_string()));
        }

        let data = self.download(root).await?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&data)?;
        file.flush()?;

        info!(path = %path.display(), bytes = data.len(), "Download complete");
        Ok(data.len() as u64)
    }
}
