//! Upload state machine
//!
//! ```text
//! Start ──absent──▶ Submitting ──▶ AwaitAvailability ──▶ UploadSegments ──▶ AwaitFinality ──▶ Done
//!   │                                                        ▲
//!   ├──present, not finalized────────────────────────────────┘
//!   └──finalized──▶ AlreadyDone (error unless forced)
//! ```
//!
//! Everything runs sequentially on the calling task. The polling loops are
//! the only suspension points; they wait forever unless
//! [`UploadOption::wait_timeout`] is set.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::file::FlowFile;
use crate::ledger::{Ledger, LedgerError, TxHandle, TxOutcome};
use crate::node::{FileInfo, NodeError, SegmentWithProof, StorageNode};
use crate::submission::Submission;
use crate::tree::FileTree;
use crate::types::{to_hex, FlowConfig, FlowError, Hash};

/// Default interval between file info polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Per-call upload options
#[derive(Debug, Clone)]
pub struct UploadOption {
    /// Opaque tags anchored with the submission
    pub tags: Vec<u8>,
    /// Upload even if the file is already finalized
    pub force: bool,
    pub poll_interval: Duration,
    /// Bound on each polling wait. None waits indefinitely.
    pub wait_timeout: Option<Duration>,
}

impl Default for UploadOption {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            force: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: None,
        }
    }
}

impl UploadOption {
    pub fn with_tags(mut self, tags: Vec<u8>) -> Self {
        self.tags = tags;
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }
}

/// States of one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Start,
    Submitting,
    AwaitAvailability,
    UploadSegments,
    AwaitFinality,
    AlreadyDone,
    Done,
}

/// Phase an upload error occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Prepare,
    CheckRemote,
    Submit,
    AwaitAvailability,
    UploadSegments,
    AwaitFinality,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadPhase::Prepare => "prepare file",
            UploadPhase::CheckRemote => "check remote file info",
            UploadPhase::Submit => "submit log entry",
            UploadPhase::AwaitAvailability => "wait for log entry",
            UploadPhase::UploadSegments => "upload segments",
            UploadPhase::AwaitFinality => "wait for finality",
        };
        f.write_str(name)
    }
}

/// Upload error type
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Failed to {phase}: {source}")]
    Input {
        phase: UploadPhase,
        #[source]
        source: FlowError,
    },
    #[error("File {} already exists on storage network", to_hex(.root))]
    AlreadyExists { root: Hash },
    #[error("Log entry not available on storage node and no ledger configured")]
    NoCommitmentPath,
    #[error("Failed to {phase}: {source}")]
    Ledger {
        phase: UploadPhase,
        #[source]
        source: LedgerError,
    },
    #[error("Failed to {phase}: {source}")]
    Node {
        phase: UploadPhase,
        #[source]
        source: NodeError,
    },
    #[error("Timed out after {timeout:?} trying to {phase}")]
    Timeout { phase: UploadPhase, timeout: Duration },
    #[error("Proof for segment {index} does not match file root")]
    InvalidProof { index: u64 },
}

impl UploadError {
    /// Phase the upload failed in
    pub fn phase(&self) -> UploadPhase {
        match self {
            UploadError::Input { phase, .. }
            | UploadError::Ledger { phase, .. }
            | UploadError::Node { phase, .. }
            | UploadError::Timeout { phase, .. } => *phase,
            UploadError::AlreadyExists { .. } | UploadError::NoCommitmentPath => {
                UploadPhase::CheckRemote
            }
            UploadError::InvalidProof { .. } => UploadPhase::UploadSegments,
        }
    }
}

fn is_newer(tx_seq: Option<u64>, after: Option<u64>) -> bool {
    match (tx_seq, after) {
        (_, None) => true,
        (Some(seq), Some(after)) => seq > after,
        (None, Some(_)) => false,
    }
}

fn input_err(phase: UploadPhase) -> impl FnOnce(FlowError) -> UploadError {
    move |source| UploadError::Input { phase, source }
}

fn node_err(phase: UploadPhase) -> impl FnOnce(NodeError) -> UploadError {
    move |source| UploadError::Node { phase, source }
}

fn ledger_err(phase: UploadPhase) -> impl FnOnce(LedgerError) -> UploadError {
    move |source| UploadError::Ledger { phase, source }
}

/// Outcome of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub root: Hash,
    /// States visited, in order
    pub transitions: Vec<UploadState>,
    pub segments_uploaded: u64,
    /// Anchoring transaction, if one was sent
    pub tx: Option<TxHandle>,
    /// Log entry the node finalized
    pub tx_seq: Option<u64>,
}

/// Drives files through submit, upload and finality
pub struct Uploader {
    node: Arc<dyn StorageNode>,
    ledger: Option<Arc<dyn Ledger>>,
    config: FlowConfig,
}

impl Uploader {
    pub fn new(node: Arc<dyn StorageNode>, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            node,
            ledger: Some(ledger),
            config: FlowConfig::default(),
        }
    }

    /// Uploader without ledger access; only files already anchored can be uploaded
    pub fn light(node: Arc<dyn StorageNode>) -> Self {
        Self {
            node,
            ledger: None,
            config: FlowConfig::default(),
        }
    }

    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Open a file from disk and upload it
    pub async fn upload_path(
        &self,
        path: impl AsRef<Path>,
        option: &UploadOption,
    ) -> Result<UploadReport, UploadError> {
        let file = FlowFile::open(path, self.config).map_err(input_err(UploadPhase::Prepare))?;
        self.upload(&file, option).await
    }

    /// Upload a file
    pub async fn upload(
        &self,
        file: &FlowFile,
        option: &UploadOption,
    ) -> Result<UploadReport, UploadError> {
        info!(
            name = %file.name(),
            size = file.size(),
            chunks = file.num_chunks(),
            segments = file.num_segments(),
            "File prepared to upload"
        );

        let tree = FileTree::build(file).map_err(input_err(UploadPhase::Prepare))?;
        let root = tree.root();
        info!(root = %to_hex(&root), "File merkle root calculated");

        let mut report = UploadReport {
            root,
            transitions: Vec::new(),
            segments_uploaded: 0,
            tx: None,
            tx_seq: None,
        };
        let mut remote: Option<FileInfo> = None;
        // entry replaced by a forced re-anchor; finality must come from a newer one
        let mut replaced_tx_seq: Option<u64> = None;
        let mut state = UploadState::Start;

        loop {
            report.transitions.push(state);
            state = match state {
                UploadState::Start => {
                    remote = self
                        .node
                        .get_file_info(&root)
                        .await
                        .map_err(node_err(UploadPhase::CheckRemote))?;
                    debug!(info = ?remote, "Log entry retrieved from storage node");
                    self.next_from_remote(remote.as_ref(), option)?
                }
                UploadState::Submitting => {
                    report.tx = Some(self.submit_log_entry(file, &tree, option).await?);
                    if let Some(info) = &remote {
                        // re-anchored under new tags; the entry is already known
                        replaced_tx_seq = info.tx_seq;
                        UploadState::UploadSegments
                    } else {
                        UploadState::AwaitAvailability
                    }
                }
                UploadState::AwaitAvailability => {
                    self.wait_for_log_entry(&root, false, None, option).await?;
                    UploadState::UploadSegments
                }
                UploadState::UploadSegments => {
                    report.segments_uploaded = self.upload_file(file, &tree).await?;
                    UploadState::AwaitFinality
                }
                UploadState::AwaitFinality => {
                    let info = self
                        .wait_for_log_entry(&root, true, replaced_tx_seq, option)
                        .await?;
                    report.tx_seq = info.tx_seq;
                    UploadState::Done
                }
                UploadState::AlreadyDone => return Err(UploadError::AlreadyExists { root }),
                UploadState::Done => break,
            };
        }

        info!(root = %to_hex(&root), segments = report.segments_uploaded, "Upload completed");
        Ok(report)
    }

    fn next_from_remote(
        &self,
        remote: Option<&FileInfo>,
        option: &UploadOption,
    ) -> Result<UploadState, UploadError> {
        match remote {
            None if self.ledger.is_none() => Err(UploadError::NoCommitmentPath),
            None => Ok(UploadState::Submitting),
            Some(info) if info.finalized && !option.force => Ok(UploadState::AlreadyDone),
            Some(info) if info.finalized && self.ledger.is_some() => Ok(UploadState::Submitting),
            Some(_) => Ok(UploadState::UploadSegments),
        }
    }

    async fn submit_log_entry(
        &self,
        file: &FlowFile,
        tree: &FileTree,
        option: &UploadOption,
    ) -> Result<TxHandle, UploadError> {
        let ledger = self.ledger.as_ref().ok_or(UploadError::NoCommitmentPath)?;

        let submission = Submission::create(tree, file.size(), option.tags.clone())
            .map_err(input_err(UploadPhase::Submit))?;
        debug!(%submission, "Flow submission created");

        let tx = ledger
            .submit_commitment(&submission)
            .await
            .map_err(ledger_err(UploadPhase::Submit))?;
        info!(hash = %tx, "Succeeded to send transaction to append log entry");

        match ledger
            .wait_for_confirmation(&tx, true)
            .await
            .map_err(ledger_err(UploadPhase::Submit))?
        {
            TxOutcome::Confirmed => Ok(tx),
            TxOutcome::Reverted { reason } => Err(UploadError::Ledger {
                phase: UploadPhase::Submit,
                source: LedgerError::ExecutionFailed(
                    reason.unwrap_or_else(|| "reverted".to_string()),
                ),
            }),
        }
    }

    /// Poll until the node has the log entry (and, if asked, finalized it).
    /// With `after` set, entries up to that sequence number are ignored.
    async fn wait_for_log_entry(
        &self,
        root: &Hash,
        finality_required: bool,
        after: Option<u64>,
        option: &UploadOption,
    ) -> Result<FileInfo, UploadError> {
        let phase = if finality_required {
            UploadPhase::AwaitFinality
        } else {
            UploadPhase::AwaitAvailability
        };
        info!(root = %to_hex(root), finality = finality_required, "Wait for log entry on storage node");

        let poll = async {
            loop {
                tokio::time::sleep(option.poll_interval).await;

                match self.node.get_file_info(root).await.map_err(node_err(phase))? {
                    None => continue,
                    Some(info) if finality_required && !info.finalized => continue,
                    Some(info) if !is_newer(info.tx_seq, after) => {
                        debug!(tx_seq = ?info.tx_seq, after = ?after, "Ignoring replaced log entry");
                        continue;
                    }
                    Some(info) => return Ok::<_, UploadError>(info),
                }
            }
        };

        match option.wait_timeout {
            Some(timeout) => tokio::time::timeout(timeout, poll)
                .await
                .map_err(|_| UploadError::Timeout { phase, timeout })?,
            None => poll.await,
        }
    }

    /// Stream segments in order; padding past the last real chunk is never sent
    async fn upload_file(&self, file: &FlowFile, tree: &FileTree) -> Result<u64, UploadError> {
        info!("Begin to upload file");

        let phase = UploadPhase::UploadSegments;
        let chunk_size = file.config().chunk_size as u64;
        let segment_chunks = file.config().segment_max_chunks as u64;
        let num_chunks = file.num_chunks();
        let mut uploaded = 0u64;

        for segment in file.iterate(true).map_err(input_err(phase))? {
            let segment = segment.map_err(input_err(phase))?;
            let start = segment.index * segment_chunks;
            if start >= num_chunks {
                break;
            }

            let mut data = segment.data;
            let seg_chunks = data.len() as u64 / chunk_size;
            let last = start + seg_chunks >= num_chunks;
            if last {
                data.truncate(((num_chunks - start) * chunk_size) as usize);
            }

            let proof = tree.proof_at(segment.index).map_err(input_err(phase))?;
            if !tree.verify_segment(&data, &proof) {
                return Err(UploadError::InvalidProof {
                    index: segment.index,
                });
            }

            let chunk_end = start + data.len() as u64 / chunk_size;
            let request = SegmentWithProof {
                root: tree.root(),
                data,
                index: segment.index,
                proof,
                file_size: file.size(),
            };
            self.node
                .upload_segment(&request)
                .await
                .map_err(node_err(phase))?;
            uploaded += 1;

            debug!(
                total = file.num_segments(),
                index = segment.index,
                chunk_start = start,
                chunk_end,
                "Segment uploaded"
            );

            if last {
                break;
            }
        }

        info!("Completed to upload file");
        Ok(uploaded)
    }
}
