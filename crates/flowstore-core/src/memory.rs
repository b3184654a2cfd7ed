//! In-memory storage node and ledger
//!
//! Useful for testing and simulation. The node checks every segment proof
//! against the root rebuilt from the anchored submission, and finalizes a
//! file once all of its segments are ingested. Finalized files are served
//! back segment by segment with fresh proofs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::file::FlowFile;
use crate::hash::{keccak256, PadHashes};
use crate::ledger::{Ledger, LedgerError, TxHandle, TxOutcome};
use crate::node::{FileInfo, NodeError, SegmentWithProof, StorageNode};
use crate::submission::Submission;
use crate::tree::FileTree;
use crate::types::{to_hex, FlowConfig, Hash};

#[derive(Debug)]
struct MemoryFile {
    info: FileInfo,
    num_chunks: u64,
    segments: BTreeMap<u64, Vec<u8>>,
    /// Built once every segment is in, to serve proofs on download
    tree: Option<FileTree>,
}

impl MemoryFile {
    fn data(&self) -> Vec<u8> {
        let mut data: Vec<u8> = self.segments.values().flatten().copied().collect();
        data.truncate(self.info.size as usize);
        data
    }
}

#[derive(Debug, Default)]
struct MemoryNodeInner {
    files: HashMap<Hash, MemoryFile>,
    next_tx_seq: u64,
    hidden: bool,
    fail_next_upload: Option<NodeError>,
    file_info_calls: u64,
    upload_calls: u64,
}

/// In-memory storage node
#[derive(Debug, Clone)]
pub struct MemoryNode {
    config: FlowConfig,
    pads: PadHashes,
    inner: Arc<Mutex<MemoryNodeInner>>,
}

impl Default for MemoryNode {
    fn default() -> Self {
        Self::new(FlowConfig::default())
    }
}

impl MemoryNode {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            pads: PadHashes::new(config.chunk_size),
            inner: Arc::new(Mutex::new(MemoryNodeInner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryNodeInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Index a confirmed submission. Returns the rebuilt file root.
    ///
    /// Registering a root again starts a new log entry: the file gets a
    /// fresh `tx_seq` and must be uploaded again before it is finalized.
    pub fn register(&self, submission: &Submission) -> Option<Hash> {
        let root = submission.root(&self.pads)?;
        let mut inner = self.lock();
        let tx_seq = inner.next_tx_seq;
        inner.next_tx_seq += 1;

        inner.files.insert(
            root,
            MemoryFile {
                info: FileInfo {
                    root,
                    size: submission.length,
                    finalized: false,
                    uploaded_segments: 0,
                    tx_seq: Some(tx_seq),
                },
                num_chunks: submission.num_chunks(),
                segments: BTreeMap::new(),
                tree: None,
            },
        );
        Some(root)
    }

    /// Report every file as absent, as a node that never syncs the ledger
    pub fn set_hidden(&self, hidden: bool) {
        self.lock().hidden = hidden;
    }

    /// Fail the next segment upload with the given error
    pub fn fail_next_upload(&self, error: NodeError) {
        self.lock().fail_next_upload = Some(error);
    }

    /// Flip a bit in a stored segment without touching its proof
    pub fn corrupt_segment(&self, root: &Hash, index: u64) -> bool {
        let mut inner = self.lock();
        let Some(byte) = inner
            .files
            .get_mut(root)
            .and_then(|f| f.segments.get_mut(&index))
            .and_then(|data| data.first_mut())
        else {
            return false;
        };
        *byte ^= 1;
        true
    }

    pub fn file_info_calls(&self) -> u64 {
        self.lock().file_info_calls
    }

    pub fn upload_calls(&self) -> u64 {
        self.lock().upload_calls
    }

    pub fn file_count(&self) -> usize {
        self.lock().files.len()
    }

    /// Reassemble the uploaded bytes of a file
    pub fn file_data(&self, root: &Hash) -> Option<Vec<u8>> {
        self.lock().files.get(root).map(MemoryFile::data)
    }

    fn check_segment(&self, file: &MemoryFile, segment: &SegmentWithProof) -> Result<(), NodeError> {
        segment
            .check(&file.info.root, file.num_chunks, &self.config, &self.pads)
            .map_err(|e| NodeError::Rejected(e.to_string()))
    }
}

#[async_trait]
impl StorageNode for MemoryNode {
    async fn get_file_info(&self, root: &Hash) -> Result<Option<FileInfo>, NodeError> {
        let mut inner = self.lock();
        inner.file_info_calls += 1;
        if inner.hidden {
            return Ok(None);
        }
        Ok(inner.files.get(root).map(|f| f.info.clone()))
    }

    async fn upload_segment(&self, segment: &SegmentWithProof) -> Result<(), NodeError> {
        let mut inner = self.lock();
        inner.upload_calls += 1;
        if let Some(err) = inner.fail_next_upload.take() {
            return Err(err);
        }

        let file = inner
            .files
            .get_mut(&segment.root)
            .ok_or_else(|| NodeError::NotFound(to_hex(&segment.root)))?;
        self.check_segment(file, segment)?;

        file.segments.insert(segment.index, segment.data.clone());
        file.info.uploaded_segments = file.segments.len() as u64;
        if file.info.uploaded_segments == self.config.num_segments(file.info.size) {
            let flow_file = FlowFile::from_bytes(file.data(), self.config)
                .map_err(|e| NodeError::Rejected(e.to_string()))?;
            let tree =
                FileTree::build(&flow_file).map_err(|e| NodeError::Rejected(e.to_string()))?;
            file.tree = Some(tree);
            file.info.finalized = true;
        }
        Ok(())
    }

    async fn download_segment(
        &self,
        root: &Hash,
        index: u64,
    ) -> Result<Option<SegmentWithProof>, NodeError> {
        let inner = self.lock();
        if inner.hidden {
            return Ok(None);
        }
        let Some(file) = inner.files.get(root) else {
            return Ok(None);
        };
        let (Some(tree), Some(data)) = (&file.tree, file.segments.get(&index)) else {
            return Ok(None);
        };

        let proof = tree
            .proof_at(index)
            .map_err(|e| NodeError::Rejected(e.to_string()))?;
        Ok(Some(SegmentWithProof {
            root: *root,
            data: data.clone(),
            index,
            proof,
            file_size: file.info.size,
        }))
    }
}

#[derive(Debug, Default)]
struct MemoryLedgerInner {
    pending: HashMap<TxHandle, Submission>,
    submissions: Vec<Submission>,
    nonce: u64,
    fail_next_submit: Option<LedgerError>,
    revert_next: Option<String>,
    reverted: HashMap<TxHandle, String>,
}

/// In-memory ledger; confirmed submissions are indexed by the attached node
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    node: Option<MemoryNode>,
    inner: Arc<Mutex<MemoryLedgerInner>>,
}

impl MemoryLedger {
    pub fn new(node: MemoryNode) -> Self {
        Self {
            node: Some(node),
            inner: Arc::new(Mutex::new(MemoryLedgerInner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryLedgerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All submissions sent so far
    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    pub fn fail_next_submit(&self, error: LedgerError) {
        self.lock().fail_next_submit = Some(error);
    }

    /// Make the next submitted transaction revert on execution
    pub fn revert_next(&self, reason: impl Into<String>) {
        self.lock().revert_next = Some(reason.into());
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn submit_commitment(&self, submission: &Submission) -> Result<TxHandle, LedgerError> {
        let mut inner = self.lock();
        if let Some(err) = inner.fail_next_submit.take() {
            return Err(err);
        }

        let mut preimage = submission.digest().to_vec();
        preimage.extend_from_slice(&inner.nonce.to_be_bytes());
        inner.nonce += 1;
        let tx = TxHandle(keccak256(&preimage));

        if let Some(reason) = inner.revert_next.take() {
            inner.reverted.insert(tx, reason);
        }
        inner.pending.insert(tx, submission.clone());
        inner.submissions.push(submission.clone());
        Ok(tx)
    }

    async fn wait_for_confirmation(
        &self,
        tx: &TxHandle,
        require_success: bool,
    ) -> Result<TxOutcome, LedgerError> {
        let (submission, reverted) = {
            let mut inner = self.lock();
            let submission = inner
                .pending
                .remove(tx)
                .ok_or_else(|| LedgerError::Transport(format!("unknown transaction {}", tx)))?;
            (submission, inner.reverted.remove(tx))
        };

        if let Some(reason) = reverted {
            if require_success {
                return Err(LedgerError::ExecutionFailed(reason));
            }
            return Ok(TxOutcome::Reverted {
                reason: Some(reason),
            });
        }

        if let Some(node) = &self.node {
            node.register(&submission);
        }
        Ok(TxOutcome::Confirmed)
    }
}
