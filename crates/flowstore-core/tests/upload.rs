//! Upload state machine against the in-memory node and ledger

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use flowstore_core::{
    FileInfo, FileTree, FlowConfig, FlowError, FlowFile, Hash, LedgerError, MemoryLedger,
    MemoryNode, NodeError, SegmentWithProof, StorageNode, Submission, UploadError, UploadOption,
    UploadPhase, UploadState, Uploader,
};

use UploadState::*;

fn make_uploader(config: FlowConfig) -> (MemoryNode, MemoryLedger, Uploader) {
    let node = MemoryNode::new(config);
    let ledger = MemoryLedger::new(node.clone());
    let uploader =
        Uploader::new(Arc::new(node.clone()), Arc::new(ledger.clone())).with_config(config);
    (node, ledger, uploader)
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill(&mut data[..]);
    data
}

fn small_config() -> FlowConfig {
    FlowConfig::new(16, 4).unwrap()
}

mod fresh {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_single_segment_file() {
        let (node, ledger, uploader) = make_uploader(FlowConfig::default());
        let data = random_bytes(10 * 1024);
        let file = FlowFile::from_bytes(data.clone(), FlowConfig::default()).unwrap();

        let report = uploader.upload(&file, &UploadOption::default()).await.unwrap();

        assert_eq!(
            report.transitions,
            vec![Start, Submitting, AwaitAvailability, UploadSegments, AwaitFinality, Done]
        );
        assert_eq!(report.segments_uploaded, 1);
        assert!(report.tx.is_some());

        let submissions = ledger.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].length, 10 * 1024);
        assert_eq!(submissions[0].heights(), vec![5, 3]);

        let info = node.file_info_calls();
        assert!(info >= 3, "expected remote check plus two polls, got {}", info);
        assert_eq!(node.upload_calls(), 1);
        assert_eq!(node.file_data(&report.root), Some(data));
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_segment_file() {
        let config = small_config();
        let (node, _ledger, uploader) = make_uploader(config);
        // 19 chunks, 5 segments, last one partial
        let data = random_bytes(300);
        let file = FlowFile::from_bytes(data.clone(), config).unwrap();

        let report = uploader.upload(&file, &UploadOption::default()).await.unwrap();

        assert_eq!(report.segments_uploaded, 5);
        assert_eq!(node.upload_calls(), 5);
        assert_eq!(node.file_data(&report.root), Some(data));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_path() {
        let config = small_config();
        let (node, _ledger, uploader) = make_uploader(config);
        let data = random_bytes(100);
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();

        let report = uploader
            .upload_path(tmp.path(), &UploadOption::default())
            .await
            .unwrap();

        let file = FlowFile::from_bytes(data.clone(), config).unwrap();
        assert_eq!(report.root, FileTree::build(&file).unwrap().root());
        assert_eq!(node.file_data(&report.root), Some(data));
    }

    #[tokio::test]
    async fn test_empty_file_rejected_before_io() {
        let (node, ledger, uploader) = make_uploader(small_config());
        let tmp = tempfile::NamedTempFile::new().unwrap();

        let err = uploader
            .upload_path(tmp.path(), &UploadOption::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Input {
                phase: UploadPhase::Prepare,
                source: FlowError::EmptyFile
            }
        ));
        assert_eq!(node.file_info_calls(), 0);
        assert!(ledger.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tags_are_anchored() {
        let (_node, ledger, uploader) = make_uploader(small_config());
        let file = FlowFile::from_bytes(random_bytes(40), small_config()).unwrap();

        let option = UploadOption::default().with_tags(vec![0xca, 0xfe]);
        uploader.upload(&file, &option).await.unwrap();

        assert_eq!(ledger.submissions()[0].tags, vec![0xca, 0xfe]);
    }
}

mod existing {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_finalized_file_already_exists() {
        let config = small_config();
        let (node, ledger, uploader) = make_uploader(config);
        let file = FlowFile::from_bytes(random_bytes(64), config).unwrap();
        let first = uploader.upload(&file, &UploadOption::default()).await.unwrap();

        let info_calls = node.file_info_calls();
        let upload_calls = node.upload_calls();

        let err = uploader
            .upload(&file, &UploadOption::default())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::AlreadyExists { root } if root == first.root));
        assert_eq!(node.file_info_calls(), info_calls + 1);
        assert_eq!(node.upload_calls(), upload_calls);
        assert_eq!(ledger.submissions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_upload_reanchors() {
        let config = small_config();
        let (node, ledger, uploader) = make_uploader(config);
        let file = FlowFile::from_bytes(random_bytes(64), config).unwrap();
        uploader.upload(&file, &UploadOption::default()).await.unwrap();

        let option = UploadOption::default().force().with_tags(vec![1]);
        let report = uploader.upload(&file, &option).await.unwrap();

        assert_eq!(
            report.transitions,
            vec![Start, Submitting, UploadSegments, AwaitFinality, Done]
        );
        assert_eq!(ledger.submissions().len(), 2);
        assert_eq!(ledger.submissions()[1].tags, vec![1]);
        assert_eq!(node.upload_calls(), 2);
        assert_eq!(report.tx_seq, Some(1));
    }

    /// Node that keeps reporting an old entry for a few queries
    struct LaggingNode {
        inner: MemoryNode,
        stale: Mutex<(FileInfo, u32)>,
    }

    #[async_trait]
    impl StorageNode for LaggingNode {
        async fn get_file_info(&self, root: &Hash) -> Result<Option<FileInfo>, NodeError> {
            {
                let mut stale = self.stale.lock().unwrap();
                if stale.1 > 0 {
                    stale.1 -= 1;
                    return Ok(Some(stale.0.clone()));
                }
            }
            self.inner.get_file_info(root).await
        }

        async fn upload_segment(&self, segment: &SegmentWithProof) -> Result<(), NodeError> {
            self.inner.upload_segment(segment).await
        }

        async fn download_segment(
            &self,
            root: &Hash,
            index: u64,
        ) -> Result<Option<SegmentWithProof>, NodeError> {
            self.inner.download_segment(root, index).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_upload_waits_for_new_entry() {
        let config = small_config();
        let (node, ledger, uploader) = make_uploader(config);
        let file = FlowFile::from_bytes(random_bytes(100), config).unwrap();
        let first = uploader.upload(&file, &UploadOption::default()).await.unwrap();
        assert_eq!(first.tx_seq, Some(0));

        let old = node.get_file_info(&first.root).await.unwrap().unwrap();
        assert!(old.finalized);
        let lagging = Arc::new(LaggingNode {
            inner: node.clone(),
            stale: Mutex::new((old, 3)),
        });
        let uploader = Uploader::new(lagging.clone(), Arc::new(ledger)).with_config(config);

        let report = uploader
            .upload(&file, &UploadOption::default().force())
            .await
            .unwrap();

        assert_eq!(lagging.stale.lock().unwrap().1, 0);
        assert_eq!(report.tx_seq, Some(1));
        let info = node.get_file_info(&first.root).await.unwrap().unwrap();
        assert!(info.finalized);
        assert_eq!(info.tx_seq, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_entry_uploads_without_ledger() {
        let config = small_config();
        let node = MemoryNode::new(config);
        let data = random_bytes(70);
        let file = FlowFile::from_bytes(data.clone(), config).unwrap();
        let tree = FileTree::build(&file).unwrap();
        let submission = Submission::create(&tree, file.size(), vec![]).unwrap();
        assert_eq!(node.register(&submission), Some(tree.root()));

        let uploader = Uploader::light(Arc::new(node.clone())).with_config(config);
        let report = uploader.upload(&file, &UploadOption::default()).await.unwrap();

        assert_eq!(
            report.transitions,
            vec![Start, UploadSegments, AwaitFinality, Done]
        );
        assert!(report.tx.is_none());
        assert_eq!(node.file_data(&tree.root()), Some(data));
    }

    #[tokio::test]
    async fn test_unknown_entry_without_ledger() {
        let config = small_config();
        let node = MemoryNode::new(config);
        let uploader = Uploader::light(Arc::new(node.clone())).with_config(config);
        let file = FlowFile::from_bytes(random_bytes(70), config).unwrap();

        let err = uploader
            .upload(&file, &UploadOption::default())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::NoCommitmentPath));
        assert_eq!(node.upload_calls(), 0);
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_submit_failure() {
        let config = small_config();
        let (node, ledger, uploader) = make_uploader(config);
        ledger.fail_next_submit(LedgerError::Broadcast("nonce too low".into()));
        let file = FlowFile::from_bytes(random_bytes(70), config).unwrap();

        let err = uploader
            .upload(&file, &UploadOption::default())
            .await
            .unwrap_err();

        assert_eq!(err.phase(), UploadPhase::Submit);
        assert!(matches!(
            err,
            UploadError::Ledger {
                source: LedgerError::Broadcast(_),
                ..
            }
        ));
        assert_eq!(node.upload_calls(), 0);
    }

    #[tokio::test]
    async fn test_reverted_submission() {
        let config = small_config();
        let (node, ledger, uploader) = make_uploader(config);
        ledger.revert_next("insufficient fee");
        let file = FlowFile::from_bytes(random_bytes(70), config).unwrap();

        let err = uploader
            .upload(&file, &UploadOption::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Ledger {
                phase: UploadPhase::Submit,
                source: LedgerError::ExecutionFailed(_)
            }
        ));
        assert_eq!(node.file_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_segment_failure_aborts() {
        let config = small_config();
        let (node, _ledger, uploader) = make_uploader(config);
        node.fail_next_upload(NodeError::Transport("connection reset".into()));
        let file = FlowFile::from_bytes(random_bytes(300), config).unwrap();

        let err = uploader
            .upload(&file, &UploadOption::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Node {
                phase: UploadPhase::UploadSegments,
                source: NodeError::Transport(_)
            }
        ));
        assert_eq!(node.upload_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsynced_node_waits_forever() {
        let config = small_config();
        let (node, ledger, uploader) = make_uploader(config);
        node.set_hidden(true);
        let file = FlowFile::from_bytes(random_bytes(70), config).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(3600),
            uploader.upload(&file, &UploadOption::default()),
        )
        .await;

        assert!(result.is_err(), "upload should still be polling");
        assert_eq!(ledger.submissions().len(), 1);
        assert!(node.file_info_calls() > 100);
        assert_eq!(node.upload_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout() {
        let config = small_config();
        let (node, _ledger, uploader) = make_uploader(config);
        node.set_hidden(true);
        let file = FlowFile::from_bytes(random_bytes(70), config).unwrap();

        let option = UploadOption::default().with_wait_timeout(Duration::from_secs(30));
        let err = uploader.upload(&file, &option).await.unwrap_err();

        assert!(matches!(
            err,
            UploadError::Timeout {
                phase: UploadPhase::AwaitAvailability,
                ..
            }
        ));
    }
}
