//! KV client: node queries and batched writes

use std::io::Write;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use flowstore_core::{to_hex, Hash, NodeError, UploadOption, UploadReport, Uploader};

use crate::builder::StreamDataBuilder;
use crate::codec::encode_stream_data;
use crate::types::{Address, KvError};

/// Prefix of the temporary files batches are written to
pub const TEMP_FILE_PREFIX: &str = "flowstore-kv-";

/// A page of a stored value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Value {
    /// Version the value was last written at
    pub version: u64,
    pub data: Vec<u8>,
    /// Total size of the value
    pub size: u64,
}

/// Read side of a KV storage node
///
/// `version` pins the query to a batch version; None reads the latest state.
#[async_trait]
pub trait KvNode: Send + Sync {
    async fn get_value(
        &self,
        stream_id: &Hash,
        key: &[u8],
        start_index: u64,
        length: u64,
        version: Option<u64>,
    ) -> Result<Value, NodeError>;

    async fn get_transaction_result(&self, tx_seq: u64) -> Result<String, NodeError>;

    async fn get_holding_stream_ids(&self) -> Result<Vec<Hash>, NodeError>;

    async fn has_write_permission(
        &self,
        account: &Address,
        stream_id: &Hash,
        key: &[u8],
        version: Option<u64>,
    ) -> Result<bool, NodeError>;

    async fn is_admin(
        &self,
        account: &Address,
        stream_id: &Hash,
        version: Option<u64>,
    ) -> Result<bool, NodeError>;

    async fn is_special_key(
        &self,
        stream_id: &Hash,
        key: &[u8],
        version: Option<u64>,
    ) -> Result<bool, NodeError>;

    async fn is_writer_of_key(
        &self,
        account: &Address,
        stream_id: &Hash,
        key: &[u8],
        version: Option<u64>,
    ) -> Result<bool, NodeError>;

    async fn is_writer_of_stream(
        &self,
        account: &Address,
        stream_id: &Hash,
        version: Option<u64>,
    ) -> Result<bool, NodeError>;
}

/// KV operations against one node, with writes going through an uploader
#[derive(Clone)]
pub struct KvClient {
    node: Arc<dyn KvNode>,
    uploader: Arc<Uploader>,
    option: UploadOption,
    /// Directory for batch files; None uses the system temp dir
    temp_dir: Option<PathBuf>,
}

impl KvClient {
    pub fn new(node: Arc<dyn KvNode>, uploader: Arc<Uploader>) -> Self {
        Self {
            node,
            uploader,
            option: UploadOption::default(),
            temp_dir: None,
        }
    }

    /// Write batch files under `dir` instead of the system temp dir
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Base upload option for batches; tags and force are always overridden
    pub fn with_upload_option(mut self, option: UploadOption) -> Self {
        self.option = option;
        self
    }

    /// Paginated value of `key`
    pub async fn get(
        &self,
        stream_id: &Hash,
        key: &[u8],
        start_index: u64,
        length: u64,
        version: Option<u64>,
    ) -> Result<Value, KvError> {
        Ok(self
            .node
            .get_value(stream_id, key, start_index, length, version)
            .await?)
    }

    pub async fn get_transaction_result(&self, tx_seq: u64) -> Result<String, KvError> {
        Ok(self.node.get_transaction_result(tx_seq).await?)
    }

    pub async fn get_holding_stream_ids(&self) -> Result<Vec<Hash>, KvError> {
        Ok(self.node.get_holding_stream_ids().await?)
    }

    pub async fn has_write_permission(
        &self,
        account: &Address,
        stream_id: &Hash,
        key: &[u8],
        version: Option<u64>,
    ) -> Result<bool, KvError> {
        Ok(self
            .node
            .has_write_permission(account, stream_id, key, version)
            .await?)
    }

    pub async fn is_admin(
        &self,
        account: &Address,
        stream_id: &Hash,
        version: Option<u64>,
    ) -> Result<bool, KvError> {
        Ok(self.node.is_admin(account, stream_id, version).await?)
    }

    pub async fn is_special_key(
        &self,
        stream_id: &Hash,
        key: &[u8],
        version: Option<u64>,
    ) -> Result<bool, KvError> {
        Ok(self.node.is_special_key(stream_id, key, version).await?)
    }

    pub async fn is_writer_of_key(
        &self,
        account: &Address,
        stream_id: &Hash,
        key: &[u8],
        version: Option<u64>,
    ) -> Result<bool, KvError> {
        Ok(self
            .node
            .is_writer_of_key(account, stream_id, key, version)
            .await?)
    }

    pub async fn is_writer_of_stream(
        &self,
        account: &Address,
        stream_id: &Hash,
        version: Option<u64>,
    ) -> Result<bool, KvError> {
        Ok(self
            .node
            .is_writer_of_stream(account, stream_id, version)
            .await?)
    }

    /// New batch session at the latest version
    pub fn batcher(&self) -> Batcher {
        Batcher {
            builder: StreamDataBuilder::new(u64::MAX),
            client: self.clone(),
        }
    }
}

/// A batch session bound to a client
///
/// Dereferences to [`StreamDataBuilder`] for accumulating operations.
pub struct Batcher {
    builder: StreamDataBuilder,
    client: KvClient,
}

impl Deref for Batcher {
    type Target = StreamDataBuilder;

    fn deref(&self) -> &Self::Target {
        &self.builder
    }
}

impl DerefMut for Batcher {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.builder
    }
}

impl Batcher {
    /// Build, encode and upload the batch
    ///
    /// Identical content may already be stored under other tags, so the upload
    /// is always forced. The temporary file is removed on every path.
    pub async fn exec(&self) -> Result<UploadReport, KvError> {
        let data = self.builder.build()?;
        let encoded = encode_stream_data(&data)?;
        let tags = self.builder.build_tags();

        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_FILE_PREFIX);
        let mut tmp = match &self.client.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(KvError::TempFile)?;
        tmp.write_all(&encoded)
            .and_then(|_| tmp.flush())
            .map_err(KvError::TempFile)?;
        debug!(
            path = %tmp.path().display(),
            bytes = encoded.len(),
            reads = data.reads.len(),
            writes = data.writes.len(),
            controls = data.controls.len(),
            "Stream data written to temp file"
        );

        let option = self.client.option.clone().with_tags(tags).force();
        let report = self
            .client
            .uploader
            .upload_path(tmp.path(), &option)
            .await
            .map_err(|source| KvError::Upload {
                path: tmp.path().to_path_buf(),
                source,
            })?;
        info!(root = %to_hex(&report.root), version = data.version, "KV batch uploaded");
        Ok(report)
    }
}
