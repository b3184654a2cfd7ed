//! Accumulates one KV batch session
//!
//! Reads and writes are keyed by `(stream_id, key)`: a repeated `watch` is a
//! no-op and a repeated `set` keeps the last data. Both come out sorted by
//! stream id then key, so identical sessions encode to identical bytes.
//! Access control entries keep call order.

use std::collections::{BTreeMap, BTreeSet};

use flowstore_core::{keccak256, Hash};

use crate::types::{
    AccessControl, AccessControlType, Address, KvError, StreamData, StreamRead, StreamWrite,
    MAX_SET_SIZE,
};

/// Domain prefix of routing tags
pub const STREAM_DOMAIN: &[u8] = b"STREAM";

/// Routing tags for a set of stream ids: `keccak("STREAM")` followed by each id
pub fn create_tags<'a>(stream_ids: impl IntoIterator<Item = &'a Hash>) -> Vec<u8> {
    let mut tags = keccak256(STREAM_DOMAIN).to_vec();
    for id in stream_ids {
        tags.extend_from_slice(id);
    }
    tags
}

/// Builder for [`StreamData`]
#[derive(Debug, Clone, Default)]
pub struct StreamDataBuilder {
    version: u64,
    reads: BTreeSet<(Hash, Vec<u8>)>,
    writes: BTreeMap<(Hash, Vec<u8>), Vec<u8>>,
    controls: Vec<AccessControl>,
    /// Streams touched by writes and controls, for tags
    stream_ids: BTreeSet<Hash>,
}

impl StreamDataBuilder {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_version(&mut self, version: u64) -> &mut Self {
        self.version = version;
        self
    }

    /// Record a read of `key`
    pub fn watch(&mut self, stream_id: Hash, key: impl Into<Vec<u8>>) -> &mut Self {
        self.reads.insert((stream_id, key.into()));
        self
    }

    /// Write `data` under `key`, replacing an earlier write of the same key
    pub fn set(
        &mut self,
        stream_id: Hash,
        key: impl Into<Vec<u8>>,
        data: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.stream_ids.insert(stream_id);
        self.writes.insert((stream_id, key.into()), data.into());
        self
    }

    pub fn grant_admin_role(&mut self, stream_id: Hash, account: Address) -> &mut Self {
        self.with_control(AccessControlType::GrantAdminRole, stream_id, Some(account), None)
    }

    pub fn renounce_admin_role(&mut self, stream_id: Hash) -> &mut Self {
        self.with_control(AccessControlType::RenounceAdminRole, stream_id, None, None)
    }

    pub fn set_key_to_special(&mut self, stream_id: Hash, key: impl Into<Vec<u8>>) -> &mut Self {
        self.with_control(
            AccessControlType::SetKeyToSpecial,
            stream_id,
            None,
            Some(key.into()),
        )
    }

    pub fn set_key_to_normal(&mut self, stream_id: Hash, key: impl Into<Vec<u8>>) -> &mut Self {
        self.with_control(
            AccessControlType::SetKeyToNormal,
            stream_id,
            None,
            Some(key.into()),
        )
    }

    pub fn grant_write_role(&mut self, stream_id: Hash, account: Address) -> &mut Self {
        self.with_control(AccessControlType::GrantWriteRole, stream_id, Some(account), None)
    }

    pub fn revoke_write_role(&mut self, stream_id: Hash, account: Address) -> &mut Self {
        self.with_control(AccessControlType::RevokeWriteRole, stream_id, Some(account), None)
    }

    pub fn renounce_write_role(&mut self, stream_id: Hash) -> &mut Self {
        self.with_control(AccessControlType::RenounceWriteRole, stream_id, None, None)
    }

    pub fn grant_special_write_role(
        &mut self,
        stream_id: Hash,
        key: impl Into<Vec<u8>>,
        account: Address,
    ) -> &mut Self {
        self.with_control(
            AccessControlType::GrantSpecialWriteRole,
            stream_id,
            Some(account),
            Some(key.into()),
        )
    }

    pub fn revoke_special_write_role(
        &mut self,
        stream_id: Hash,
        key: impl Into<Vec<u8>>,
        account: Address,
    ) -> &mut Self {
        self.with_control(
            AccessControlType::RevokeSpecialWriteRole,
            stream_id,
            Some(account),
            Some(key.into()),
        )
    }

    pub fn renounce_special_write_role(
        &mut self,
        stream_id: Hash,
        key: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.with_control(
            AccessControlType::RenounceSpecialWriteRole,
            stream_id,
            None,
            Some(key.into()),
        )
    }

    fn with_control(
        &mut self,
        control_type: AccessControlType,
        stream_id: Hash,
        account: Option<Address>,
        key: Option<Vec<u8>>,
    ) -> &mut Self {
        self.stream_ids.insert(stream_id);
        self.controls
            .push(AccessControl::from_parts(control_type, stream_id, account, key));
        self
    }

    /// Freeze the session into a batch
    ///
    /// Fails if any of the three sets exceeds [`MAX_SET_SIZE`] entries.
    pub fn build(&self) -> Result<StreamData, KvError> {
        check_size("controls", self.controls.len())?;
        check_size("reads", self.reads.len())?;
        check_size("writes", self.writes.len())?;

        Ok(StreamData {
            version: self.version,
            reads: self
                .reads
                .iter()
                .map(|(stream_id, key)| StreamRead {
                    stream_id: *stream_id,
                    key: key.clone(),
                })
                .collect(),
            writes: self
                .writes
                .iter()
                .map(|((stream_id, key), data)| StreamWrite {
                    stream_id: *stream_id,
                    key: key.clone(),
                    data: data.clone(),
                })
                .collect(),
            controls: self.controls.clone(),
        })
    }

    /// Routing tags over the streams this session writes or controls
    pub fn build_tags(&self) -> Vec<u8> {
        create_tags(&self.stream_ids)
    }
}

fn check_size(what: &'static str, count: usize) -> Result<(), KvError> {
    if count > MAX_SET_SIZE {
        return Err(KvError::SizeTooLarge { what, count });
    }
    Ok(())
}
