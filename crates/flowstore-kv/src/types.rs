//! KV batch model

use std::path::PathBuf;

use flowstore_core::{Hash, NodeError, UploadError};

use crate::codec::CodecError;

/// 20-byte account address
pub type Address = [u8; 20];

/// Maximum entries in each of the read, write and control sets
pub const MAX_SET_SIZE: usize = 1 << 16;

/// KV error type
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("Too many {what} in batch: {count} (max {})", MAX_SET_SIZE)]
    SizeTooLarge { what: &'static str, count: usize },
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Failed to write stream data to temp file: {0}")]
    TempFile(#[source] std::io::Error),
    #[error("Failed to upload file {}: {source}", .path.display())]
    Upload {
        path: PathBuf,
        #[source]
        source: UploadError,
    },
    #[error("Node error: {0}")]
    Node(#[from] NodeError),
}

/// One KV batch, uploaded as a single file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamData {
    pub version: u64,
    pub reads: Vec<StreamRead>,
    pub writes: Vec<StreamWrite>,
    pub controls: Vec<AccessControl>,
}

/// Read intent: the batch fails if the key changed after `version`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamRead {
    pub stream_id: Hash,
    pub key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamWrite {
    pub stream_id: Hash,
    pub key: Vec<u8>,
    pub data: Vec<u8>,
}

/// Permission mutation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AccessControlType {
    GrantAdminRole = 0x00,
    RenounceAdminRole = 0x01,
    SetKeyToSpecial = 0x10,
    SetKeyToNormal = 0x11,
    GrantWriteRole = 0x20,
    RevokeWriteRole = 0x21,
    RenounceWriteRole = 0x22,
    GrantSpecialWriteRole = 0x30,
    RevokeSpecialWriteRole = 0x31,
    RenounceSpecialWriteRole = 0x32,
}

impl AccessControlType {
    pub fn from_u8(value: u8) -> Option<Self> {
        use AccessControlType::*;
        Some(match value {
            0x00 => GrantAdminRole,
            0x01 => RenounceAdminRole,
            0x10 => SetKeyToSpecial,
            0x11 => SetKeyToNormal,
            0x20 => GrantWriteRole,
            0x21 => RevokeWriteRole,
            0x22 => RenounceWriteRole,
            0x30 => GrantSpecialWriteRole,
            0x31 => RevokeSpecialWriteRole,
            0x32 => RenounceSpecialWriteRole,
            _ => return None,
        })
    }

    /// Whether entries of this type carry a target account
    pub fn has_account(self) -> bool {
        use AccessControlType::*;
        matches!(
            self,
            GrantAdminRole
                | GrantWriteRole
                | RevokeWriteRole
                | GrantSpecialWriteRole
                | RevokeSpecialWriteRole
        )
    }

    /// Whether entries of this type carry a key
    pub fn has_key(self) -> bool {
        use AccessControlType::*;
        matches!(
            self,
            SetKeyToSpecial
                | SetKeyToNormal
                | GrantSpecialWriteRole
                | RevokeSpecialWriteRole
                | RenounceSpecialWriteRole
        )
    }
}

/// One permission mutation on a stream
///
/// Fields are private so `account` and `key` always match what the type
/// requires; build entries through [`crate::StreamDataBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessControl {
    control_type: AccessControlType,
    stream_id: Hash,
    account: Option<Address>,
    key: Option<Vec<u8>>,
}

impl AccessControl {
    /// Returns None when `account` or `key` presence does not match the type
    pub fn new(
        control_type: AccessControlType,
        stream_id: Hash,
        account: Option<Address>,
        key: Option<Vec<u8>>,
    ) -> Option<Self> {
        if control_type.has_account() != account.is_some()
            || control_type.has_key() != key.is_some()
        {
            return None;
        }
        Some(Self {
            control_type,
            stream_id,
            account,
            key,
        })
    }

    /// Build a control whose fields are already known to match its type
    pub(crate) fn from_parts(
        control_type: AccessControlType,
        stream_id: Hash,
        account: Option<Address>,
        key: Option<Vec<u8>>,
    ) -> Self {
        debug_assert_eq!(control_type.has_account(), account.is_some());
        debug_assert_eq!(control_type.has_key(), key.is_some());
        Self {
            control_type,
            stream_id,
            account,
            key,
        }
    }

    pub fn control_type(&self) -> AccessControlType {
        self.control_type
    }

    pub fn stream_id(&self) -> &Hash {
        &self.stream_id
    }

    pub fn account(&self) -> Option<&Address> {
        self.account.as_ref()
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }
}
