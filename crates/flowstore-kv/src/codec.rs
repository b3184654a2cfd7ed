//! Binary encoding of [`StreamData`]
//!
//! All integers are big-endian:
//!
//! ```text
//! version   u64
//! controls  u32 count, then per entry: type u8, stream_id [32], account [20]?, key?
//! reads     u32 count, then per entry: stream_id [32], key
//! writes    u32 count, then per entry: stream_id [32], key, data
//!
//! key   = u32 length + bytes
//! data  = u64 length + bytes
//! ```
//!
//! Whether a control entry carries an account or key follows from its type.

use flowstore_core::Hash;

use crate::types::{
    AccessControl, AccessControlType, Address, StreamData, StreamRead, StreamWrite, MAX_SET_SIZE,
};

/// Codec error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Unexpected end of input reading {0}")]
    Truncated(&'static str),
    #[error("Unknown access control type: {0:#04x}")]
    UnknownControlType(u8),
    #[error("Too many {what}: {count} (max {})", MAX_SET_SIZE)]
    SetTooLarge { what: &'static str, count: usize },
    #[error("Field too large: {0}")]
    FieldTooLarge(&'static str),
    #[error("Trailing bytes after stream data: {0}")]
    TrailingBytes(usize),
}

/// Serialize a batch
pub fn encode_stream_data(data: &StreamData) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(encoded_size_hint(data));
    buf.extend_from_slice(&data.version.to_be_bytes());

    put_count(&mut buf, data.controls.len(), "controls")?;
    for control in &data.controls {
        buf.push(control.control_type() as u8);
        buf.extend_from_slice(control.stream_id());
        if let Some(account) = control.account() {
            buf.extend_from_slice(account);
        }
        if let Some(key) = control.key() {
            put_key(&mut buf, key)?;
        }
    }

    put_count(&mut buf, data.reads.len(), "reads")?;
    for read in &data.reads {
        buf.extend_from_slice(&read.stream_id);
        put_key(&mut buf, &read.key)?;
    }

    put_count(&mut buf, data.writes.len(), "writes")?;
    for write in &data.writes {
        buf.extend_from_slice(&write.stream_id);
        put_key(&mut buf, &write.key)?;
        buf.extend_from_slice(&(write.data.len() as u64).to_be_bytes());
        buf.extend_from_slice(&write.data);
    }

    Ok(buf)
}

/// Parse a batch, rejecting malformed or trailing input
pub fn decode_stream_data(bytes: &[u8]) -> Result<StreamData, CodecError> {
    let mut reader = Reader { bytes, pos: 0 };
    let version = reader.u64("version")?;

    let count = reader.count("controls")?;
    let mut controls = Vec::with_capacity(count);
    for _ in 0..count {
        let raw = reader.u8("control type")?;
        let control_type =
            AccessControlType::from_u8(raw).ok_or(CodecError::UnknownControlType(raw))?;
        let stream_id = reader.hash("control stream id")?;
        let account = if control_type.has_account() {
            Some(reader.address("control account")?)
        } else {
            None
        };
        let key = if control_type.has_key() {
            Some(reader.key("control key")?)
        } else {
            None
        };
        controls.push(AccessControl::from_parts(control_type, stream_id, account, key));
    }

    let count = reader.count("reads")?;
    let mut reads = Vec::with_capacity(count);
    for _ in 0..count {
        reads.push(StreamRead {
            stream_id: reader.hash("read stream id")?,
            key: reader.key("read key")?,
        });
    }

    let count = reader.count("writes")?;
    let mut writes = Vec::with_capacity(count);
    for _ in 0..count {
        let stream_id = reader.hash("write stream id")?;
        let key = reader.key("write key")?;
        let len = reader.u64("write data length")?;
        let data = reader.take(len, "write data")?.to_vec();
        writes.push(StreamWrite {
            stream_id,
            key,
            data,
        });
    }

    let rest = bytes.len() - reader.pos;
    if rest != 0 {
        return Err(CodecError::TrailingBytes(rest));
    }

    Ok(StreamData {
        version,
        reads,
        writes,
        controls,
    })
}

fn encoded_size_hint(data: &StreamData) -> usize {
    let controls: usize = data
        .controls
        .iter()
        .map(|c| 33 + c.account().map_or(0, |_| 20) + c.key().map_or(0, |k| 4 + k.len()))
        .sum();
    let reads: usize = data.reads.iter().map(|r| 36 + r.key.len()).sum();
    let writes: usize = data
        .writes
        .iter()
        .map(|w| 44 + w.key.len() + w.data.len())
        .sum();
    8 + 12 + controls + reads + writes
}

fn put_count(buf: &mut Vec<u8>, count: usize, what: &'static str) -> Result<(), CodecError> {
    if count > MAX_SET_SIZE {
        return Err(CodecError::SetTooLarge { what, count });
    }
    buf.extend_from_slice(&(count as u32).to_be_bytes());
    Ok(())
}

fn put_key(buf: &mut Vec<u8>, key: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(key.len()).map_err(|_| CodecError::FieldTooLarge("key"))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(key);
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: u64, what: &'static str) -> Result<&'a [u8], CodecError> {
        let remaining = (self.bytes.len() - self.pos) as u64;
        if len > remaining {
            return Err(CodecError::Truncated(what));
        }
        let start = self.pos;
        self.pos += len as usize;
        Ok(&self.bytes[start..self.pos])
    }

    fn array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N as u64, what)?);
        Ok(out)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, CodecError> {
        Ok(self.array::<1>(what)?[0])
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.array(what)?))
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.array(what)?))
    }

    fn hash(&mut self, what: &'static str) -> Result<Hash, CodecError> {
        self.array(what)
    }

    fn address(&mut self, what: &'static str) -> Result<Address, CodecError> {
        self.array(what)
    }

    fn key(&mut self, what: &'static str) -> Result<Vec<u8>, CodecError> {
        let len = self.u32(what)?;
        Ok(self.take(len as u64, what)?.to_vec())
    }

    fn count(&mut self, what: &'static str) -> Result<usize, CodecError> {
        let count = self.u32(what)? as usize;
        if count > MAX_SET_SIZE {
            return Err(CodecError::SetTooLarge { what, count });
        }
        Ok(count)
    }
}
