//! FlowStore KV - Versioned key/value batches over flowstore uploads
//!
//! A batch collects reads, writes and access control changes on streams,
//! is serialized to a compact binary record, and uploaded as an ordinary
//! file tagged with the streams it touches.
//!
//! # Example
//!
//! ```rust
//! use flowstore_kv::{decode_stream_data, encode_stream_data, StreamDataBuilder};
//!
//! let stream = [1u8; 32];
//! let mut builder = StreamDataBuilder::new(0);
//! builder.watch(stream, b"counter".to_vec());
//! builder.set(stream, b"counter".to_vec(), 42u64.to_be_bytes().to_vec());
//!
//! let data = builder.build().unwrap();
//! let bytes = encode_stream_data(&data).unwrap();
//! assert_eq!(decode_stream_data(&bytes).unwrap(), data);
//! ```

pub mod builder;
pub mod client;
pub mod codec;
pub mod types;

pub use builder::{create_tags, StreamDataBuilder, STREAM_DOMAIN};
pub use client::{Batcher, KvClient, KvNode, Value, TEMP_FILE_PREFIX};
pub use codec::{decode_stream_data, encode_stream_data, CodecError};
pub use types::{
    AccessControl, AccessControlType, Address, KvError, StreamData, StreamRead, StreamWrite,
    MAX_SET_SIZE,
};
