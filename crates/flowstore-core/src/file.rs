//! Files prepared for upload and their segment iterator

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::types::{FlowConfig, FlowError};

#[derive(Debug, Clone)]
enum Source {
    Path(PathBuf),
    Memory(Arc<[u8]>),
}

/// A non-empty file split into chunks and segments
#[derive(Debug, Clone)]
pub struct FlowFile {
    source: Source,
    size: u64,
    config: FlowConfig,
}

impl FlowFile {
    /// Open a file on disk. Empty files are rejected.
    pub fn open(path: impl AsRef<Path>, config: FlowConfig) -> Result<Self, FlowError> {
        config.validate()?;
        let path = path.as_ref();
        let size = fs::metadata(path)?.len();
        if size == 0 {
            return Err(FlowError::EmptyFile);
        }

        Ok(Self {
            source: Source::Path(path.to_path_buf()),
            size,
            config,
        })
    }

    /// Wrap in-memory data. Empty data is rejected.
    pub fn from_bytes(data: impl Into<Vec<u8>>, config: FlowConfig) -> Result<Self, FlowError> {
        config.validate()?;
        let data: Vec<u8> = data.into();
        if data.is_empty() {
            return Err(FlowError::EmptyFile);
        }

        Ok(Self {
            size: data.len() as u64,
            source: Source::Memory(data.into()),
            config,
        })
    }

    pub fn name(&self) -> String {
        match &self.source {
            Source::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            Source::Memory(_) => "<memory>".to_string(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn num_chunks(&self) -> u64 {
        self.config.num_chunks(self.size)
    }

    pub fn num_segments(&self) -> u64 {
        self.config.num_segments(self.size)
    }

    /// Start a new pass over the file's segments
    ///
    /// With `flow_padding` the last segment is zero-filled to a full segment;
    /// otherwise it ends at the last (zero-padded) chunk.
    pub fn iterate(&self, flow_padding: bool) -> Result<SegmentIter, FlowError> {
        let reader: Box<dyn Read + Send> = match &self.source {
            Source::Path(path) => Box::new(fs::File::open(path)?),
            Source::Memory(data) => Box::new(Cursor::new(data.clone())),
        };

        Ok(SegmentIter {
            reader,
            config: self.config,
            remaining: self.size,
            next_index: 0,
            flow_padding,
        })
    }
}

/// Consecutive chunks transferred and proven as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: u64,
    /// Segment bytes, always a whole number of chunks
    pub data: Vec<u8>,
}

impl Segment {
    pub fn num_chunks(&self, chunk_size: usize) -> usize {
        self.data.len() / chunk_size
    }
}

/// Forward-only segment reader. Create a new one for another pass.
pub struct SegmentIter {
    reader: Box<dyn Read + Send>,
    config: FlowConfig,
    remaining: u64,
    next_index: u64,
    flow_padding: bool,
}

impl SegmentIter {
    fn read_segment(&mut self) -> Result<Segment, FlowError> {
        let segment_size = self.config.segment_size();
        let to_read = (segment_size as u64).min(self.remaining) as usize;

        let mut data = vec![0u8; to_read];
        self.reader.read_exact(&mut data)?;
        self.remaining -= to_read as u64;

        let chunk_size = self.config.chunk_size;
        let padded_len = if self.flow_padding {
            segment_size
        } else {
            to_read.div_ceil(chunk_size) * chunk_size
        };
        data.resize(padded_len, 0);

        let segment = Segment {
            index: self.next_index,
            data,
        };
        self.next_index += 1;
        Ok(segment)
    }
}

impl Iterator for SegmentIter {
    type Item = Result<Segment, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let result = self.read_segment();
        if result.is_err() {
            // stop after the first read failure
            self.remaining = 0;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn small_config() -> FlowConfig {
        FlowConfig::new(4, 4).unwrap()
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(
            FlowFile::from_bytes(Vec::new(), small_config()),
            Err(FlowError::EmptyFile)
        ));

        let tmp = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            FlowFile::open(tmp.path(), small_config()),
            Err(FlowError::EmptyFile)
        ));
    }

    #[test]
    fn test_counts() {
        let file = FlowFile::from_bytes(vec![1u8; 37], small_config()).unwrap();
        assert_eq!(file.size(), 37);
        assert_eq!(file.num_chunks(), 10);
        assert_eq!(file.num_segments(), 3);
    }

    #[test]
    fn test_iterate_without_padding() {
        let data: Vec<u8> = (0..37).collect();
        let file = FlowFile::from_bytes(data.clone(), small_config()).unwrap();
        let segments: Vec<Segment> = file.iterate(false).unwrap().map(|s| s.unwrap()).collect();

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].data, data[0..16].to_vec());
        assert_eq!(segments[1].index, 1);
        // 5 bytes left: one full chunk and one padded chunk
        assert_eq!(segments[2].data.len(), 8);
        assert_eq!(&segments[2].data[..5], &data[32..37]);
        assert_eq!(&segments[2].data[5..], &[0, 0, 0]);
    }

    #[test]
    fn test_iterate_with_flow_padding() {
        let file = FlowFile::from_bytes(vec![7u8; 20], small_config()).unwrap();
        let segments: Vec<Segment> = file.iterate(true).unwrap().map(|s| s.unwrap()).collect();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].data.len(), 16);
        assert_eq!(segments[1].num_chunks(4), 4);
        assert!(segments[1].data[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_iterate_from_disk() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[3u8; 33]).unwrap();
        tmp.flush().unwrap();

        let file = FlowFile::open(tmp.path(), small_config()).unwrap();
        let mut iter = file.iterate(false).unwrap();
        let mut total = 0;
        for segment in iter.by_ref() {
            total += segment.unwrap().data.len();
        }
        assert_eq!(total, 36);
        assert!(iter.next().is_none());
    }
}
