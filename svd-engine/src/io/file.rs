//! File-backed stream provider

use super::{ProviderBuffer, StreamHeuristics, StreamProvider};
use crate::error::{Error, Result};
use bytes::BytesMut;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Reads a media file in fixed-size requests with block-aligned seeks
///
/// Seeks land on the nearest alignment boundary at or before the requested
/// offset, mirroring sector-granular storage. The caller accounts for the
/// difference.
pub struct FileProvider {
    path: PathBuf,
    file: File,
    len: u64,
    read_size: usize,
    alignment: u64,
    position: u64,
    running: bool,
    heuristics: StreamHeuristics,
}

impl FileProvider {
    /// Open `path` for streaming
    ///
    /// # Arguments
    /// * `read_size` - Bytes requested per read
    /// * `alignment` - Seek granularity in bytes
    pub fn open(path: &Path, read_size: usize, alignment: u64) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        debug!(
            "Opened {} for streaming ({} bytes, read size {}, alignment {})",
            path.display(),
            len,
            read_size,
            alignment
        );
        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
            read_size: read_size.max(1),
            alignment: alignment.max(1),
            position: 0,
            running: false,
            heuristics: StreamHeuristics::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn heuristics(&self) -> &StreamHeuristics {
        &self.heuristics
    }
}

impl StreamProvider for FileProvider {
    fn start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn read(&mut self) -> Result<ProviderBuffer> {
        if !self.running {
            return Ok(ProviderBuffer::NotReady);
        }
        let remaining = self.len.saturating_sub(self.position);
        let want = (self.read_size as u64).min(remaining) as usize;

        let mut buf = BytesMut::zeroed(want);
        self.file.seek(SeekFrom::Start(self.position))?;
        self.file.read_exact(&mut buf)?;
        self.position += want as u64;

        trace!(
            "File grant of {} bytes from {} (now at {})",
            want,
            self.path.display(),
            self.position
        );
        Ok(ProviderBuffer::Ready {
            data: buf.freeze(),
            end_of_file: self.position >= self.len,
        })
    }

    fn release(&mut self) {}

    fn seek(&mut self, offset: u64) -> Result<u64> {
        if offset > self.len {
            return Err(Error::Provider(format!(
                "seek to {} past end of {} ({} bytes)",
                offset,
                self.path.display(),
                self.len
            )));
        }
        self.position = offset - offset % self.alignment;
        Ok(self.position)
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn set_heuristics(&mut self, heuristics: &StreamHeuristics) {
        self.heuristics = *heuristics;
    }
}
