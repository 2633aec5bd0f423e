//! Memory-resident stream provider

use super::{ProviderBuffer, StreamHeuristics, StreamProvider};
use crate::error::{Error, Result};
use bytes::Bytes;
use tracing::{debug, trace};

/// Grants slices of an in-memory blob, one block per read
///
/// Slices share the blob's allocation; no bytes are copied.
pub struct MemoryProvider {
    media: Bytes,
    block_size: usize,
    position: u64,
    running: bool,
    outstanding: bool,
    heuristics: StreamHeuristics,
}

impl MemoryProvider {
    /// # Arguments
    /// * `media` - Complete media bytes
    /// * `block_size` - Maximum bytes granted per read
    pub fn new(media: Bytes, block_size: usize) -> Self {
        Self {
            media,
            block_size: block_size.max(1),
            position: 0,
            running: false,
            outstanding: false,
            heuristics: StreamHeuristics::default(),
        }
    }

    pub fn heuristics(&self) -> &StreamHeuristics {
        &self.heuristics
    }
}

impl StreamProvider for MemoryProvider {
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
        if self.outstanding {
            return Err(Error::Provider(
                "read issued before previous grant was released".to_string(),
            ));
        }
        let len = self.media.len() as u64;
        let start = self.position.min(len) as usize;
        let end = (start + self.block_size).min(len as usize);
        self.position = end as u64;
        self.outstanding = true;
        trace!("Memory grant [{}, {})", start, end);
        Ok(ProviderBuffer::Ready {
            data: self.media.slice(start..end),
            end_of_file: end as u64 >= len,
        })
    }

    fn release(&mut self) {
        self.outstanding = false;
    }

    fn seek(&mut self, offset: u64) -> Result<u64> {
        self.outstanding = false;
        self.position = offset.min(self.media.len() as u64);
        Ok(self.position)
    }

    fn len(&self) -> u64 {
        self.media.len() as u64
    }

    fn set_heuristics(&mut self, heuristics: &StreamHeuristics) {
        self.heuristics = *heuristics;
    }

    fn is_memory(&self) -> bool {
        true
    }

    fn relocate(&mut self, media: Bytes) -> Result<()> {
        if media.len() != self.media.len() {
            return Err(Error::InvalidState(format!(
                "relocated media is {} bytes, expected {}",
                media.len(),
                self.media.len()
            )));
        }
        debug!("Memory provider relocated ({} bytes)", media.len());
        self.media = media;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| i as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn test_reads_in_blocks_until_eof() {
        let mut provider = MemoryProvider::new(blob(10), 4);
        provider.start().unwrap();

        let mut sizes = Vec::new();
        loop {
            match provider.read().unwrap() {
                ProviderBuffer::Ready { data, end_of_file } => {
                    sizes.push(data.len());
                    provider.release();
                    if end_of_file {
                        break;
                    }
                }
                ProviderBuffer::NotReady => panic!("memory provider is always ready"),
            }
        }
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_not_ready_until_started() {
        let mut provider = MemoryProvider::new(blob(10), 4);
        assert_eq!(provider.read().unwrap(), ProviderBuffer::NotReady);
    }

    #[test]
    fn test_seek_is_exact() {
        let mut provider = MemoryProvider::new(blob(10), 4);
        provider.start().unwrap();
        assert_eq!(provider.seek(7).unwrap(), 7);
        match provider.read().unwrap() {
            ProviderBuffer::Ready { data, end_of_file } => {
                assert_eq!(&data[..], &[7, 8, 9]);
                assert!(end_of_file);
            }
            ProviderBuffer::NotReady => panic!("expected data"),
        }
    }

    #[test]
    fn test_unreleased_grant_is_error() {
        let mut provider = MemoryProvider::new(blob(10), 4);
        provider.start().unwrap();
        provider.read().unwrap();
        assert!(provider.read().is_err());
    }
}
