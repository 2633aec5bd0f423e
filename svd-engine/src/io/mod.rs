//! Byte stream provider contract
//!
//! A provider grants the media bytes of one voice in bounded chunks. Grants
//! may be unavailable for a while ("not ready"), seeks may land before the
//! requested offset when the backing store is block-granular, and every
//! granted chunk is released before the next one is requested.

mod file;
mod memory;

pub use file::FileProvider;
pub use memory::MemoryProvider;

use crate::error::Result;
use bytes::Bytes;

/// Scheduling hints derived from codec heuristics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamHeuristics {
    /// Expected consumption rate in bytes per millisecond
    pub throughput: f32,
    /// Smallest grant worth issuing
    pub min_buffer_bytes: usize,
    /// Byte offset of the loop region start
    pub loop_start: u64,
    /// Byte offset one past the loop region end
    pub loop_end: u64,
    /// Relative I/O priority (0-100)
    pub priority: u8,
}

impl Default for StreamHeuristics {
    fn default() -> Self {
        Self {
            throughput: 1.0,
            min_buffer_bytes: 0,
            loop_start: 0,
            loop_end: 0,
            priority: 50,
        }
    }
}

/// Result of a read request
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderBuffer {
    /// Bytes granted; `end_of_file` is set when nothing follows them
    Ready { data: Bytes, end_of_file: bool },
    /// I/O still pending; retry later
    NotReady,
}

/// Stream provider over a file or an in-memory blob
pub trait StreamProvider {
    /// Begin (or resume) buffering; idempotent
    fn start(&mut self) -> Result<()>;

    /// Pause buffering
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Request the next chunk at the current read offset
    fn read(&mut self) -> Result<ProviderBuffer>;

    /// Give back the most recently granted chunk
    fn release(&mut self);

    /// Reposition to `offset`
    ///
    /// # Returns
    /// The offset actually reached, which may be lower than requested
    fn seek(&mut self, offset: u64) -> Result<u64>;

    /// Total media length in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Update scheduling hints
    fn set_heuristics(&mut self, heuristics: &StreamHeuristics);

    /// The media is resident in memory
    fn is_memory(&self) -> bool {
        false
    }

    /// Replace the backing blob of a memory-resident provider after the
    /// owning allocator moved it
    fn relocate(&mut self, _media: Bytes) -> Result<()> {
        Ok(())
    }
}
