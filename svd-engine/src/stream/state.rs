//! Sub-states and flags of the streaming buffer

/// Lifecycle of the resident prefetch region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchState {
    /// No prefetch region was supplied
    None,
    /// The next fetch will be served from the prefetch region
    Available,
    /// The prefetch region is the current grant
    Read,
    /// The prefetch region has been consumed and given up
    Released,
}

/// Whether the prefetch region is part of the committed stream position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchCommit {
    NotCommitted,
    CurrentlyCommitted,
    Past,
}

/// Named stream flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamFlags {
    /// The current grant is the final one
    pub is_last_buffer: bool,
    /// The provider serves a memory-resident blob
    pub is_memory_source: bool,
    /// The provider was sent back to the loop start; the next grant is looped data
    pub next_fetch_will_loop: bool,
}

/// Byte-domain bounds of the media data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamBounds {
    /// File offset of the first data byte
    pub data_start: u64,
    /// File offset one past the last data byte
    pub data_end: u64,
    /// File offset of the loop start
    pub loop_start: u64,
    /// File offset one past the loop end
    pub loop_end: u64,
}

impl StreamBounds {
    pub fn new(data_start: u64, data_end: u64, loop_start: u64, loop_end: u64) -> Self {
        Self {
            data_start,
            data_end,
            loop_start,
            loop_end,
        }
    }

    /// Bounds used before the header is parsed
    pub fn unbounded() -> Self {
        Self::new(0, u64::MAX, 0, 0)
    }

    pub fn has_loop(&self) -> bool {
        self.loop_end > self.loop_start
    }
}

/// Which seek path served a reposition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// Target lies in the current grant; no new I/O needed
    PartialSuccess,
    /// Target lies in the resident prefetch region
    Prefetch,
    /// Provider seek issued; `correction` bytes will be dropped from the next grant
    Repositioned { correction: u64 },
}
