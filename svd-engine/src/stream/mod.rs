//! Streaming buffer manager
//!
//! Owns the stream provider of one voice and tracks, in byte space:
//! - the currently granted buffer and how much of it has been consumed
//! - the file offset the next grant will start at
//! - a pending correction (bytes to drop at the head of the next grant when a
//!   block-granular provider could not reach the requested offset)
//! - loop bounds, the stream-side loop counter and the loop-back schedule
//! - a prefetch region resident in memory that is consumed before any I/O
//!
//! # Loop Handling
//!
//! When a committed grant reaches the loop end while the voice loops, the
//! grant is truncated at the loop end and the provider is sent back to the
//! loop start right away, so the next fetch already returns looped data. The
//! loop counter is decremented when that looped grant is committed.

mod state;

pub use state::{PrefetchCommit, PrefetchState, SeekOutcome, StreamBounds, StreamFlags};

use crate::error::{Error, Result};
use crate::io::{ProviderBuffer, StreamHeuristics, StreamProvider};
use crate::types::{BufferStatus, LoopCount};
use bytes::Bytes;
use tracing::{debug, trace};

/// Byte-domain stream state of one voice
pub struct StreamingBuffer {
    provider: Box<dyn StreamProvider>,

    /// Committed bytes of the current grant (after correction and truncation)
    granted: Bytes,
    /// File offset of `granted[0]`
    granted_offset: u64,
    granted_eof: bool,
    granted_from_prefetch: bool,
    /// Consumed bytes of `granted`
    read_pos: usize,

    next_offset: u64,
    correction: u64,
    bounds: StreamBounds,
    loop_count: LoopCount,
    loops_taken: u32,
    flags: StreamFlags,

    prefetch: Option<Bytes>,
    prefetch_state: PrefetchState,
    prefetch_commit: PrefetchCommit,

    release_pending: bool,
    heuristics: StreamHeuristics,
}

impl StreamingBuffer {
    /// Open the stream of one voice
    ///
    /// # Arguments
    /// * `provider` - Byte source (memory or file)
    /// * `prefetch` - Leading media bytes already resident in memory; consumed
    ///   before the provider is asked for anything
    ///
    /// # Errors
    /// [`Error::NoDataReady`] for a memory source without bytes, or whatever
    /// the provider reports when starting.
    pub fn init(mut provider: Box<dyn StreamProvider>, prefetch: Option<Bytes>) -> Result<Self> {
        let is_memory = provider.is_memory();
        let prefetch = prefetch.filter(|p| !p.is_empty());
        if is_memory && provider.is_empty() && prefetch.is_none() {
            return Err(Error::NoDataReady);
        }

        let prefetch_state = if prefetch.is_some() {
            PrefetchState::Available
        } else {
            provider.start()?;
            PrefetchState::None
        };

        debug!(
            "Stream opened ({} bytes, memory: {}, prefetch: {} bytes)",
            provider.len(),
            is_memory,
            prefetch.as_ref().map(|p| p.len()).unwrap_or(0)
        );

        Ok(Self {
            provider,
            granted: Bytes::new(),
            granted_offset: 0,
            granted_eof: false,
            granted_from_prefetch: false,
            read_pos: 0,
            next_offset: 0,
            correction: 0,
            bounds: StreamBounds::unbounded(),
            loop_count: LoopCount::ONE_SHOT,
            loops_taken: 0,
            flags: StreamFlags {
                is_memory_source: is_memory,
                ..StreamFlags::default()
            },
            prefetch,
            prefetch_state,
            prefetch_commit: PrefetchCommit::NotCommitted,
            release_pending: false,
            heuristics: StreamHeuristics::default(),
        })
    }

    /// Request the next grant
    ///
    /// Releases the current grant first. Returns `NotReady` when the
    /// provider has nothing yet; nothing is lost and the call can be
    /// repeated on a later tick.
    pub fn fetch(&mut self) -> Result<BufferStatus> {
        self.release_current();

        if self.flags.is_last_buffer {
            return Ok(BufferStatus::NoMoreData);
        }

        if self.prefetch_state == PrefetchState::Available {
            if let Some(prefetch) = self.prefetch.clone() {
                self.prefetch_state = PrefetchState::Read;
                let eof = prefetch.len() as u64 >= self.provider.len();
                self.commit(prefetch, eof, true)?;
                return Ok(self.status());
            }
        }

        loop {
            match self.provider.read()? {
                ProviderBuffer::NotReady => {
                    trace!("Stream grant not ready");
                    return Ok(BufferStatus::NotReady);
                }
                ProviderBuffer::Ready { data, end_of_file } => {
                    self.release_pending = true;
                    self.commit(data, end_of_file, false)?;
                    if !self.swallowed_by_correction() {
                        return Ok(self.status());
                    }
                    trace!(
                        "Grant swallowed by correction ({} bytes left to drop)",
                        self.correction
                    );
                    self.release_current();
                }
            }
        }
    }

    /// The whole grant went to the correction and more data follows
    fn swallowed_by_correction(&self) -> bool {
        self.granted.is_empty()
            && !self.granted_eof
            && !self.flags.is_last_buffer
            && !self.flags.next_fetch_will_loop
    }

    /// Adopt a freshly granted range
    ///
    /// Advances offsets, applies the pending correction, detects loop-end and
    /// end-of-data crossings, and moves the prefetch sub-state along.
    fn commit(&mut self, data: Bytes, end_of_file: bool, from_prefetch: bool) -> Result<()> {
        let offset = if from_prefetch { 0 } else { self.next_offset };

        if self.flags.next_fetch_will_loop {
            self.flags.next_fetch_will_loop = false;
            self.loop_count = self.loop_count.decrement();
            self.loops_taken += 1;
            debug!(
                "Stream looped back to byte {} (loop count now {})",
                offset, self.loop_count
            );
        }

        let len = data.len() as u64;
        self.next_offset = offset + len;

        let skip = self.correction.min(len);
        self.correction -= skip;

        if from_prefetch {
            self.prefetch_commit = PrefetchCommit::CurrentlyCommitted;
        } else if self.prefetch_commit == PrefetchCommit::CurrentlyCommitted {
            self.prefetch_commit = PrefetchCommit::Past;
        }

        self.granted = data.slice(skip as usize..);
        self.granted_offset = offset + skip;
        self.granted_eof = end_of_file;
        self.granted_from_prefetch = from_prefetch;
        self.read_pos = 0;

        self.apply_boundaries()?;

        if from_prefetch && !self.flags.next_fetch_will_loop && !self.flags.is_last_buffer {
            // Continue streaming right after the resident region
            self.reposition_provider(len)?;
            self.provider.start()?;
        }

        trace!(
            "Committed {} bytes at {} (next at {}, correction {})",
            self.granted.len(),
            self.granted_offset,
            self.next_offset,
            self.correction
        );
        Ok(())
    }

    /// Truncate the current grant at the loop end or end of data
    fn apply_boundaries(&mut self) -> Result<()> {
        if self.granted.is_empty() && !self.granted_eof {
            return Ok(());
        }
        let start = self.granted_offset;
        let end = start + self.granted.len() as u64;
        let bounds = self.bounds;

        if self.loop_count.is_looping()
            && bounds.has_loop()
            && start < bounds.loop_end
            && end >= bounds.loop_end
        {
            self.truncate_granted((bounds.loop_end - start) as usize);
            self.schedule_loop_back()?;
        } else if end >= bounds.data_end || self.granted_eof {
            let keep = bounds.data_end.saturating_sub(start).min(self.granted.len() as u64);
            self.truncate_granted(keep as usize);
            self.flags.is_last_buffer = true;
            debug!("Stream reached end of data at byte {}", start + keep);
        }
        Ok(())
    }

    fn truncate_granted(&mut self, keep: usize) {
        self.granted.truncate(keep);
        self.read_pos = self.read_pos.min(self.granted.len());
    }

    /// Point the next fetch at the loop start
    fn schedule_loop_back(&mut self) -> Result<()> {
        let target = self.bounds.loop_start;
        let in_prefetch = self
            .prefetch
            .as_ref()
            .map(|p| target < p.len() as u64)
            .unwrap_or(false);

        if in_prefetch {
            self.prefetch_state = PrefetchState::Available;
            self.prefetch_commit = PrefetchCommit::NotCommitted;
            self.next_offset = 0;
            self.correction = target;
        } else {
            self.reposition_provider(target)?;
        }
        self.flags.next_fetch_will_loop = true;
        debug!("Loop-back to byte {} scheduled", target);
        Ok(())
    }

    /// Provider seek; the shortfall becomes the correction
    fn reposition_provider(&mut self, target: u64) -> Result<()> {
        let achieved = self.provider.seek(target)?;
        if achieved > target {
            return Err(Error::Provider(format!(
                "provider seek to {} landed past target at {}",
                target, achieved
            )));
        }
        self.release_pending = false;
        self.correction = target - achieved;
        self.next_offset = achieved;
        Ok(())
    }

    /// Install the real data and loop bounds once the header is known
    ///
    /// The grant committed before the header was parsed is re-evaluated
    /// against the new bounds.
    pub fn set_bounds(&mut self, bounds: StreamBounds, loop_count: LoopCount) -> Result<()> {
        if bounds.data_start > bounds.data_end {
            return Err(Error::InvalidState(format!(
                "data start {} after data end {}",
                bounds.data_start, bounds.data_end
            )));
        }
        self.bounds = bounds;
        self.loop_count = loop_count;
        self.flags.is_last_buffer = false;
        self.apply_boundaries()?;
        self.refresh_heuristics();
        Ok(())
    }

    /// Store codec heuristics and forward them to the provider
    pub fn set_heuristics(&mut self, heuristics: StreamHeuristics) {
        self.heuristics = heuristics;
        self.refresh_heuristics();
    }

    fn refresh_heuristics(&mut self) {
        self.heuristics.loop_start = self.bounds.loop_start;
        self.heuristics.loop_end = if self.loop_count.is_looping() {
            self.bounds.loop_end
        } else {
            0
        };
        self.provider.set_heuristics(&self.heuristics);
    }

    /// Reposition to byte `offset` with a new loop count
    ///
    /// Tried in order:
    /// 1. `offset` inside the current grant with the same loop count: move
    ///    the read position, no provider I/O
    /// 2. `offset` inside the prefetch region: re-arm the prefetch
    /// 3. provider seek; the shortfall becomes the correction
    pub fn seek(&mut self, offset: u64, loop_count: LoopCount) -> Result<SeekOutcome> {
        if offset > self.bounds.data_end {
            return Err(Error::InvalidState(format!(
                "stream seek to {} past data end {}",
                offset, self.bounds.data_end
            )));
        }

        let granted_end = self.granted_offset + self.granted.len() as u64;
        if loop_count == self.loop_count
            && !self.granted.is_empty()
            && offset >= self.granted_offset
            && offset < granted_end
        {
            self.read_pos = (offset - self.granted_offset) as usize;
            self.loops_taken = 0;
            self.refresh_heuristics();
            self.ensure_running()?;
            trace!("Seek to byte {} served from current grant", offset);
            return Ok(SeekOutcome::PartialSuccess);
        }

        self.release_current();
        self.flags.is_last_buffer = false;
        self.flags.next_fetch_will_loop = false;
        self.loop_count = loop_count;
        self.loops_taken = 0;

        let in_prefetch = self
            .prefetch
            .as_ref()
            .map(|p| offset < p.len() as u64)
            .unwrap_or(false);

        let outcome = if in_prefetch {
            self.prefetch_state = PrefetchState::Available;
            self.prefetch_commit = PrefetchCommit::NotCommitted;
            self.next_offset = 0;
            self.correction = offset;
            debug!("Seek to byte {} served from prefetch", offset);
            SeekOutcome::Prefetch
        } else {
            if self.prefetch.is_some() {
                self.prefetch_state = PrefetchState::Released;
                self.prefetch_commit = PrefetchCommit::Past;
            }
            self.reposition_provider(offset)?;
            debug!(
                "Seek to byte {} via provider (correction {})",
                offset, self.correction
            );
            SeekOutcome::Repositioned {
                correction: self.correction,
            }
        };

        self.refresh_heuristics();
        self.ensure_running()?;
        Ok(outcome)
    }

    fn ensure_running(&mut self) -> Result<()> {
        if !self.provider.is_running() {
            self.provider.start()?;
        }
        Ok(())
    }

    /// Stop looping after the current pass
    ///
    /// If the provider was already sent back to the loop start, one more pass
    /// is committed and the counter becomes 2 so that pass still happens.
    pub fn stop_looping(&mut self) -> LoopCount {
        self.loop_count = if self.flags.next_fetch_will_loop {
            LoopCount::new(2)
        } else {
            LoopCount::ONE_SHOT
        };
        self.refresh_heuristics();
        debug!("Stream stop-looping (loop count now {})", self.loop_count);
        self.loop_count
    }

    /// Swap the backing blob of a memory-resident stream
    ///
    /// The current grant is re-derived at the same offsets in the new blob.
    pub fn relocate_media(&mut self, media: Bytes) -> Result<()> {
        if !self.flags.is_memory_source {
            return Err(Error::InvalidState(
                "relocation requested for a file-backed stream".to_string(),
            ));
        }
        self.provider.relocate(media.clone())?;
        if !self.granted.is_empty() && !self.granted_from_prefetch {
            let start = self.granted_offset as usize;
            let end = start + self.granted.len();
            if end > media.len() {
                return Err(Error::InvalidState(format!(
                    "relocated media too short for grant [{}, {})",
                    start, end
                )));
            }
            self.granted = media.slice(start..end);
        }
        debug!("Stream relocated ({} bytes)", media.len());
        Ok(())
    }

    /// Drop the current grant and give it back to the provider
    pub fn release_current(&mut self) {
        if self.release_pending {
            self.provider.release();
            self.release_pending = false;
        }
        if self.granted_from_prefetch && self.prefetch_state == PrefetchState::Read {
            self.prefetch_state = PrefetchState::Released;
        }
        self.granted = Bytes::new();
        self.granted_from_prefetch = false;
        self.read_pos = 0;
    }

    /// Pause provider buffering
    pub fn stop(&mut self) {
        self.provider.stop();
    }

    /// Resume provider buffering
    pub fn start(&mut self) -> Result<()> {
        self.ensure_running()
    }

    // ========================================================================
    // Consumption
    // ========================================================================

    /// Unconsumed bytes of the current grant; `None` exactly when
    /// [`size_left`](Self::size_left) is 0
    pub fn next_slice(&self) -> Option<&[u8]> {
        if self.read_pos < self.granted.len() {
            Some(&self.granted[self.read_pos..])
        } else {
            None
        }
    }

    pub fn size_left(&self) -> usize {
        self.granted.len() - self.read_pos
    }

    /// Consume up to `n` bytes, returned as a zero-copy view
    pub fn take(&mut self, n: usize) -> Bytes {
        let n = n.min(self.size_left());
        let out = self.granted.slice(self.read_pos..self.read_pos + n);
        self.read_pos += n;
        out
    }

    /// Consume up to `n` bytes
    pub fn consume(&mut self, n: usize) {
        self.read_pos += n.min(self.size_left());
    }

    /// Consume up to file offset `offset` inside the current grant
    pub fn skip_to(&mut self, offset: u64) -> Result<()> {
        let current = self.file_offset();
        let end = self.granted_offset + self.granted.len() as u64;
        if offset < current || offset > end {
            return Err(Error::InvalidState(format!(
                "skip to {} outside current grant [{}, {}]",
                offset, current, end
            )));
        }
        self.consume((offset - current) as usize);
        Ok(())
    }

    /// File offset of the next unconsumed byte
    pub fn file_offset(&self) -> u64 {
        self.granted_offset + self.read_pos as u64
    }

    fn status(&self) -> BufferStatus {
        if self.size_left() > 0 {
            BufferStatus::DataReady
        } else if self.flags.is_last_buffer {
            BufferStatus::NoMoreData
        } else {
            BufferStatus::NotReady
        }
    }

    // ========================================================================
    // State accessors
    // ========================================================================

    pub fn flags(&self) -> StreamFlags {
        self.flags
    }

    pub fn is_last_buffer(&self) -> bool {
        self.flags.is_last_buffer
    }

    /// Nothing left to read and nothing left to fetch
    pub fn is_exhausted(&self) -> bool {
        self.flags.is_last_buffer && self.size_left() == 0
    }

    pub fn next_fetch_will_loop(&self) -> bool {
        self.flags.next_fetch_will_loop
    }

    pub fn loop_count(&self) -> LoopCount {
        self.loop_count
    }

    /// Looped grants committed since the last seek
    pub fn loops_taken(&self) -> u32 {
        self.loops_taken
    }

    /// Wraps already decided on the byte side: taken plus scheduled
    pub fn committed_wraps(&self) -> u32 {
        self.loops_taken + u32::from(self.flags.next_fetch_will_loop)
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn correction(&self) -> u64 {
        self.correction
    }

    pub fn bounds(&self) -> StreamBounds {
        self.bounds
    }

    pub fn prefetch_state(&self) -> PrefetchState {
        self.prefetch_state
    }

    pub fn prefetch_commit(&self) -> PrefetchCommit {
        self.prefetch_commit
    }

    pub fn heuristics(&self) -> &StreamHeuristics {
        &self.heuristics
    }

    pub fn provider_running(&self) -> bool {
        self.provider.is_running()
    }

    /// Verify internal consistency
    pub fn check_invariants(&self) -> Result<()> {
        if self.read_pos > self.granted.len() {
            return Err(Error::InvalidState(format!(
                "read position {} beyond grant of {} bytes",
                self.read_pos,
                self.granted.len()
            )));
        }
        if self.next_slice().is_none() != (self.size_left() == 0) {
            return Err(Error::InvalidState(
                "next slice presence disagrees with size left".to_string(),
            ));
        }
        let rewound =
            self.flags.next_fetch_will_loop || self.prefetch_state == PrefetchState::Available;
        if !rewound && !self.granted.is_empty() {
            let granted_end = self.granted_offset + self.granted.len() as u64;
            if self.next_offset + self.correction < granted_end {
                return Err(Error::InvalidState(format!(
                    "next offset {} behind current grant end {}",
                    self.next_offset, granted_end
                )));
            }
        }
        Ok(())
    }
}
