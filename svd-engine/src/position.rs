//! Frame-domain position tracking
//!
//! Tracks the current source frame, loop bounds (inclusive) and the remaining
//! loop count of one voice, independent of how bytes map to frames.
//!
//! Advances are clamped so that a single call never crosses more than one
//! boundary (loop end or end of data). Callers that need to advance further
//! call again with the remainder; this makes every wrap observable exactly at
//! the loop boundary.

use crate::error::{Diagnostic, Error, Result};
use crate::types::LoopCount;
use tracing::trace;

/// Result of one clamped advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// Frames actually applied (≤ requested)
    pub applied: u64,
    /// The advance ended on the loop boundary and wrapped to loop start
    pub wrapped: bool,
}

/// Current playback position of one voice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    current: u64,
    total: u64,
    loop_start: u64,
    loop_end: u64,
    loop_count: LoopCount,
    wraps: u32,
}

impl Position {
    /// Create a tracker at frame 0
    ///
    /// # Arguments
    /// * `total` - Total source frames (must be > 0)
    /// * `loop_start`, `loop_end` - Inclusive loop region
    /// * `loop_count` - Remaining loop count
    pub fn new(total: u64, loop_start: u64, loop_end: u64, loop_count: LoopCount) -> Result<Self> {
        if total == 0 {
            return Err(Error::invalid_file(
                Diagnostic::TotalFramesMismatch,
                "media declares zero frames",
            ));
        }
        if loop_start > loop_end || loop_end >= total {
            return Err(Error::invalid_file(
                Diagnostic::LoopBoundsInvalid,
                format!(
                    "loop [{}, {}] invalid for {} frames",
                    loop_start, loop_end, total
                ),
            ));
        }
        Ok(Self {
            current: 0,
            total,
            loop_start,
            loop_end,
            loop_count,
            wraps: 0,
        })
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn loop_start(&self) -> u64 {
        self.loop_start
    }

    /// Inclusive loop end
    pub fn loop_end(&self) -> u64 {
        self.loop_end
    }

    pub fn loop_count(&self) -> LoopCount {
        self.loop_count
    }

    /// Wraps taken since the last reset
    pub fn wraps(&self) -> u32 {
        self.wraps
    }

    pub fn is_finished(&self) -> bool {
        self.current >= self.total
    }

    /// The next boundary is the loop end rather than the end of data
    pub fn will_wrap(&self) -> bool {
        self.loop_count.is_looping() && self.current <= self.loop_end
    }

    /// Frames until the next boundary
    pub fn frames_to_boundary(&self) -> u64 {
        if self.will_wrap() {
            self.loop_end + 1 - self.current
        } else {
            self.total.saturating_sub(self.current)
        }
    }

    /// Advance by at most `frames`, stopping at the first boundary
    ///
    /// Reaching the loop end (while looping) wraps to loop start and
    /// decrements the loop count; reaching the end of data leaves the
    /// position at `total`.
    pub fn advance(&mut self, frames: u64) -> Advance {
        let wrapping = self.will_wrap();
        let limit = self.frames_to_boundary();
        let applied = frames.min(limit);
        self.current += applied;

        let wrapped = wrapping && applied == limit && applied > 0;
        if wrapped {
            self.current = self.loop_start;
            self.loop_count = self.loop_count.decrement();
            self.wraps += 1;
            trace!(
                "Position wrapped to {} (loop count now {})",
                self.loop_start,
                self.loop_count
            );
        }
        Advance { applied, wrapped }
    }

    /// Jump to `frame` with a fresh loop count (seek)
    pub fn reset(&mut self, frame: u64, loop_count: LoopCount) {
        self.current = frame.min(self.total);
        self.loop_count = loop_count;
        self.wraps = 0;
    }

    /// Replace the remaining loop count (stop-looping)
    pub fn set_loop_count(&mut self, loop_count: LoopCount) {
        self.loop_count = loop_count;
    }
}
