//! Core value types shared by every engine component

use serde::{Deserialize, Serialize};
use std::fmt;

/// Remaining loop count of a voice
///
/// `0` loops forever, `1` is the last (or only) pass, `n >= 2` means the
/// loop region will still be played `n - 1` more times after this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoopCount(u16);

impl LoopCount {
    /// Loop forever
    pub const INFINITE: LoopCount = LoopCount(0);

    /// Play through once, no further wraps
    pub const ONE_SHOT: LoopCount = LoopCount(1);

    pub const fn new(count: u16) -> Self {
        LoopCount(count)
    }

    /// Build from a remaining-wrap count (`wraps + 1` passes), saturating
    pub fn from_remaining_wraps(wraps: u32) -> Self {
        LoopCount(wraps.saturating_add(1).min(u16::MAX as u32) as u16)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn is_infinite(self) -> bool {
        self.0 == 0
    }

    pub fn is_one_shot(self) -> bool {
        self.0 == 1
    }

    /// True when reaching the loop end wraps back to the loop start
    pub fn is_looping(self) -> bool {
        self.0 != 1
    }

    /// Count after one wrap; the infinite and one-shot sentinels stay put
    pub fn decrement(self) -> Self {
        match self.0 {
            0 | 1 => self,
            n => LoopCount(n - 1),
        }
    }
}

impl Default for LoopCount {
    fn default() -> Self {
        LoopCount::ONE_SHOT
    }
}

impl fmt::Display for LoopCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "infinite"),
            n => write!(f, "{}", n),
        }
    }
}

/// Encoded sample format of a media file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatTag {
    /// Little-endian signed 16-bit PCM
    Pcm16,
    /// IMA ADPCM, 4 bits per sample in fixed-size blocks
    ImaAdpcm,
}

/// Canonical output format handed to the mixer (interleaved i16)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Outcome of a buffer request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferStatus {
    /// Data returned, more will follow
    DataReady,
    /// Data (possibly none) returned, and nothing follows it
    NoMoreData,
    /// Nothing available yet; retry on a later tick
    NotReady,
}
