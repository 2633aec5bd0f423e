//! Codec contract
//!
//! Every format plugs into the orchestrator through [`Codec`]. A codec owns
//! decode state only; bytes come from the voice's [`StreamingBuffer`], which
//! is lent to the codec for the duration of each call.
//!
//! All operations return [`Tagged`] results so a diagnostic can be logged by
//! the orchestrator without turning it into control flow.

mod factory;
mod hardware;
mod pcm;

pub use factory::{CodecFactory, DefaultCodecFactory};
pub use hardware::HardwareCodec;
pub use pcm::PcmCodec;

use crate::error::{Result, Tagged};
use crate::header::MediaHeader;
use crate::io::StreamHeuristics;
use crate::stream::StreamingBuffer;
use crate::types::{AudioFormat, BufferStatus, LoopCount};

/// Capability bits reported by a codec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecAttributes {
    /// Decoding runs on the hardware coprocessor
    pub hardware_backed: bool,
    /// The codec applies the pitch ratio itself
    pub resampling_bypass: bool,
    /// Stored offsets must be rebased when memory-resident media moves
    pub requires_relocation: bool,
}

/// Result of codec initialization
#[derive(Debug, Clone, PartialEq)]
pub struct CodecInfo {
    pub output_format: AudioFormat,
    pub source_sample_rate: u32,
    pub total_frames: u64,
    pub heuristics: StreamHeuristics,
    pub attributes: CodecAttributes,
}

/// Voice-level parameters known at init time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodecParams {
    /// Inclusive loop region in frames
    pub loop_start: u64,
    pub loop_end: u64,
    pub loop_count: LoopCount,
    pub priority: u8,
}

/// One refill request from the orchestrator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefillRequest {
    /// Maximum output frames
    pub max_frames: usize,
    /// Source frames consumed per output frame
    pub pitch_ratio: f64,
}

/// Decoded PCM handed back by [`Codec::get_buffer`]
#[derive(Debug, Clone, PartialEq)]
pub struct CodecBuffer {
    /// Interleaved output samples
    pub samples: Vec<i16>,
    /// Output frames in `samples`
    pub frames: usize,
    /// Source frames these output frames represent
    pub source_frames: u64,
    pub status: BufferStatus,
}

impl CodecBuffer {
    pub fn not_ready() -> Self {
        Self {
            samples: Vec::new(),
            frames: 0,
            source_frames: 0,
            status: BufferStatus::NotReady,
        }
    }
}

/// Outcome of [`Codec::prepare_next_buffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareStatus {
    /// Work queued (or still pending) for the next batch
    Queued,
    /// Nothing to do this tick
    Idle,
    /// Input bytes not available yet
    NotReady,
    /// The final decode of the stream has been queued
    NoMoreData,
}

/// How a virtual voice comes back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualBehavior {
    /// Re-seek to where playback would be had it kept playing
    FromElapsedTime,
    /// Restart from frame 0
    FromBeginning,
    /// Continue exactly where it stopped
    Resume,
}

/// Resolved seek entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekTarget {
    /// Frame decoding restarts at (≤ the desired frame)
    pub frame: u64,
    /// File offset of that entry point
    pub byte_offset: u64,
}

/// Polymorphic decoder interface
pub trait Codec {
    /// Consume the parsed header; report output format and stream heuristics
    fn init(&mut self, header: &MediaHeader, params: &CodecParams) -> Result<Tagged<CodecInfo>>;

    /// Prime decode state once the header bytes have been consumed
    fn warmup(&mut self, _stream: &mut StreamingBuffer) -> Result<Tagged<()>> {
        Ok(Tagged::ok(()))
    }

    /// Queue decode work ahead of need (no-op for synchronous codecs)
    fn prepare_next_buffer(
        &mut self,
        _stream: &mut StreamingBuffer,
    ) -> Result<Tagged<PrepareStatus>> {
        Ok(Tagged::ok(PrepareStatus::Idle))
    }

    /// Produce up to `request.max_frames` output frames
    fn get_buffer(
        &mut self,
        stream: &mut StreamingBuffer,
        request: &RefillRequest,
    ) -> Result<Tagged<CodecBuffer>>;

    /// The mixer is done with the last buffer
    fn release_buffer(&mut self);

    fn virtual_on(&mut self, behavior: VirtualBehavior) -> Result<Tagged<()>>;

    fn virtual_off(&mut self, behavior: VirtualBehavior) -> Result<Tagged<()>>;

    /// Nearest decodable entry point at or before `desired_frame`
    fn find_closest_file_offset(&self, desired_frame: u64) -> Result<Tagged<SeekTarget>>;

    /// Internal bookkeeping after the stream has been repositioned to `target`
    fn seek(
        &mut self,
        target: &SeekTarget,
        desired_frame: u64,
        loop_count: LoopCount,
    ) -> Result<Tagged<()>>;

    /// The stream stopped looping; align internal loop state with it
    fn stop_looping(&mut self, stream: &StreamingBuffer) -> Result<Tagged<()>>;

    fn is_virtual(&self) -> bool;
}
