//! Coprocessor decode context
//!
//! A [`DecodeContext`] accepts one batch of jobs at a time, each job
//! addressed to a decoder instance. The scheduler is the only caller.

use super::instance::InstanceId;
use crate::error::Result;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Job error: the coprocessor went away
pub const ERR_DISCONNECTED: i32 = -1;
/// Job error: decode requested before the instance format was set
pub const ERR_NOT_INITIALIZED: i32 = -2;
/// Job error: input bytes are not a valid block sequence
pub const ERR_BITSTREAM: i32 = -3;
/// Job error: the resampler rejected its configuration
pub const ERR_RESAMPLER: i32 = -4;

/// Most input spans one decode job may reference
pub const MAX_INPUT_SPANS: usize = 2;

/// Coprocessor-assigned batch identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stream format an instance decodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatParams {
    pub channels: u16,
    pub sample_rate: u32,
    pub block_align: u16,
    pub frames_per_block: u32,
}

/// Gapless trim of the current decode range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GaplessParams {
    /// Decoded frames to drop at the head of the range
    pub skip: u32,
    /// Frames to keep after the skip
    pub keep: u64,
    /// Restart skip/keep accounting; unset when only `keep` changes
    pub new_range: bool,
}

/// Resampler settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResampleParams {
    /// Output frames per source frame
    pub ratio: f64,
    /// Drop resampler history before this job
    pub reset: bool,
}

/// Block decode request
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeJob {
    /// Whole blocks, possibly split over two spans
    pub inputs: Vec<Bytes>,
    pub blocks: u32,
    /// Last decode of the stream; flush the resampler
    pub end_of_stream: bool,
}

/// Everything one instance asks for in one batch
///
/// Present sections run in field order: format, gapless, resample, decode.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub instance: InstanceId,
    pub format: Option<FormatParams>,
    pub gapless: Option<GaplessParams>,
    pub resample: Option<ResampleParams>,
    pub decode: Option<DecodeJob>,
}

impl JobDescriptor {
    pub fn new(instance: InstanceId) -> Self {
        Self {
            instance,
            format: None,
            gapless: None,
            resample: None,
            decode: None,
        }
    }
}

/// Per-instance outcome of a resolved batch
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobResult {
    pub pcm: Vec<i16>,
    pub output_frames: usize,
    /// Decoded frames handed to the resampler by this job (after trim)
    pub source_frames: u64,
    /// Source frames held inside the resampler after this job
    pub buffered_frames: u64,
    pub end_of_stream: bool,
    pub error: Option<i32>,
}

impl JobResult {
    pub fn failed(code: i32) -> Self {
        Self {
            error: Some(code),
            ..Self::default()
        }
    }
}

/// Final state of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchCompletion {
    /// One result per submitted job, in submission order
    Resolved(Vec<JobResult>),
    /// Whole-batch failure
    Failed { code: i32 },
    Cancelled,
}

impl BatchCompletion {
    pub fn label(&self) -> &'static str {
        match self {
            BatchCompletion::Resolved(_) => "success",
            BatchCompletion::Failed { .. } => "failure",
            BatchCompletion::Cancelled => "cancelled",
        }
    }
}

/// Coprocessor interface
pub trait DecodeContext {
    /// Start a batch; the scheduler never submits while one is in flight
    fn submit(&mut self, jobs: &[JobDescriptor]) -> Result<BatchId>;

    /// Block up to `timeout`; `None` when the batch is still running
    fn wait(&mut self, batch: BatchId, timeout: Duration) -> Result<Option<BatchCompletion>>;

    /// Non-blocking completion check
    fn poll(&mut self, batch: BatchId) -> Result<Option<BatchCompletion>>;

    /// Cancel and block until the coprocessor acknowledges
    fn cancel(&mut self, batch: BatchId) -> Result<BatchCompletion>;

    /// Drop coprocessor-side state of a destroyed instance
    fn release_instance(&mut self, instance: InstanceId);

    fn name(&self) -> &str;
}
