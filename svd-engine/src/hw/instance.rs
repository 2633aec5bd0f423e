//! Decoder instance record
//!
//! Scheduler-owned state of one hardware voice: the job queued for the next
//! batch, the status of the last batch it took part in, and its output ring.

use super::context::{JobDescriptor, JobResult};
use super::ring::OutputRing;
use std::fmt;

/// Generational handle of a decoder instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// Sections present in a queued job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobFlags {
    pub init_format: bool,
    pub gapless: bool,
    pub resample: bool,
    pub decode: bool,
}

impl JobFlags {
    pub fn of(job: &JobDescriptor) -> Self {
        Self {
            init_format: job.format.is_some(),
            gapless: job.gapless.is_some(),
            resample: job.resample.is_some(),
            decode: job.decode.is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.init_format || self.gapless || self.resample || self.decode)
    }
}

/// Status of the last batch this instance took part in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// No batch outcome pending for the owner
    Invalid,
    InProgress,
    Success,
    Failure,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    /// Destroyed while its batch was in flight; freed when the batch resolves
    PendingFree,
}

#[derive(Debug)]
pub struct DecoderInstance {
    pub(crate) id: InstanceId,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) status: BatchStatus,
    pub(crate) error_code: Option<i32>,
    pub(crate) pending: Option<JobDescriptor>,
    pub(crate) results: Vec<JobResult>,
    pub(crate) ring: OutputRing,
}

impl DecoderInstance {
    pub(crate) fn new(id: InstanceId, ring: OutputRing) -> Self {
        Self {
            id,
            lifecycle: Lifecycle::Active,
            status: BatchStatus::Invalid,
            error_code: None,
            pending: None,
            results: Vec::new(),
            ring,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn error_code(&self) -> Option<i32> {
        self.error_code
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Sections of the job queued for the next batch
    pub fn job_flags(&self) -> JobFlags {
        self.pending.as_ref().map(JobFlags::of).unwrap_or_default()
    }

    pub fn ring(&self) -> &OutputRing {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut OutputRing {
        &mut self.ring
    }
}
