//! Hardware decode path
//!
//! - [`scheduler`]: batches jobs from all hardware voices, one batch in flight
//! - [`instance`]: per-voice decoder record owned by the scheduler
//! - [`ring`]: per-instance output slots read by the voice
//! - [`context`]: coprocessor interface
//! - [`emulated`]: worker-thread coprocessor with IMA ADPCM and resampling

pub mod adpcm;
pub mod context;
pub mod emulated;
pub mod instance;
pub mod resample;
pub mod ring;
pub mod scheduler;

pub use context::{BatchCompletion, BatchId, DecodeContext, JobDescriptor, JobResult};
pub use emulated::{EmulatedCoprocessor, FailureSwitch};
pub use instance::{BatchStatus, DecoderInstance, InstanceId, JobFlags, Lifecycle};
pub use ring::OutputRing;
pub use scheduler::{
    BatchReport, HwBatchScheduler, InstancePoll, SchedulerStats, SharedScheduler, SubmitOutcome,
};
