//! Streamed voice decode engine
//!
//! Pulls encoded audio from a byte stream provider in bounded chunks, drives a
//! software or hardware-backed decoder, and hands fixed-format PCM to a mixer
//! one refill at a time. Seek, looping, pitch hand-off and virtualization are
//! handled per voice by [`voice::SourceMedia`]; hardware decode jobs from all
//! voices are coalesced into shared batches by [`hw::HwBatchScheduler`].
//!
//! # Tick Model
//!
//! ```text
//! Engine::begin_tick ── poll in-flight batch
//!   SourceMedia::get_buffer ── Codec::get_buffer ── StreamingBuffer / ring slot
//!   SourceMedia::release_buffer
//!   SourceMedia::prepare_next_buffer ── HardwareCodec queues jobs
//! Engine::end_tick ── HwBatchScheduler::submit_jobs (fires when starving)
//! ```

pub mod codec;
pub mod engine;
pub mod error;
pub mod header;
pub mod hw;
pub mod io;
pub mod position;
pub mod stream;
pub mod types;
pub mod voice;

pub use engine::Engine;
pub use error::{Diagnostic, Error, Result, Tagged};
pub use types::{AudioFormat, BufferStatus, FormatTag, LoopCount};
