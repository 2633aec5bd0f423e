//! Engine root
//!
//! Owns everything shared between voices: configuration, the hardware batch
//! scheduler (and through it the decode context), the observer event bus, the
//! header parser and the codec factory. Voices receive handles to these at
//! creation; nothing in the engine is global.
//!
//! The mixing graph brackets every tick:
//!
//! ```text
//! engine.begin_tick()      reap a finished batch, if any
//! for voice in voices {
//!     voice.get_buffer() / voice.release_buffer()
//!     voice.prepare_next_buffer()
//! }
//! engine.end_tick()        fire queued jobs when some voice is starving
//! ```

use crate::codec::{CodecFactory, DefaultCodecFactory};
use crate::error::Result;
use crate::header::{HeaderParser, WaveHeaderParser};
use crate::hw::{
    BatchReport, DecodeContext, EmulatedCoprocessor, HwBatchScheduler, SchedulerStats,
    SharedScheduler, SubmitOutcome,
};
use crate::io::{FileProvider, MemoryProvider, StreamProvider};
use crate::voice::{SourceMedia, VoiceParams};
use bytes::Bytes;
use chrono::Utc;
use std::cell::Ref;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use svd_common::config::EngineConfig;
use svd_common::events::{EngineEvent, EventBus};
use tracing::{debug, info, warn};

/// Decode engine shared by all voices of one mixing graph
pub struct Engine {
    config: EngineConfig,
    scheduler: SharedScheduler,
    events: Arc<EventBus>,
    parser: Rc<dyn HeaderParser>,
    factory: Rc<dyn CodecFactory>,
}

impl Engine {
    /// Create an engine over a decode context
    ///
    /// # Errors
    /// Invalid configuration, or failure to allocate the batch buffer.
    pub fn new(config: EngineConfig, context: Box<dyn DecodeContext>) -> Result<Self> {
        config.validate()?;
        let scheduler = HwBatchScheduler::new(context, config.hardware.clone())?.into_shared();
        let factory = DefaultCodecFactory::new(scheduler.clone(), config.hardware.clone());
        let events = Arc::new(EventBus::new(config.event_capacity));

        info!(
            "Engine ready (refill {} frames, ring {}x{} frames)",
            config.voice.refill_frames, config.hardware.ring_slots, config.hardware.slot_frames
        );

        Ok(Self {
            config,
            scheduler,
            events,
            parser: Rc::new(WaveHeaderParser),
            factory: Rc::new(factory),
        })
    }

    /// Create an engine backed by the software coprocessor
    pub fn with_emulated(config: EngineConfig) -> Result<Self> {
        let latency = Duration::from_millis(config.hardware.emulated_latency_ms);
        let context = EmulatedCoprocessor::new(latency)?;
        Self::new(config, Box::new(context))
    }

    /// Replace the codec factory used for voices created from now on
    pub fn with_factory(mut self, factory: Rc<dyn CodecFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Replace the header parser used for voices created from now on
    pub fn with_parser(mut self, parser: Rc<dyn HeaderParser>) -> Self {
        self.parser = parser;
        self
    }

    // ========================================================================
    // Voices
    // ========================================================================

    /// Create an unstarted voice over `provider`
    ///
    /// Voices without an explicit I/O priority get `stream.priority`.
    pub fn create_voice(&self, provider: Box<dyn StreamProvider>, mut params: VoiceParams) -> SourceMedia {
        params.priority.get_or_insert(self.config.stream.priority);
        let voice = SourceMedia::new(
            provider,
            params,
            self.config.voice.clone(),
            self.parser.clone(),
            self.factory.clone(),
            self.events.clone(),
        );
        debug!("Voice {} created", voice.id());
        voice
    }

    /// Voice over memory-resident media
    pub fn memory_voice(&self, media: Bytes, params: VoiceParams) -> SourceMedia {
        let provider = MemoryProvider::new(media, self.config.stream.memory_block_size);
        self.create_voice(Box::new(provider), params)
    }

    /// Voice streaming from a file
    pub fn file_voice(&self, path: &Path, params: VoiceParams) -> Result<SourceMedia> {
        let provider = FileProvider::open(
            path,
            self.config.stream.file_read_size,
            self.config.stream.file_alignment,
        )?;
        Ok(self.create_voice(Box::new(provider), params))
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Reap the in-flight batch if it has finished
    pub fn begin_tick(&self) -> Result<Option<BatchReport>> {
        let report = self.scheduler.borrow_mut().poll_jobs()?;
        self.announce(report);
        Ok(report)
    }

    /// Submit queued jobs; fires only when some voice is close to starving
    pub fn end_tick(&self) -> Result<SubmitOutcome> {
        self.scheduler.borrow_mut().submit_jobs()
    }

    /// Bounded blocking wait for the in-flight batch
    pub fn resolve_batch(&self) -> Result<Option<BatchReport>> {
        let report = self.scheduler.borrow_mut().wait_for_jobs()?;
        self.announce(report);
        Ok(report)
    }

    /// Cancel the in-flight batch and wait for the acknowledgement
    ///
    /// Call before dropping voices at teardown.
    pub fn shutdown(&self) -> Result<Option<BatchReport>> {
        let report = self.scheduler.borrow_mut().cancel_jobs()?;
        if let Some(report) = report {
            info!("Batch {} cancelled at shutdown", report.id);
        }
        self.announce(report);
        Ok(report)
    }

    fn announce(&self, report: Option<BatchReport>) {
        let Some(report) = report else {
            return;
        };
        self.events.emit_lossy(EngineEvent::BatchResolved {
            batch_id: report.id.0,
            status: report.status_label().to_string(),
            participants: report.participants,
            timestamp: Utc::now(),
        });
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared scheduler handle
    pub fn scheduler(&self) -> SharedScheduler {
        self.scheduler.clone()
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// The decode context, for subsystems sharing the coprocessor
    pub fn decode_context(&self) -> Ref<'_, dyn DecodeContext + 'static> {
        Ref::map(self.scheduler.borrow(), |scheduler| scheduler.context())
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.borrow().stats()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let Ok(mut scheduler) = self.scheduler.try_borrow_mut() else {
            return;
        };
        if scheduler.in_flight().is_some() {
            if let Err(e) = scheduler.cancel_jobs() {
                warn!("Cancelling in-flight batch on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::context::{BatchCompletion, BatchId, JobDescriptor, ResampleParams};

    /// Context that never completes anything on its own
    struct IdleContext {
        next: u64,
        cancelled: Rc<std::cell::Cell<u32>>,
    }

    impl DecodeContext for IdleContext {
        fn submit(&mut self, _jobs: &[JobDescriptor]) -> Result<BatchId> {
            self.next += 1;
            Ok(BatchId(self.next))
        }

        fn wait(&mut self, _batch: BatchId, _timeout: Duration) -> Result<Option<BatchCompletion>> {
            Ok(None)
        }

        fn poll(&mut self, _batch: BatchId) -> Result<Option<BatchCompletion>> {
            Ok(None)
        }

        fn cancel(&mut self, _batch: BatchId) -> Result<BatchCompletion> {
            self.cancelled.set(self.cancelled.get() + 1);
            Ok(BatchCompletion::Cancelled)
        }

        fn release_instance(&mut self, _instance: crate::hw::InstanceId) {}

        fn name(&self) -> &str {
            "idle"
        }
    }

    fn engine() -> (Engine, Rc<std::cell::Cell<u32>>) {
        let cancelled = Rc::new(std::cell::Cell::new(0));
        let context = IdleContext {
            next: 0,
            cancelled: cancelled.clone(),
        };
        (
            Engine::new(EngineConfig::default(), Box::new(context)).unwrap(),
            cancelled,
        )
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.hardware.low_water_mark = config.hardware.ring_slots;
        let context = IdleContext {
            next: 0,
            cancelled: Rc::new(std::cell::Cell::new(0)),
        };
        assert!(Engine::new(config, Box::new(context)).is_err());
    }

    #[test]
    fn test_decode_context_accessor() {
        let (engine, _) = engine();
        assert_eq!(engine.decode_context().name(), "idle");
    }

    #[test]
    fn test_idle_tick() {
        let (engine, _) = engine();
        assert_eq!(engine.begin_tick().unwrap(), None);
        assert_eq!(engine.end_tick().unwrap(), SubmitOutcome::Idle);
        assert_eq!(engine.shutdown().unwrap(), None);
        assert_eq!(engine.stats(), SchedulerStats::default());
    }

    #[test]
    fn test_voices_share_the_event_bus() {
        let (engine, _) = engine();
        let _rx = engine.events().subscribe();
        let voice = engine.memory_voice(Bytes::from_static(b"RIFF"), VoiceParams::default());
        assert_eq!(engine.events().subscriber_count(), 1);
        assert_eq!(voice.state(), crate::voice::VoiceState::Uninitialized);
    }

    #[test]
    fn test_voice_priority_defaults_to_stream_setting() {
        let mut config = EngineConfig::default();
        config.stream.priority = 80;
        let context = IdleContext {
            next: 0,
            cancelled: Rc::new(std::cell::Cell::new(0)),
        };
        let engine = Engine::new(config, Box::new(context)).unwrap();

        let voice = engine.memory_voice(Bytes::from_static(b"RIFF"), VoiceParams::default());
        assert_eq!(voice.params().priority, Some(80));

        let params = VoiceParams {
            priority: Some(10),
            ..VoiceParams::default()
        };
        let voice = engine.memory_voice(Bytes::from_static(b"RIFF"), params);
        assert_eq!(voice.params().priority, Some(10));
    }

    #[test]
    fn test_drop_cancels_in_flight_batch() {
        let (engine, cancelled) = engine();
        {
            let scheduler = engine.scheduler();
            let mut scheduler = scheduler.borrow_mut();
            let id = scheduler.create_instance(1).unwrap();
            let mut job = JobDescriptor::new(id);
            job.resample = Some(ResampleParams {
                ratio: 1.0,
                reset: true,
            });
            scheduler.enqueue_job(job).unwrap();
            assert!(matches!(
                scheduler.submit_jobs().unwrap(),
                SubmitOutcome::Fired(_)
            ));
        }
        drop(engine);
        assert_eq!(cancelled.get(), 1);
    }
}
