//! Hardware batch scheduling across voices
//!
//! Runs the scheduler against the emulated coprocessor: batch coalescing,
//! deferral while rings are full, deferred instance destruction and failure
//! propagation to the owning voice.

mod helpers;

use helpers::*;
use std::time::Duration;
use svd_common::config::EngineConfig;
use svd_common::events::EngineEvent;
use svd_engine::hw::context::FormatParams;
use svd_engine::hw::{
    BatchReport, BatchStatus, EmulatedCoprocessor, HwBatchScheduler, JobDescriptor, SubmitOutcome,
};
use svd_engine::types::BufferStatus;
use svd_engine::voice::{VoiceParams, VoiceState};
use svd_engine::{Engine, Error};

fn resolve(engine: &Engine) -> BatchReport {
    for _ in 0..50 {
        if let Some(report) = engine.resolve_batch().unwrap() {
            return report;
        }
    }
    panic!("batch never resolved");
}

#[test]
fn test_voices_share_one_batch() {
    let engine = engine();
    let mut rx = engine.events().subscribe();
    let mut first = engine.memory_voice(adpcm_wav(16, 1000, None), VoiceParams::default());
    let mut second = engine.memory_voice(adpcm_wav(16, 1000, None), VoiceParams::default());
    start(&mut first);
    start(&mut second);

    engine.begin_tick().unwrap();
    for voice in [&mut first, &mut second] {
        assert_eq!(voice.get_buffer().unwrap().status, BufferStatus::NotReady);
        voice.release_buffer();
        voice.prepare_next_buffer().unwrap();
    }
    assert!(matches!(engine.end_tick().unwrap(), SubmitOutcome::Fired(_)));
    let report = resolve(&engine);
    assert_eq!(report.participants, 2);
    assert_eq!(report.status, BatchStatus::Success);

    let resolved: Vec<usize> = std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|event| match event {
            EngineEvent::BatchResolved { participants, .. } => Some(participants),
            _ => None,
        })
        .collect();
    assert_eq!(resolved, vec![2]);

    let a = samples(&drain(&engine, &mut first));
    let b = samples(&drain(&engine, &mut second));
    assert_eq!(a.len(), 1000);
    assert_eq!(a, b);
}

#[test]
fn test_long_voice_refills_through_deferred_batches() {
    let engine = engine();
    let total = 64 * ADPCM_FRAMES_PER_BLOCK;
    let mut voice = engine.memory_voice(adpcm_wav(64, total, None), VoiceParams::default());
    start(&mut voice);

    let out = samples(&drain(&engine, &mut voice));
    assert_eq!(out.len(), total as usize);
    for (frame, &sample) in out.iter().enumerate() {
        assert_eq!(sample, adpcm_value(frame as u64), "frame {}", frame);
    }

    let stats = engine.stats();
    assert!(stats.batches_fired > 1);
    assert!(stats.batches_deferred >= 1);
    assert_eq!(stats.batches_failed, 0);
}

#[test]
fn test_destroy_during_batch_is_deferred() {
    let context = EmulatedCoprocessor::new(Duration::ZERO).unwrap();
    let mut scheduler =
        HwBatchScheduler::new(Box::new(context), EngineConfig::default().hardware).unwrap();

    let id = scheduler.create_instance(1).unwrap();
    let mut job = JobDescriptor::new(id);
    job.format = Some(FormatParams {
        channels: 1,
        sample_rate: 22_050,
        block_align: ADPCM_BLOCK_ALIGN,
        frames_per_block: ADPCM_FRAMES_PER_BLOCK,
    });
    scheduler.enqueue_job(job).unwrap();
    assert!(matches!(scheduler.submit_jobs().unwrap(), SubmitOutcome::Fired(_)));

    scheduler.destroy_instance(id).unwrap();
    assert_eq!(scheduler.live_instances(), 1);
    assert_eq!(scheduler.stats().instances_freed, 0);

    let mut report = None;
    for _ in 0..50 {
        report = scheduler.wait_for_jobs().unwrap();
        if report.is_some() {
            break;
        }
    }
    assert_eq!(report.map(|r| r.status), Some(BatchStatus::Success));
    assert_eq!(scheduler.live_instances(), 0);
    assert_eq!(scheduler.stats().instances_freed, 1);
    assert!(scheduler.instance(id).is_none());

    // The slot is reused under a new generation; the stale handle stays dead
    let reused = scheduler.create_instance(1).unwrap();
    assert_ne!(reused, id);
    assert!(scheduler.instance(id).is_none());
    assert!(scheduler.instance(reused).is_some());
}

#[test]
fn test_batch_failure_fails_the_voice() {
    let context = EmulatedCoprocessor::new(Duration::ZERO).unwrap();
    let failures = context.failure_switch();
    let engine = Engine::new(EngineConfig::default(), Box::new(context)).unwrap();
    let mut rx = engine.events().subscribe();

    let mut voice = engine.memory_voice(adpcm_wav(16, 1000, None), VoiceParams::default());
    start(&mut voice);
    failures.fail_next_batch(-3);

    engine.begin_tick().unwrap();
    assert_eq!(voice.get_buffer().unwrap().status, BufferStatus::NotReady);
    voice.release_buffer();
    voice.prepare_next_buffer().unwrap();
    assert!(matches!(engine.end_tick().unwrap(), SubmitOutcome::Fired(_)));
    assert_eq!(resolve(&engine).status, BatchStatus::Failure);

    engine.begin_tick().unwrap();
    let err = voice.get_buffer().unwrap_err();
    assert!(matches!(err, Error::Hardware { code: -3 }));
    assert_eq!(voice.state(), VoiceState::Failed);
    assert_eq!(engine.stats().batches_failed, 1);

    let mut failure_diagnostic = None;
    let mut batch_status = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            EngineEvent::VoiceFailed { diagnostic, .. } => failure_diagnostic = diagnostic,
            EngineEvent::BatchResolved { status, .. } => batch_status = Some(status),
            _ => {}
        }
    }
    assert_eq!(failure_diagnostic.as_deref(), Some("HardwareFailure"));
    assert_eq!(batch_status.as_deref(), Some("failure"));
}
