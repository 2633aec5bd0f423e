//! Emulated decode coprocessor
//!
//! Runs batches on a dedicated worker thread so batch latency is real: the
//! engine thread submits, keeps mixing, and picks up the completion on a
//! later tick. Decoder state (format, gapless trim, resampler) lives on the
//! worker, keyed by instance id.
//!
//! Tests drive failure paths through [`FailureSwitch`].

use super::adpcm;
use super::context::{
    BatchCompletion, BatchId, DecodeContext, FormatParams, JobDescriptor, JobResult,
    ERR_BITSTREAM, ERR_DISCONNECTED, ERR_NOT_INITIALIZED, ERR_RESAMPLER,
};
use super::instance::InstanceId;
use super::resample::SampleRateConverter;
use crate::error::{Error, Result};
use bytes::BytesMut;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Input frames per resampler call on the worker
const RESAMPLER_CHUNK_FRAMES: usize = 256;

enum Command {
    Batch { id: u64, jobs: Vec<JobDescriptor> },
    Release(InstanceId),
    Shutdown,
}

/// Makes the next submitted batch fail with a given code
#[derive(Debug, Clone, Default)]
pub struct FailureSwitch(Arc<AtomicI32>);

impl FailureSwitch {
    /// Fail the next batch with `code` (must be non-zero)
    pub fn fail_next_batch(&self, code: i32) {
        self.0.store(code, Ordering::SeqCst);
    }

    fn take(&self) -> i32 {
        self.0.swap(0, Ordering::SeqCst)
    }
}

/// Worker-side decoder state of one instance
struct InstanceDecoder {
    format: FormatParams,
    skip_remaining: u64,
    keep: u64,
    emitted: u64,
    resampler: SampleRateConverter,
}

impl InstanceDecoder {
    fn new(format: FormatParams) -> Self {
        Self {
            format,
            skip_remaining: 0,
            keep: u64::MAX,
            emitted: 0,
            resampler: SampleRateConverter::new(format.channels as usize, RESAMPLER_CHUNK_FRAMES),
        }
    }
}

/// Software stand-in for the decode coprocessor
pub struct EmulatedCoprocessor {
    commands: Sender<Command>,
    completions: Receiver<(u64, BatchCompletion)>,
    cancel: Arc<AtomicBool>,
    failures: FailureSwitch,
    next_batch: u64,
    /// Completions received while waiting for a different batch
    completed: HashMap<u64, BatchCompletion>,
    worker: Option<JoinHandle<()>>,
}

impl EmulatedCoprocessor {
    /// Spawn the worker thread
    ///
    /// # Arguments
    /// * `latency` - Artificial delay applied to every batch
    pub fn new(latency: Duration) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel();
        let (completion_tx, completion_rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let failures = FailureSwitch::default();

        let worker = {
            let cancel = cancel.clone();
            let failures = failures.clone();
            thread::Builder::new()
                .name("svd-coprocessor".to_string())
                .spawn(move || worker_loop(command_rx, completion_tx, cancel, failures, latency))?
        };

        info!("Emulated coprocessor started (latency {:?})", latency);

        Ok(Self {
            commands: command_tx,
            completions: completion_rx,
            cancel,
            failures,
            next_batch: 1,
            completed: HashMap::new(),
            worker: Some(worker),
        })
    }

    /// Handle for injecting batch failures
    pub fn failure_switch(&self) -> FailureSwitch {
        self.failures.clone()
    }

    fn receive(&mut self, batch: BatchId, deadline: Option<Instant>) -> Result<Option<BatchCompletion>> {
        if let Some(done) = self.completed.remove(&batch.0) {
            return Ok(Some(done));
        }
        loop {
            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match self.completions.recv_timeout(remaining) {
                        Ok(done) => done,
                        Err(RecvTimeoutError::Timeout) => return Ok(None),
                        Err(RecvTimeoutError::Disconnected) => {
                            return Err(Error::Hardware {
                                code: ERR_DISCONNECTED,
                            })
                        }
                    }
                }
                None => match self.completions.try_recv() {
                    Ok(done) => done,
                    Err(TryRecvError::Empty) => return Ok(None),
                    Err(TryRecvError::Disconnected) => {
                        return Err(Error::Hardware {
                            code: ERR_DISCONNECTED,
                        })
                    }
                },
            };
            let (id, completion) = received;
            if id == batch.0 {
                return Ok(Some(completion));
            }
            self.completed.insert(id, completion);
        }
    }
}

impl DecodeContext for EmulatedCoprocessor {
    fn submit(&mut self, jobs: &[JobDescriptor]) -> Result<BatchId> {
        let id = self.next_batch;
        self.next_batch += 1;
        self.commands
            .send(Command::Batch {
                id,
                jobs: jobs.to_vec(),
            })
            .map_err(|_| Error::Hardware {
                code: ERR_DISCONNECTED,
            })?;
        Ok(BatchId(id))
    }

    fn wait(&mut self, batch: BatchId, timeout: Duration) -> Result<Option<BatchCompletion>> {
        self.receive(batch, Some(Instant::now() + timeout))
    }

    fn poll(&mut self, batch: BatchId) -> Result<Option<BatchCompletion>> {
        self.receive(batch, None)
    }

    fn cancel(&mut self, batch: BatchId) -> Result<BatchCompletion> {
        self.cancel.store(true, Ordering::SeqCst);
        let result = loop {
            match self.receive(batch, Some(Instant::now() + Duration::from_millis(50))) {
                Ok(Some(done)) => break Ok(done),
                Ok(None) => continue,
                Err(e) => break Err(e),
            }
        };
        // Worker is idle once the batch is acknowledged
        self.cancel.store(false, Ordering::SeqCst);
        result
    }

    fn release_instance(&mut self, instance: InstanceId) {
        let _ = self.commands.send(Command::Release(instance));
    }

    fn name(&self) -> &str {
        "emulated"
    }
}

impl Drop for EmulatedCoprocessor {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Coprocessor worker panicked");
            }
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

fn worker_loop(
    commands: Receiver<Command>,
    completions: Sender<(u64, BatchCompletion)>,
    cancel: Arc<AtomicBool>,
    failures: FailureSwitch,
    latency: Duration,
) {
    let mut decoders: HashMap<InstanceId, InstanceDecoder> = HashMap::new();

    while let Ok(command) = commands.recv() {
        match command {
            Command::Batch { id, jobs } => {
                if !latency.is_zero() {
                    thread::sleep(latency);
                }
                let completion = run_batch(&mut decoders, &jobs, &cancel, &failures);
                debug!("Batch {} finished: {}", id, completion.label());
                if completions.send((id, completion)).is_err() {
                    break;
                }
            }
            Command::Release(instance) => {
                decoders.remove(&instance);
            }
            Command::Shutdown => break,
        }
    }
    debug!("Coprocessor worker exiting");
}

fn run_batch(
    decoders: &mut HashMap<InstanceId, InstanceDecoder>,
    jobs: &[JobDescriptor],
    cancel: &AtomicBool,
    failures: &FailureSwitch,
) -> BatchCompletion {
    let code = failures.take();
    if code != 0 {
        return BatchCompletion::Failed { code };
    }
    let mut results = Vec::with_capacity(jobs.len());
    for job in jobs {
        if cancel.load(Ordering::SeqCst) {
            return BatchCompletion::Cancelled;
        }
        results.push(run_job(decoders, job));
    }
    if cancel.load(Ordering::SeqCst) {
        return BatchCompletion::Cancelled;
    }
    BatchCompletion::Resolved(results)
}

fn run_job(decoders: &mut HashMap<InstanceId, InstanceDecoder>, job: &JobDescriptor) -> JobResult {
    if let Some(format) = job.format {
        decoders.insert(job.instance, InstanceDecoder::new(format));
    }
    let Some(decoder) = decoders.get_mut(&job.instance) else {
        return JobResult::failed(ERR_NOT_INITIALIZED);
    };

    if let Some(gapless) = job.gapless {
        if gapless.new_range {
            decoder.skip_remaining = gapless.skip as u64;
            decoder.emitted = 0;
        }
        decoder.keep = gapless.keep;
    }

    if let Some(resample) = job.resample {
        if resample.reset {
            decoder.resampler.reset();
        }
        if decoder.resampler.set_ratio(resample.ratio).is_err() {
            return JobResult::failed(ERR_RESAMPLER);
        }
    }

    let Some(decode) = job.decode.as_ref() else {
        return JobResult {
            buffered_frames: decoder.resampler.buffered_frames(),
            ..JobResult::default()
        };
    };

    let channels = decoder.format.channels as usize;
    let block_align = decoder.format.block_align as usize;
    let decoded = if decode.inputs.len() == 1 {
        adpcm::decode_blocks(&decode.inputs[0], decode.blocks as usize, block_align, channels)
    } else {
        let mut joined = BytesMut::new();
        for span in &decode.inputs {
            joined.extend_from_slice(span);
        }
        adpcm::decode_blocks(&joined, decode.blocks as usize, block_align, channels)
    };
    let Ok(decoded) = decoded else {
        return JobResult::failed(ERR_BITSTREAM);
    };

    let frames = (decoded.len() / channels) as u64;
    let skip = decoder.skip_remaining.min(frames);
    decoder.skip_remaining -= skip;
    let take = (frames - skip).min(decoder.keep.saturating_sub(decoder.emitted));
    decoder.emitted += take;

    let start = skip as usize * channels;
    let trimmed = &decoded[start..start + take as usize * channels];
    let Ok(pcm) = decoder.resampler.process(trimmed, decode.end_of_stream) else {
        return JobResult::failed(ERR_RESAMPLER);
    };

    JobResult {
        output_frames: pcm.len() / channels,
        pcm,
        source_frames: take,
        buffered_frames: decoder.resampler.buffered_frames(),
        end_of_stream: decode.end_of_stream,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::context::{DecodeJob, GaplessParams, ResampleParams};
    use bytes::Bytes;

    const FORMAT: FormatParams = FormatParams {
        channels: 1,
        sample_rate: 22_050,
        block_align: 36,
        frames_per_block: 65,
    };

    fn instance(index: u32) -> InstanceId {
        InstanceId {
            index,
            generation: 0,
        }
    }

    /// Blocks whose samples all equal `100 * block number`
    fn blocks(count: usize) -> Bytes {
        let mut out = Vec::new();
        for b in 0..count {
            out.extend_from_slice(&((b as i16) * 100).to_le_bytes());
            out.extend_from_slice(&[0, 0]);
            out.extend_from_slice(&[0u8; 32]);
        }
        Bytes::from(out)
    }

    fn decode_job(id: InstanceId, inputs: Vec<Bytes>, blocks: u32, last: bool) -> JobDescriptor {
        JobDescriptor {
            instance: id,
            format: Some(FORMAT),
            gapless: Some(GaplessParams {
                skip: 10,
                keep: 100,
                new_range: true,
            }),
            resample: Some(ResampleParams {
                ratio: 1.0,
                reset: false,
            }),
            decode: Some(DecodeJob {
                inputs,
                blocks,
                end_of_stream: last,
            }),
        }
    }

    fn resolved(completion: Option<BatchCompletion>) -> Vec<JobResult> {
        match completion {
            Some(BatchCompletion::Resolved(results)) => results,
            other => panic!("unexpected completion {:?}", other),
        }
    }

    #[test]
    fn test_gapless_trim_and_split_input() {
        let mut coprocessor = EmulatedCoprocessor::new(Duration::ZERO).unwrap();
        let data = blocks(2);
        let job = decode_job(instance(0), vec![data.slice(..50), data.slice(50..)], 2, true);

        let batch = coprocessor.submit(&[job]).unwrap();
        let results = resolved(coprocessor.wait(batch, Duration::from_secs(5)).unwrap());
        let result = &results[0];

        // 130 decoded, 10 skipped, 100 kept
        assert_eq!(result.error, None);
        assert_eq!(result.output_frames, 100);
        assert_eq!(result.source_frames, 100);
        assert_eq!(result.buffered_frames, 0);
        assert!(result.pcm[..55].iter().all(|&s| s == 0));
        assert!(result.pcm[55..].iter().all(|&s| s == 100));
    }

    #[test]
    fn test_decode_without_format_is_job_error() {
        let mut coprocessor = EmulatedCoprocessor::new(Duration::ZERO).unwrap();
        let mut job = decode_job(instance(3), vec![blocks(1)], 1, false);
        job.format = None;
        let batch = coprocessor.submit(&[job]).unwrap();
        let results = resolved(coprocessor.wait(batch, Duration::from_secs(5)).unwrap());
        assert_eq!(results[0].error, Some(ERR_NOT_INITIALIZED));
    }

    #[test]
    fn test_injected_failure_hits_one_batch() {
        let mut coprocessor = EmulatedCoprocessor::new(Duration::ZERO).unwrap();
        coprocessor.failure_switch().fail_next_batch(-42);

        let batch = coprocessor
            .submit(&[decode_job(instance(0), vec![blocks(1)], 1, false)])
            .unwrap();
        assert_eq!(
            coprocessor.wait(batch, Duration::from_secs(5)).unwrap(),
            Some(BatchCompletion::Failed { code: -42 })
        );

        let batch = coprocessor
            .submit(&[decode_job(instance(0), vec![blocks(1)], 1, false)])
            .unwrap();
        assert_eq!(resolved(coprocessor.wait(batch, Duration::from_secs(5)).unwrap()).len(), 1);
    }

    #[test]
    fn test_wait_times_out_under_latency() {
        let mut coprocessor = EmulatedCoprocessor::new(Duration::from_millis(200)).unwrap();
        let batch = coprocessor
            .submit(&[decode_job(instance(0), vec![blocks(1)], 1, false)])
            .unwrap();
        assert_eq!(coprocessor.poll(batch).unwrap(), None);
        assert_eq!(coprocessor.wait(batch, Duration::from_millis(1)).unwrap(), None);
        assert!(coprocessor.wait(batch, Duration::from_secs(5)).unwrap().is_some());
    }

    #[test]
    fn test_cancel_blocks_until_acknowledged() {
        let mut coprocessor = EmulatedCoprocessor::new(Duration::from_millis(50)).unwrap();
        let batch = coprocessor
            .submit(&[decode_job(instance(0), vec![blocks(1)], 1, false)])
            .unwrap();
        let completion = coprocessor.cancel(batch).unwrap();
        assert!(matches!(
            completion,
            BatchCompletion::Cancelled | BatchCompletion::Resolved(_)
        ));

        // Cancellation does not leak into the next batch
        let batch = coprocessor
            .submit(&[decode_job(instance(0), vec![blocks(1)], 1, false)])
            .unwrap();
        assert_eq!(resolved(coprocessor.wait(batch, Duration::from_secs(5)).unwrap()).len(), 1);
    }
}
