//! Hardware-backed IMA ADPCM codec
//!
//! Thin adapter between the orchestrator and the batch scheduler. Decoding
//! never happens in [`get_buffer`](Codec::get_buffer): that call only reads
//! the instance's output ring. Production is driven from
//! [`prepare_next_buffer`](Codec::prepare_next_buffer):
//!
//! 1. Reap the results of the last batch into the ring
//! 2. Start a new decode range when the current one is exhausted (loop back)
//! 3. Size the request from free ring space, resampler padding and the
//!    range-start skip
//! 4. Gather whole blocks from the stream, at most two input spans
//! 5. Queue the job sections (format once, gapless on new ranges, resample
//!    every round, decode)
//!
//! A decode range covers one pass between two frames of the source. It is
//! tracked in source frames so it is unaffected by resampling.

use super::{
    Codec, CodecAttributes, CodecBuffer, CodecInfo, CodecParams, PrepareStatus, RefillRequest,
    SeekTarget, VirtualBehavior,
};
use crate::error::{Diagnostic, Error, Result, Tagged};
use crate::header::{MediaHeader, SeekPoint};
use crate::hw::context::{
    DecodeJob, FormatParams, GaplessParams, JobDescriptor, ResampleParams, MAX_INPUT_SPANS,
};
use crate::hw::{InstanceId, InstancePoll, SharedScheduler};
use crate::io::StreamHeuristics;
use crate::stream::StreamingBuffer;
use crate::types::{AudioFormat, BufferStatus, FormatTag, LoopCount};
use bytes::{Bytes, BytesMut};
use svd_common::config::HardwareConfig;
use tracing::{debug, trace, warn};

/// Pitch ratios outside this range are clamped
const MIN_PITCH: f64 = 0.125;
const MAX_PITCH: f64 = 8.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct BlockLayout {
    channels: u16,
    sample_rate: u32,
    block_align: u16,
    frames_per_block: u32,
}

/// One pass of decoding between two source frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeRange {
    /// First source frame of the pass
    pub start: u64,
    /// Source frames in the pass
    pub length: u64,
    /// Source frames reaped so far
    pub progress: u64,
    pub first_block: u64,
    pub blocks_total: u64,
    pub blocks_issued: u64,
    /// Decoded frames dropped ahead of `start` (encoder delay, pre-roll)
    pub skip: u64,
    /// The pass ends at the loop end and restarts at the loop start
    pub loops_back: bool,
}

impl DecodeRange {
    pub fn is_complete(&self) -> bool {
        self.blocks_issued >= self.blocks_total
    }

    pub fn blocks_left(&self) -> u64 {
        self.blocks_total.saturating_sub(self.blocks_issued)
    }
}

pub struct HardwareCodec {
    scheduler: SharedScheduler,
    instance: Option<InstanceId>,
    padding_frames: u64,

    layout: BlockLayout,
    data_offset: u64,
    total_frames: u64,
    encoder_delay: u64,
    loop_start: u64,
    loop_end: u64,
    loop_count: LoopCount,
    seek_points: Vec<SeekPoint>,

    range: DecodeRange,
    /// Partial block left over from the last gather
    carry: Bytes,
    format_sent: bool,
    /// Gapless section to send with the next job (`true` = new range)
    pending_gapless: Option<bool>,
    resampler_reset: bool,
    /// Output frames per source frame
    resample_ratio: f64,
    /// Source frames held inside the coprocessor resampler
    src_buffered: u64,
    terminal_queued: bool,
    /// Results of the running batch predate a seek and must be dropped
    discard_in_flight: bool,
    last_read: Option<usize>,
    is_virtual: bool,
}

impl HardwareCodec {
    /// Create the codec and register its decoder instance
    pub fn new(scheduler: SharedScheduler, config: &HardwareConfig, channels: u16) -> Result<Self> {
        let instance = scheduler.borrow_mut().create_instance(channels)?;
        Ok(Self {
            scheduler,
            instance: Some(instance),
            padding_frames: config.resampler_padding_frames as u64,
            layout: BlockLayout::default(),
            data_offset: 0,
            total_frames: 0,
            encoder_delay: 0,
            loop_start: 0,
            loop_end: 0,
            loop_count: LoopCount::ONE_SHOT,
            seek_points: Vec::new(),
            range: DecodeRange::default(),
            carry: Bytes::new(),
            format_sent: false,
            pending_gapless: None,
            resampler_reset: false,
            resample_ratio: 1.0,
            src_buffered: 0,
            terminal_queued: false,
            discard_in_flight: false,
            last_read: None,
            is_virtual: false,
        })
    }

    pub fn instance_id(&self) -> Option<InstanceId> {
        self.instance
    }

    pub fn range(&self) -> DecodeRange {
        self.range
    }

    pub fn loop_count(&self) -> LoopCount {
        self.loop_count
    }

    fn id(&self) -> Result<InstanceId> {
        self.instance
            .ok_or_else(|| Error::InvalidState("hardware codec has no decoder instance".to_string()))
    }

    fn fpb(&self) -> u64 {
        self.layout.frames_per_block as u64
    }

    /// Range starting at `start`; `first_block` forces an earlier entry block
    fn build_range(&self, start: u64, first_block: Option<u64>) -> DecodeRange {
        let fpb = self.fpb();
        let loops_back = self.loop_count.is_looping() && start <= self.loop_end;
        let end = if loops_back {
            self.loop_end + 1
        } else {
            self.total_frames
        };
        let first_decoded = start + self.encoder_delay;
        let natural_first = first_decoded / fpb;
        let first_block = first_block.unwrap_or(natural_first).min(natural_first);
        let last_block = (end.max(start + 1) - 1 + self.encoder_delay) / fpb;
        DecodeRange {
            start,
            length: end.saturating_sub(start),
            progress: 0,
            first_block,
            blocks_total: last_block - first_block + 1,
            blocks_issued: 0,
            skip: first_decoded - first_block * fpb,
            loops_back,
        }
    }

    fn gapless_params(&self, new_range: bool) -> GaplessParams {
        GaplessParams {
            skip: self.range.skip as u32,
            keep: self.range.length,
            new_range,
        }
    }

    /// Move finished batch results into the ring
    fn reap(&mut self) -> Result<InstancePoll> {
        let id = self.id()?;
        let mut scheduler = self.scheduler.borrow_mut();
        let poll = scheduler.poll_instance(id)?;
        match &poll {
            InstancePoll::Completed(results) => {
                if std::mem::take(&mut self.discard_in_flight) {
                    trace!("Dropping {} stale results on instance {}", results.len(), id);
                } else {
                    let ring = scheduler.ring_mut(id)?;
                    for result in results {
                        let delivered = (result.source_frames + self.src_buffered)
                            .saturating_sub(result.buffered_frames);
                        self.src_buffered = result.buffered_frames;
                        self.range.progress += result.source_frames;
                        ring.write(&result.pcm, delivered);
                        if result.end_of_stream {
                            ring.finish();
                        }
                    }
                }
            }
            InstancePoll::Failed(code) => {
                return Err(Error::Hardware { code: *code });
            }
            InstancePoll::Cancelled => {
                self.discard_in_flight = false;
            }
            _ => {}
        }
        Ok(poll)
    }

    /// Blocks to request for `free` output frames
    fn blocks_wanted(&self, free: usize) -> u64 {
        let fpb = self.fpb();
        let pitch = 1.0 / self.resample_ratio;
        let mut source = (free as f64 * pitch).ceil() as u64;
        if (self.resample_ratio - 1.0).abs() > f64::EPSILON {
            source += self.padding_frames;
        }
        source = source.saturating_sub(self.src_buffered);
        if self.range.blocks_issued == 0 {
            source += self.range.skip;
        }
        source.div_ceil(fpb).max(1).min(self.range.blocks_left())
    }

    /// Take up to `blocks` whole blocks from the stream
    ///
    /// Returns the input spans and the number of whole blocks they hold; a
    /// trailing partial block is kept for the next call.
    fn gather(&mut self, stream: &mut StreamingBuffer, blocks: u64) -> Result<(Vec<Bytes>, u64)> {
        let block_align = self.layout.block_align as usize;
        let need = blocks as usize * block_align;
        let mut spans: Vec<Bytes> = Vec::with_capacity(MAX_INPUT_SPANS);
        let mut gathered = 0;

        if !self.carry.is_empty() {
            let carry = std::mem::take(&mut self.carry);
            gathered += carry.len();
            spans.push(carry);
        }

        while gathered < need && spans.len() < MAX_INPUT_SPANS {
            if stream.size_left() == 0 {
                if stream.is_last_buffer() {
                    break;
                }
                stream.fetch()?;
                if stream.size_left() == 0 {
                    break;
                }
            }
            let chunk = stream.take(need - gathered);
            gathered += chunk.len();
            spans.push(chunk);
        }

        let tail = gathered % block_align;
        if tail > 0 {
            self.carry = split_tail(&mut spans, tail);
        }
        Ok((spans, ((gathered - tail) / block_align) as u64))
    }

    /// Drop queued work, in-flight results and ring content
    fn invalidate(&mut self) -> Result<()> {
        let id = self.id()?;
        let mut scheduler = self.scheduler.borrow_mut();
        match scheduler.poll_instance(id)? {
            InstancePoll::InProgress => self.discard_in_flight = true,
            InstancePoll::Pending => {
                scheduler.clear_pending(id)?;
                self.discard_in_flight = false;
            }
            InstancePoll::Failed(code) => return Err(Error::Hardware { code }),
            // Stale results die here, so nothing is left to discard
            InstancePoll::Completed(_) | InstancePoll::Cancelled | InstancePoll::Idle => {
                self.discard_in_flight = false;
            }
        }
        scheduler.ring_mut(id)?.reset();
        self.carry = Bytes::new();
        self.src_buffered = 0;
        self.resampler_reset = true;
        self.terminal_queued = false;
        self.last_read = None;
        Ok(())
    }
}

/// Split the last `tail` bytes off `spans` into one contiguous carry
fn split_tail(spans: &mut Vec<Bytes>, tail: usize) -> Bytes {
    let mut remaining = tail;
    let mut pieces = Vec::new();
    while remaining > 0 {
        let Some(last) = spans.last_mut() else {
            break;
        };
        if last.len() <= remaining {
            remaining -= last.len();
            if let Some(piece) = spans.pop() {
                pieces.push(piece);
            }
        } else {
            pieces.push(last.split_off(last.len() - remaining));
            remaining = 0;
        }
    }
    pieces.reverse();
    if pieces.len() == 1 {
        return pieces.pop().unwrap_or_default();
    }
    let mut joined = BytesMut::with_capacity(tail);
    for piece in pieces {
        joined.extend_from_slice(&piece);
    }
    joined.freeze()
}

impl Codec for HardwareCodec {
    fn init(&mut self, header: &MediaHeader, params: &CodecParams) -> Result<Tagged<CodecInfo>> {
        let format = &header.format;
        if format.tag != FormatTag::ImaAdpcm {
            return Err(Error::UnsupportedFormat(format!(
                "hardware codec cannot decode {:?}",
                format.tag
            )));
        }
        if format.frames_per_block == 0 || format.block_align == 0 {
            return Err(Error::invalid_file(
                Diagnostic::InvalidHeader,
                "ADPCM block layout is empty",
            ));
        }

        self.layout = BlockLayout {
            channels: format.channels,
            sample_rate: format.sample_rate,
            block_align: format.block_align,
            frames_per_block: format.frames_per_block,
        };
        self.data_offset = header.data_offset;
        self.total_frames = header.total_frames;
        self.encoder_delay = header.encoder_delay as u64;
        self.loop_start = params.loop_start;
        self.loop_end = params.loop_end;
        self.loop_count = params.loop_count;
        self.seek_points = header.seek_points();
        self.range = self.build_range(0, None);
        self.pending_gapless = Some(true);

        let fpb = self.fpb();
        let ba = format.block_align as u64;
        let heuristics = StreamHeuristics {
            throughput: (format.sample_rate as f32 * ba as f32) / (fpb as f32 * 1000.0),
            min_buffer_bytes: ba as usize * 4,
            loop_start: self.data_offset + ((params.loop_start + self.encoder_delay) / fpb) * ba,
            loop_end: self.data_offset + ((params.loop_end + self.encoder_delay) / fpb + 1) * ba,
            priority: params.priority,
        };

        debug!(
            "Hardware codec ready on instance {:?}: {} Hz, {} ch, {} frames/block, {} frames",
            self.instance, format.sample_rate, format.channels, fpb, self.total_frames
        );

        Ok(Tagged::ok(CodecInfo {
            output_format: AudioFormat {
                sample_rate: format.sample_rate,
                channels: format.channels,
            },
            source_sample_rate: format.sample_rate,
            total_frames: self.total_frames,
            heuristics,
            attributes: CodecAttributes {
                hardware_backed: true,
                resampling_bypass: true,
                requires_relocation: false,
            },
        }))
    }

    fn prepare_next_buffer(&mut self, stream: &mut StreamingBuffer) -> Result<Tagged<PrepareStatus>> {
        if self.is_virtual {
            return Ok(Tagged::ok(PrepareStatus::Idle));
        }
        if let InstancePoll::InProgress | InstancePoll::Pending = self.reap()? {
            return Ok(Tagged::ok(PrepareStatus::Queued));
        }
        if self.terminal_queued {
            return Ok(Tagged::ok(PrepareStatus::Idle));
        }

        if self.range.is_complete() {
            if !self.range.loops_back {
                return Ok(Tagged::ok(PrepareStatus::Idle));
            }
            self.loop_count = self.loop_count.decrement();
            self.range = self.build_range(self.loop_start, None);
            self.pending_gapless = Some(true);
            debug!(
                "Decode range restarted at frame {} (loop count {})",
                self.loop_start, self.loop_count
            );
        }

        let id = self.id()?;
        let free = self
            .scheduler
            .borrow()
            .instance(id)
            .map(|instance| instance.ring().free_frames())
            .unwrap_or(0);
        if free == 0 {
            return Ok(Tagged::ok(PrepareStatus::Idle));
        }

        let wanted = self.blocks_wanted(free);
        let (inputs, blocks) = self.gather(stream, wanted)?;
        if blocks == 0 {
            if stream.is_exhausted() {
                return Err(Error::invalid_file(
                    Diagnostic::CodecUnderrun,
                    format!(
                        "stream ended {} blocks before the end of the decode range",
                        self.range.blocks_left()
                    ),
                ));
            }
            return Ok(Tagged::ok(PrepareStatus::NotReady));
        }
        self.range.blocks_issued += blocks;
        let terminal = self.range.is_complete() && !self.range.loops_back;

        let mut job = JobDescriptor::new(id);
        if !self.format_sent {
            job.format = Some(FormatParams {
                channels: self.layout.channels,
                sample_rate: self.layout.sample_rate,
                block_align: self.layout.block_align,
                frames_per_block: self.layout.frames_per_block,
            });
        }
        if let Some(new_range) = self.pending_gapless.take() {
            job.gapless = Some(self.gapless_params(new_range));
        }
        job.resample = Some(ResampleParams {
            ratio: self.resample_ratio,
            reset: std::mem::take(&mut self.resampler_reset),
        });
        job.decode = Some(DecodeJob {
            inputs,
            blocks: blocks as u32,
            end_of_stream: terminal,
        });
        self.scheduler.borrow_mut().enqueue_job(job)?;
        self.format_sent = true;

        trace!(
            "Queued {} blocks on instance {} ({}/{} of range)",
            blocks,
            id,
            self.range.blocks_issued,
            self.range.blocks_total
        );

        if terminal {
            self.terminal_queued = true;
            Ok(Tagged::ok(PrepareStatus::NoMoreData))
        } else {
            Ok(Tagged::ok(PrepareStatus::Queued))
        }
    }

    fn get_buffer(
        &mut self,
        _stream: &mut StreamingBuffer,
        request: &RefillRequest,
    ) -> Result<Tagged<CodecBuffer>> {
        if request.pitch_ratio.is_finite() && request.pitch_ratio > 0.0 {
            self.resample_ratio = 1.0 / request.pitch_ratio.clamp(MIN_PITCH, MAX_PITCH);
        }
        if self.is_virtual {
            return Ok(Tagged::ok(CodecBuffer::not_ready()));
        }
        self.reap()?;

        let id = self.id()?;
        let scheduler = self.scheduler.borrow();
        let Some(instance) = scheduler.instance(id) else {
            return Err(Error::InvalidState(format!("decoder instance {} vanished", id)));
        };
        let ring = instance.ring();
        match ring.peek(request.max_frames) {
            Some(view) => {
                self.last_read = Some(view.frames);
                let status = if view.end_of_stream {
                    BufferStatus::NoMoreData
                } else {
                    BufferStatus::DataReady
                };
                Ok(Tagged::ok(CodecBuffer {
                    samples: view.samples.to_vec(),
                    frames: view.frames,
                    source_frames: view.source_frames,
                    status,
                }))
            }
            None if ring.is_drained() => Ok(Tagged::ok(CodecBuffer {
                status: BufferStatus::NoMoreData,
                ..CodecBuffer::not_ready()
            })),
            None => Ok(Tagged::with(CodecBuffer::not_ready(), Diagnostic::Starvation)),
        }
    }

    fn release_buffer(&mut self) {
        let (Some(frames), Some(id)) = (self.last_read.take(), self.instance) else {
            return;
        };
        let mut scheduler = self.scheduler.borrow_mut();
        if let Err(e) = scheduler.ring_mut(id).and_then(|ring| ring.consume(frames)) {
            warn!("Ring release on instance {} failed: {}", id, e);
        }
    }

    fn virtual_on(&mut self, behavior: VirtualBehavior) -> Result<Tagged<()>> {
        self.is_virtual = true;
        if behavior != VirtualBehavior::Resume {
            self.invalidate()?;
        }
        Ok(Tagged::ok(()))
    }

    fn virtual_off(&mut self, _behavior: VirtualBehavior) -> Result<Tagged<()>> {
        self.is_virtual = false;
        Ok(Tagged::ok(()))
    }

    fn find_closest_file_offset(&self, desired_frame: u64) -> Result<Tagged<SeekTarget>> {
        if desired_frame >= self.total_frames {
            return Err(Error::SeekOutOfRange {
                target: desired_frame,
                total: self.total_frames,
            });
        }
        if let Some(point) = self
            .seek_points
            .iter()
            .rev()
            .find(|p| p.frame <= desired_frame)
        {
            return Ok(Tagged::ok(SeekTarget {
                frame: point.frame,
                byte_offset: self.data_offset + point.byte_offset,
            }));
        }
        let fpb = self.fpb();
        let block = (desired_frame + self.encoder_delay) / fpb;
        Ok(Tagged::ok(SeekTarget {
            frame: (block * fpb).saturating_sub(self.encoder_delay),
            byte_offset: self.data_offset + block * self.layout.block_align as u64,
        }))
    }

    fn seek(
        &mut self,
        target: &SeekTarget,
        desired_frame: u64,
        loop_count: LoopCount,
    ) -> Result<Tagged<()>> {
        self.invalidate()?;
        self.loop_count = loop_count;
        let first_block =
            target.byte_offset.saturating_sub(self.data_offset) / self.layout.block_align as u64;
        self.range = self.build_range(desired_frame, Some(first_block));
        self.pending_gapless = Some(true);
        debug!(
            "Hardware codec seek to frame {} (entry block {}, skip {})",
            desired_frame, self.range.first_block, self.range.skip
        );
        Ok(Tagged::ok(()))
    }

    fn stop_looping(&mut self, stream: &StreamingBuffer) -> Result<Tagged<()>> {
        self.loop_count = stream.loop_count();
        if !stream.next_fetch_will_loop() && self.range.loops_back {
            // Current pass now runs to the end of data
            let first_block = self.range.first_block;
            let issued = self.range.blocks_issued;
            let progress = self.range.progress;
            let mut range = self.build_range(self.range.start, Some(first_block));
            range.blocks_issued = issued;
            range.progress = progress;
            self.range = range;
            let new_range = self.pending_gapless.unwrap_or(false);
            self.pending_gapless = Some(new_range);
            debug!(
                "Decode range extended to end of data ({} frames)",
                self.range.length
            );
        }
        Ok(Tagged::ok(()))
    }

    fn is_virtual(&self) -> bool {
        self.is_virtual
    }
}

impl Drop for HardwareCodec {
    fn drop(&mut self) {
        let Some(id) = self.instance.take() else {
            return;
        };
        match self.scheduler.try_borrow_mut() {
            Ok(mut scheduler) => {
                if let Err(e) = scheduler.destroy_instance(id) {
                    warn!("Failed to destroy decoder instance {}: {}", id, e);
                }
            }
            Err(_) => warn!("Scheduler busy; decoder instance {} leaked", id),
        }
    }
}
