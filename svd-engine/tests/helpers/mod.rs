//! Shared fixtures for engine integration tests
//!
//! - In-memory WAV builders (PCM16 and IMA ADPCM) with optional loop, cue
//!   and envelope chunks
//! - Provider wrappers counting reads and seeks, or stalling on every
//!   other read
//! - A refill helper that drives ticks the way a mixing graph does

#![allow(dead_code)]

use bytes::Bytes;
use std::cell::Cell;
use std::rc::Rc;
use svd_common::config::EngineConfig;
use svd_engine::error::Result;
use svd_engine::io::{MemoryProvider, ProviderBuffer, StreamHeuristics, StreamProvider};
use svd_engine::types::BufferStatus;
use svd_engine::voice::{SourceMedia, StartStatus, VoiceBuffer};
use svd_engine::Engine;

/// Frames per IMA ADPCM block for a 36-byte mono block
pub const ADPCM_BLOCK_ALIGN: u16 = 36;
pub const ADPCM_FRAMES_PER_BLOCK: u32 = 65;

/// Ticks a single refill may take before a test gives up
const MAX_TICKS_PER_REFILL: usize = 64;

// ============================================================================
// WAV builders
// ============================================================================

/// Loop region in frames (inclusive end) and play count
#[derive(Debug, Clone, Copy)]
pub struct LoopRegion {
    pub start: u32,
    pub end: u32,
    pub count: u32,
}

fn chunk(out: &mut Vec<u8>, id: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(id);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    if body.len() % 2 == 1 {
        out.push(0);
    }
}

fn riff(chunks: Vec<u8>) -> Bytes {
    let mut out = b"RIFF".to_vec();
    out.extend_from_slice(&(chunks.len() as u32 + 4).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend(chunks);
    Bytes::from(out)
}

fn smpl_body(region: LoopRegion) -> Vec<u8> {
    let mut body = vec![0u8; 36];
    body[28..32].copy_from_slice(&1u32.to_le_bytes());
    let mut entry = vec![0u8; 24];
    entry[8..12].copy_from_slice(&region.start.to_le_bytes());
    entry[12..16].copy_from_slice(&region.end.to_le_bytes());
    entry[20..24].copy_from_slice(&region.count.to_le_bytes());
    body.extend(entry);
    body
}

fn cue_body(markers: &[(u32, u32)]) -> Vec<u8> {
    let mut body = (markers.len() as u32).to_le_bytes().to_vec();
    for (id, frame) in markers {
        let mut entry = vec![0u8; 24];
        entry[0..4].copy_from_slice(&id.to_le_bytes());
        entry[20..24].copy_from_slice(&frame.to_le_bytes());
        body.extend(entry);
    }
    body
}

fn anal_body(points: &[(u32, f32)]) -> Vec<u8> {
    let mut body = (points.len() as u32).to_le_bytes().to_vec();
    for (frame, level) in points {
        body.extend_from_slice(&frame.to_le_bytes());
        body.extend_from_slice(&level.to_le_bytes());
    }
    body
}

fn pcm_fmt_body() -> Vec<u8> {
    let rate = 48_000u32;
    let mut fmt = Vec::new();
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&rate.to_le_bytes());
    fmt.extend_from_slice(&(rate * 2).to_le_bytes());
    fmt.extend_from_slice(&2u16.to_le_bytes());
    fmt.extend_from_slice(&16u16.to_le_bytes());
    fmt
}

fn pcm_data_body(frames: u32) -> Vec<u8> {
    (0..frames).flat_map(|i| (i as i16).to_le_bytes()).collect()
}

/// Mono PCM16 WAV whose sample `i` equals `i`
pub fn pcm_wav(frames: u32, looping: Option<LoopRegion>, markers: &[(u32, u32)]) -> Bytes {
    let mut chunks = Vec::new();
    chunk(&mut chunks, b"fmt ", &pcm_fmt_body());
    if let Some(region) = looping {
        chunk(&mut chunks, b"smpl", &smpl_body(region));
    }
    if !markers.is_empty() {
        chunk(&mut chunks, b"cue ", &cue_body(markers));
    }
    chunk(&mut chunks, b"data", &pcm_data_body(frames));
    riff(chunks)
}

/// [`pcm_wav`] one-shot media with a level envelope of `(frame, level)` points
pub fn pcm_wav_with_envelope(frames: u32, points: &[(u32, f32)]) -> Bytes {
    let mut chunks = Vec::new();
    chunk(&mut chunks, b"fmt ", &pcm_fmt_body());
    chunk(&mut chunks, b"anal", &anal_body(points));
    chunk(&mut chunks, b"data", &pcm_data_body(frames));
    riff(chunks)
}

/// Mono IMA ADPCM WAV of `blocks` blocks, `total_frames` declared in `fact`
///
/// Block `b` has predictor `b * 100`, step index 0 and an all-zero body, so
/// every frame of block `b` decodes to `b * 100`.
pub fn adpcm_wav(blocks: u32, total_frames: u32, looping: Option<LoopRegion>) -> Bytes {
    let rate = 22_050u32;
    let mut fmt = Vec::new();
    fmt.extend_from_slice(&0x11u16.to_le_bytes());
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&rate.to_le_bytes());
    let byte_rate = rate * ADPCM_BLOCK_ALIGN as u32 / ADPCM_FRAMES_PER_BLOCK;
    fmt.extend_from_slice(&byte_rate.to_le_bytes());
    fmt.extend_from_slice(&ADPCM_BLOCK_ALIGN.to_le_bytes());
    fmt.extend_from_slice(&4u16.to_le_bytes());
    fmt.extend_from_slice(&2u16.to_le_bytes());
    fmt.extend_from_slice(&(ADPCM_FRAMES_PER_BLOCK as u16).to_le_bytes());

    let mut data = Vec::with_capacity(blocks as usize * ADPCM_BLOCK_ALIGN as usize);
    for b in 0..blocks {
        let predictor = (b * 100) as i16;
        data.extend_from_slice(&predictor.to_le_bytes());
        data.push(0);
        data.push(0);
        data.extend(std::iter::repeat(0u8).take(ADPCM_BLOCK_ALIGN as usize - 4));
    }

    let mut chunks = Vec::new();
    chunk(&mut chunks, b"fmt ", &fmt);
    chunk(&mut chunks, b"fact", &total_frames.to_le_bytes());
    if let Some(region) = looping {
        chunk(&mut chunks, b"smpl", &smpl_body(region));
    }
    chunk(&mut chunks, b"data", &data);
    riff(chunks)
}

/// Value frame `frame` of [`adpcm_wav`] media decodes to
pub fn adpcm_value(frame: u64) -> i16 {
    ((frame / ADPCM_FRAMES_PER_BLOCK as u64) * 100) as i16
}

// ============================================================================
// Counting provider
// ============================================================================

/// Provider I/O counters shared with the test
#[derive(Debug, Clone, Default)]
pub struct IoCounters {
    pub reads: Rc<Cell<u32>>,
    pub seeks: Rc<Cell<u32>>,
}

/// Memory provider that counts reads and seeks
pub struct CountingProvider {
    inner: MemoryProvider,
    counters: IoCounters,
}

impl CountingProvider {
    pub fn new(media: Bytes, block_size: usize) -> (Self, IoCounters) {
        let counters = IoCounters::default();
        (
            Self {
                inner: MemoryProvider::new(media, block_size),
                counters: counters.clone(),
            },
            counters,
        )
    }
}

impl StreamProvider for CountingProvider {
    fn start(&mut self) -> Result<()> {
        self.inner.start()
    }

    fn stop(&mut self) {
        self.inner.stop()
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    fn read(&mut self) -> Result<ProviderBuffer> {
        self.counters.reads.set(self.counters.reads.get() + 1);
        self.inner.read()
    }

    fn release(&mut self) {
        self.inner.release()
    }

    fn seek(&mut self, offset: u64) -> Result<u64> {
        self.counters.seeks.set(self.counters.seeks.get() + 1);
        self.inner.seek(offset)
    }

    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn set_heuristics(&mut self, heuristics: &StreamHeuristics) {
        self.inner.set_heuristics(heuristics)
    }

    fn is_memory(&self) -> bool {
        true
    }

    fn relocate(&mut self, media: Bytes) -> Result<()> {
        self.inner.relocate(media)
    }
}

// ============================================================================
// Stalling provider
// ============================================================================

/// Memory provider that answers every other read with "not ready"
pub struct StallingProvider {
    inner: MemoryProvider,
    stall_next: bool,
    stalls: Rc<Cell<u32>>,
}

impl StallingProvider {
    pub fn new(media: Bytes, block_size: usize) -> (Self, Rc<Cell<u32>>) {
        let stalls = Rc::new(Cell::new(0));
        (
            Self {
                inner: MemoryProvider::new(media, block_size),
                stall_next: false,
                stalls: stalls.clone(),
            },
            stalls,
        )
    }
}

impl StreamProvider for StallingProvider {
    fn start(&mut self) -> Result<()> {
        self.inner.start()
    }

    fn stop(&mut self) {
        self.inner.stop()
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    fn read(&mut self) -> Result<ProviderBuffer> {
        self.stall_next = !self.stall_next;
        if self.stall_next {
            self.stalls.set(self.stalls.get() + 1);
            return Ok(ProviderBuffer::NotReady);
        }
        self.inner.read()
    }

    fn release(&mut self) {
        self.inner.release()
    }

    fn seek(&mut self, offset: u64) -> Result<u64> {
        self.inner.seek(offset)
    }

    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn set_heuristics(&mut self, heuristics: &StreamHeuristics) {
        self.inner.set_heuristics(heuristics)
    }

    fn is_memory(&self) -> bool {
        true
    }

    fn relocate(&mut self, media: Bytes) -> Result<()> {
        self.inner.relocate(media)
    }
}

// ============================================================================
// Tick driving
// ============================================================================

/// Engine over the emulated coprocessor with default settings
pub fn engine() -> Engine {
    Engine::with_emulated(EngineConfig::default()).unwrap()
}

/// Start a voice, retrying while the first grant is not ready
pub fn start(voice: &mut SourceMedia) {
    for _ in 0..MAX_TICKS_PER_REFILL {
        if voice.start_stream().unwrap() == StartStatus::Started {
            return;
        }
    }
    panic!("voice did not start");
}

/// One refill as the mixing graph would run it, retrying across ticks
/// until the voice returns data or reports the end
pub fn refill(engine: &Engine, voice: &mut SourceMedia) -> VoiceBuffer {
    for _ in 0..MAX_TICKS_PER_REFILL {
        engine.begin_tick().unwrap();
        let buffer = voice.get_buffer().unwrap();
        voice.release_buffer();
        if buffer.status != BufferStatus::NoMoreData {
            voice.prepare_next_buffer().unwrap();
        }
        engine.end_tick().unwrap();
        if buffer.status != BufferStatus::NotReady {
            return buffer;
        }
        engine.resolve_batch().unwrap();
    }
    panic!("voice starved for {} ticks", MAX_TICKS_PER_REFILL);
}

/// Refill until "no more data"
pub fn drain(engine: &Engine, voice: &mut SourceMedia) -> Vec<VoiceBuffer> {
    let mut buffers = Vec::new();
    loop {
        let buffer = refill(engine, voice);
        let done = buffer.status == BufferStatus::NoMoreData;
        buffers.push(buffer);
        if done {
            return buffers;
        }
        assert!(buffers.len() < 10_000, "voice never finished");
    }
}

/// All samples of a sequence of refills
pub fn samples(buffers: &[VoiceBuffer]) -> Vec<i16> {
    buffers.iter().flat_map(|b| b.samples.iter().copied()).collect()
}
