//! Source media orchestrator
//!
//! One [`SourceMedia`] per voice. It composes the voice's
//! [`StreamingBuffer`], [`Position`], cue markers, level envelope and codec,
//! and is the only surface the mixing graph calls.
//!
//! # State Machine
//!
//! ```text
//! Uninitialized ── start_stream ──> Opening ──> Streaming <──> Virtual
//!                                      │            │
//!                                      └────────────┴──> Stopped / Failed
//! ```
//!
//! `Opening` means the stream exists but its first grant was not ready yet;
//! `start_stream` is simply called again on a later tick. Seeks complete
//! synchronously and never leave the voice in an intermediate state.
//!
//! # Failure Policy
//!
//! Retryable conditions (grant not ready, ring starving, batch still in
//! flight) surface as [`BufferStatus::NotReady`] or
//! [`PrepareStatus::NotReady`]/[`PrepareStatus::Queued`]. Everything else is
//! fatal: the voice emits `VoiceFailed`, moves to `Failed`, and the error is
//! returned to the owner, which terminates the voice.

mod envelope;
mod markers;

pub use envelope::{Envelope, EnvelopePoint};
pub use markers::MarkerTrack;

use crate::codec::{
    Codec, CodecFactory, CodecInfo, CodecParams, PrepareStatus, RefillRequest, VirtualBehavior,
};
use crate::error::{Diagnostic, Error, Result, Tagged};
use crate::header::{HeaderParser, MediaHeader};
use crate::io::{StreamHeuristics, StreamProvider};
use crate::position::Position;
use crate::stream::{SeekOutcome, StreamBounds, StreamingBuffer};
use crate::types::{BufferStatus, LoopCount};
use bytes::Bytes;
use chrono::Utc;
use std::rc::Rc;
use std::sync::Arc;
use svd_common::config::VoiceConfig;
use svd_common::events::{EngineEvent, EventBus};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Lifecycle of a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Uninitialized,
    /// Stream created, waiting for the first grant
    Opening,
    Streaming,
    Virtual,
    Stopped,
    Failed,
}

/// Per-voice playback parameters
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    /// Overrides the header's loop count; `None` uses the header
    pub loop_count: Option<LoopCount>,
    /// Source frame playback starts at
    pub start_frame: u64,
    /// Emit `PlaybackPosition` and `MarkerReached` events
    pub notify_position: bool,
    /// Leading media bytes already resident in memory
    pub prefetch: Option<Bytes>,
    /// Source frames consumed per output frame
    pub pitch_ratio: f64,
    /// Relative I/O priority (0-100); `None` uses the engine's stream setting
    pub priority: Option<u8>,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            loop_count: None,
            start_frame: 0,
            notify_position: false,
            prefetch: None,
            pitch_ratio: 1.0,
            priority: None,
        }
    }
}

/// Outcome of [`SourceMedia::start_stream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    Started,
    /// The first grant is not available yet; call again next tick
    NotReady,
}

/// One refill handed to the mixer
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceBuffer {
    /// Interleaved PCM
    pub samples: Vec<i16>,
    pub frames: usize,
    /// Source frames the refill covered
    pub source_frames: u64,
    pub status: BufferStatus,
    /// Source frame after the refill
    pub position: u64,
}

impl VoiceBuffer {
    fn not_ready(position: u64) -> Self {
        Self {
            samples: Vec::new(),
            frames: 0,
            source_frames: 0,
            status: BufferStatus::NotReady,
            position,
        }
    }
}

/// Everything that exists once the header has been parsed
struct Session {
    header: MediaHeader,
    info: CodecInfo,
    codec: Box<dyn Codec>,
    position: Position,
    markers: MarkerTrack,
    envelope: Envelope,
}

/// Per-voice orchestrator
pub struct SourceMedia {
    id: Uuid,
    state: VoiceState,
    params: VoiceParams,
    config: VoiceConfig,

    provider: Option<Box<dyn StreamProvider>>,
    parser: Rc<dyn HeaderParser>,
    factory: Rc<dyn CodecFactory>,
    events: Arc<EventBus>,

    stream: Option<StreamingBuffer>,
    session: Option<Session>,

    /// Frames between the resolved seek entry point and the requested frame
    seek_remainder: u64,
    frames_since_notify: u64,
    decode_complete_sent: bool,
}

impl SourceMedia {
    /// Create an unstarted voice
    pub fn new(
        provider: Box<dyn StreamProvider>,
        params: VoiceParams,
        config: VoiceConfig,
        parser: Rc<dyn HeaderParser>,
        factory: Rc<dyn CodecFactory>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: VoiceState::Uninitialized,
            params,
            config,
            provider: Some(provider),
            parser,
            factory,
            events,
            stream: None,
            session: None,
            seek_remainder: 0,
            frames_since_notify: 0,
            decode_complete_sent: false,
        }
    }

    // ========================================================================
    // Start / stop
    // ========================================================================

    /// Open the stream, parse the header and bring up the codec
    ///
    /// Returns [`StartStatus::NotReady`] while the first grant is pending;
    /// nothing is lost and the call is repeated on a later tick.
    ///
    /// # Errors
    /// Any provider, header or codec failure, and `InvalidFile` with
    /// `TotalFramesMismatch`, `LoopBoundsInvalid` or `InvalidThroughput`
    /// when the codec disagrees with the header. The voice is failed.
    pub fn start_stream(&mut self) -> Result<StartStatus> {
        if !matches!(self.state, VoiceState::Uninitialized | VoiceState::Opening) {
            return Err(self.wrong_state("start_stream"));
        }
        let result = self.open();
        result.map_err(|e| self.fail(e))
    }

    fn open(&mut self) -> Result<StartStatus> {
        if self.stream.is_none() {
            let provider = self
                .provider
                .take()
                .ok_or_else(|| Error::InvalidState("voice has no stream provider".to_string()))?;
            self.stream = Some(StreamingBuffer::init(provider, self.params.prefetch.clone())?);
            self.state = VoiceState::Opening;
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::InvalidState("voice stream missing".to_string()));
        };

        if stream.size_left() == 0 && stream.fetch()? == BufferStatus::NotReady {
            trace!("Voice {} waiting for its first grant", self.id);
            return Ok(StartStatus::NotReady);
        }

        let header = match stream.next_slice() {
            Some(bytes) => self.parser.parse(bytes)?,
            None => {
                return Err(Error::invalid_file(
                    Diagnostic::InvalidHeader,
                    "media stream is empty",
                ))
            }
        };

        let (loop_start, loop_end, header_count) = match header.loop_points {
            Some(lp) => (lp.start, lp.end, lp.count),
            None => (0, header.total_frames.saturating_sub(1), LoopCount::ONE_SHOT),
        };
        let loop_count = self.params.loop_count.unwrap_or(header_count);

        let mut codec = self.factory.create(&header)?;
        let params = CodecParams {
            loop_start,
            loop_end,
            loop_count,
            priority: self
                .params
                .priority
                .unwrap_or(StreamHeuristics::default().priority),
        };
        let tagged = codec.init(&header, &params)?;
        report(&self.events, self.id, tagged.diagnostic);
        let info = tagged.value;

        validate(&header, &info)?;

        let heuristics = info.heuristics;
        stream.set_bounds(
            StreamBounds::new(
                header.data_offset,
                header.data_end(),
                heuristics.loop_start,
                heuristics.loop_end,
            ),
            loop_count,
        )?;
        stream.set_heuristics(heuristics);

        // Consume the header bytes
        let grant_end = stream.file_offset() + stream.size_left() as u64;
        if header.data_offset >= stream.file_offset() && header.data_offset <= grant_end {
            stream.skip_to(header.data_offset)?;
        } else {
            stream.seek(header.data_offset, loop_count)?;
        }

        let position = Position::new(info.total_frames, loop_start, loop_end, loop_count)?;
        let markers = MarkerTrack::new(header.markers.clone());
        let envelope = match header.analysis.as_deref() {
            Some(blob) => Envelope::parse(blob).unwrap_or_else(|e| {
                warn!("Voice {} ignores its analysis data: {}", self.id, e);
                Envelope::default()
            }),
            None => Envelope::default(),
        };

        let tagged = codec.warmup(stream)?;
        report(&self.events, self.id, tagged.diagnostic);

        info!(
            "Voice {} streaming: {:?} {} Hz, {} ch, {} frames, loop [{}, {}] x{}{}",
            self.id,
            header.format.tag,
            info.output_format.sample_rate,
            info.output_format.channels,
            info.total_frames,
            loop_start,
            loop_end,
            loop_count,
            if info.attributes.hardware_backed {
                " (hardware)"
            } else {
                ""
            }
        );

        self.session = Some(Session {
            header,
            info,
            codec,
            position,
            markers,
            envelope,
        });
        self.state = VoiceState::Streaming;

        if self.params.start_frame > 0 {
            self.seek_internal(self.params.start_frame, loop_count)?;
        }
        Ok(StartStatus::Started)
    }

    /// Stop the provider and release the codec
    ///
    /// A hardware decoder instance still referenced by an in-flight batch is
    /// freed by the scheduler once that batch resolves.
    pub fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.release_current();
            stream.stop();
        }
        self.session = None;
        self.stream = None;
        self.provider = None;
        if self.state != VoiceState::Failed {
            self.state = VoiceState::Stopped;
        }
        debug!("Voice {} stopped", self.id);
    }

    // ========================================================================
    // Refill
    // ========================================================================

    /// Produce the next refill for the mixer
    ///
    /// The position is advanced in clamped sub-ranges, so a wrap inside the
    /// refill is observed exactly at the loop end, and every marker inside
    /// the played frames is reported once.
    pub fn get_buffer(&mut self) -> Result<VoiceBuffer> {
        match self.state {
            VoiceState::Streaming => {}
            VoiceState::Virtual => {
                let position = self.position().map(|p| p.current()).unwrap_or(0);
                return Ok(VoiceBuffer::not_ready(position));
            }
            _ => return Err(self.wrong_state("get_buffer")),
        }
        let result = self.refill();
        result.map_err(|e| self.fail(e))
    }

    fn refill(&mut self) -> Result<VoiceBuffer> {
        let (Some(stream), Some(session)) = (self.stream.as_mut(), self.session.as_mut()) else {
            return Err(Error::InvalidState("voice session missing".to_string()));
        };
        let request = RefillRequest {
            max_frames: self.config.refill_frames,
            pitch_ratio: self.params.pitch_ratio,
        };

        let tagged = session.codec.get_buffer(stream, &request)?;
        report(&self.events, self.id, tagged.diagnostic);
        let buffer = tagged.value;

        let position = &mut session.position;
        let mut remaining = buffer.source_frames;
        while remaining > 0 {
            let from = position.current();
            let step = position.advance(remaining);
            if step.applied == 0 {
                break;
            }
            remaining -= step.applied;

            if self.params.notify_position {
                for marker in session.markers.crossed(from, from + step.applied) {
                    debug!("Voice {} passed marker {} at {}", self.id, marker.id, marker.frame);
                    self.events.emit_lossy(EngineEvent::MarkerReached {
                        voice_id: self.id,
                        marker_id: marker.id,
                        frame: marker.frame,
                        timestamp: Utc::now(),
                    });
                }
            }
            if step.wrapped {
                debug!(
                    "Voice {} wrapped to {} (loop count {})",
                    self.id,
                    position.current(),
                    position.loop_count()
                );
                self.events.emit_lossy(EngineEvent::LoopWrapped {
                    voice_id: self.id,
                    loop_count: position.loop_count().get(),
                    timestamp: Utc::now(),
                });
            }
        }
        if remaining > 0 {
            warn!(
                "Voice {} codec delivered {} frames past the end of data",
                self.id, remaining
            );
        }

        if buffer.status == BufferStatus::NoMoreData && !position.is_finished() {
            return Err(Error::invalid_file(
                Diagnostic::CodecUnderrun,
                format!(
                    "decoder ran out at frame {} of {}",
                    position.current(),
                    position.total()
                ),
            ));
        }

        let applied = buffer.source_frames - remaining;
        if self.params.notify_position && applied > 0 {
            self.frames_since_notify += applied;
            if self.frames_since_notify >= self.config.position_event_interval_frames
                || buffer.status == BufferStatus::NoMoreData
            {
                self.frames_since_notify = 0;
                self.events.emit_lossy(EngineEvent::PlaybackPosition {
                    voice_id: self.id,
                    frame: position.current(),
                    total_frames: position.total(),
                    timestamp: Utc::now(),
                });
            }
        }

        trace!(
            "Voice {} refill: {} frames ({} source), {:?}, at {}",
            self.id,
            buffer.frames,
            buffer.source_frames,
            buffer.status,
            position.current()
        );

        let result = VoiceBuffer {
            samples: buffer.samples,
            frames: buffer.frames,
            source_frames: buffer.source_frames,
            status: buffer.status,
            position: position.current(),
        };
        if result.status == BufferStatus::NoMoreData {
            self.decode_finished();
        }
        Ok(result)
    }

    /// The mixer is done with the last refill
    pub fn release_buffer(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.codec.release_buffer();
        }
    }

    /// Let the codec queue decode work ahead of need
    ///
    /// Returns `NoMoreData` once the final decode has been queued; the first
    /// time that happens `DecodeComplete` is emitted so the next voice of a
    /// gapless chain can start decoding.
    pub fn prepare_next_buffer(&mut self) -> Result<PrepareStatus> {
        match self.state {
            VoiceState::Streaming => {}
            VoiceState::Virtual => return Ok(PrepareStatus::Idle),
            _ => return Err(self.wrong_state("prepare_next_buffer")),
        }
        let result = self.prepare();
        result.map_err(|e| self.fail(e))
    }

    fn prepare(&mut self) -> Result<PrepareStatus> {
        let (Some(stream), Some(session)) = (self.stream.as_mut(), self.session.as_mut()) else {
            return Err(Error::InvalidState("voice session missing".to_string()));
        };
        let tagged = session.codec.prepare_next_buffer(stream)?;
        report(&self.events, self.id, tagged.diagnostic);
        if tagged.value == PrepareStatus::NoMoreData {
            self.decode_finished();
        }
        Ok(tagged.value)
    }

    fn decode_finished(&mut self) {
        if std::mem::replace(&mut self.decode_complete_sent, true) {
            return;
        }
        debug!("Voice {} decode complete", self.id);
        self.events.emit_lossy(EngineEvent::DecodeComplete {
            voice_id: self.id,
            timestamp: Utc::now(),
        });
    }

    // ========================================================================
    // Virtualization
    // ========================================================================

    /// Suspend the voice
    ///
    /// The provider is always stopped. Unless the voice will truly resume,
    /// the current grant is dropped and the codec releases its decode state.
    pub fn virtual_on(&mut self, behavior: VirtualBehavior) -> Result<()> {
        if self.state != VoiceState::Streaming {
            return Err(self.wrong_state("virtual_on"));
        }
        let result = self.enter_virtual(behavior);
        result.map_err(|e| self.fail(e))
    }

    fn enter_virtual(&mut self, behavior: VirtualBehavior) -> Result<()> {
        let (Some(stream), Some(session)) = (self.stream.as_mut(), self.session.as_mut()) else {
            return Err(Error::InvalidState("voice session missing".to_string()));
        };
        stream.stop();
        if behavior != VirtualBehavior::Resume {
            stream.release_current();
        }
        let tagged = session.codec.virtual_on(behavior)?;
        report(&self.events, self.id, tagged.diagnostic);
        self.state = VoiceState::Virtual;
        debug!("Voice {} virtual ({:?})", self.id, behavior);
        Ok(())
    }

    /// Bring the voice back
    ///
    /// `source_offset` is the frame playback would have reached while
    /// virtual; without it the last played position is used. A target the
    /// codec cannot seek to falls back to frame 0.
    pub fn virtual_off(
        &mut self,
        behavior: VirtualBehavior,
        source_offset: Option<u64>,
    ) -> Result<()> {
        if self.state != VoiceState::Virtual {
            return Err(self.wrong_state("virtual_off"));
        }
        let result = self.leave_virtual(behavior, source_offset);
        result.map_err(|e| self.fail(e))
    }

    fn leave_virtual(&mut self, behavior: VirtualBehavior, source_offset: Option<u64>) -> Result<()> {
        let (Some(stream), Some(session)) = (self.stream.as_mut(), self.session.as_mut()) else {
            return Err(Error::InvalidState("voice session missing".to_string()));
        };
        let tagged = session.codec.virtual_off(behavior)?;
        report(&self.events, self.id, tagged.diagnostic);
        self.state = VoiceState::Streaming;

        if behavior == VirtualBehavior::Resume {
            stream.start()?;
            debug!("Voice {} resumed", self.id);
            return Ok(());
        }

        let position = &session.position;
        let loop_count = position.loop_count();
        let target = match behavior {
            VirtualBehavior::FromElapsedTime => {
                wrap_into_loop(position, source_offset.unwrap_or(position.current()))
            }
            _ => 0,
        };

        if let Err(e) = self.seek_internal(target, loop_count) {
            warn!(
                "Voice {} cannot resume at frame {} ({}), restarting from 0",
                self.id, target, e
            );
            self.seek_internal(0, loop_count)?;
        }
        Ok(())
    }

    // ========================================================================
    // Seek / loop control
    // ========================================================================

    /// Seek to `frame` with a new loop count
    ///
    /// On a virtual voice only the stream and position move; the codec keeps
    /// its decoded output until `virtual_off` re-seeks it. Leaving with
    /// [`VirtualBehavior::Resume`] after such a seek plays that stale output
    /// first.
    ///
    /// # Errors
    /// `SeekOutOfRange` for `frame >= total`, fatal to the voice.
    pub fn seek_to(&mut self, frame: u64, loop_count: LoopCount) -> Result<SeekOutcome> {
        if !matches!(self.state, VoiceState::Streaming | VoiceState::Virtual) {
            return Err(self.wrong_state("seek_to"));
        }
        let result = self.seek_internal(frame, loop_count);
        result.map_err(|e| self.fail(e))
    }

    fn seek_internal(&mut self, frame: u64, loop_count: LoopCount) -> Result<SeekOutcome> {
        let (Some(stream), Some(session)) = (self.stream.as_mut(), self.session.as_mut()) else {
            return Err(Error::InvalidState("voice session missing".to_string()));
        };
        let total = session.position.total();
        if frame >= total {
            return Err(Error::SeekOutOfRange {
                target: frame,
                total,
            });
        }

        let tagged = session.codec.find_closest_file_offset(frame)?;
        report(&self.events, self.id, tagged.diagnostic);
        let target = tagged.value;

        let outcome = stream.seek(target.byte_offset, loop_count)?;
        self.seek_remainder = frame - target.frame;
        session.position.reset(frame, loop_count);
        self.frames_since_notify = 0;
        self.decode_complete_sent = false;

        if !session.codec.is_virtual() {
            let tagged = session.codec.seek(&target, frame, loop_count)?;
            report(&self.events, self.id, tagged.diagnostic);
        }

        debug!(
            "Voice {} seek to frame {} via byte {} ({:?}, remainder {})",
            self.id, frame, target.byte_offset, outcome, self.seek_remainder
        );
        Ok(outcome)
    }

    /// Seek to the cue marker `id`
    ///
    /// A missing marker is a soft diagnostic: nothing moves and the result
    /// carries `MarkerNotFound`.
    pub fn seek_to_marker(&mut self, id: u32) -> Result<Tagged<Option<SeekOutcome>>> {
        let Some(session) = self.session.as_ref() else {
            return Err(self.wrong_state("seek_to_marker"));
        };
        let Some(frame) = session.markers.find(id).map(|m| m.frame) else {
            warn!("Voice {} has no marker {}", self.id, id);
            report(&self.events, self.id, Some(Diagnostic::MarkerNotFound));
            return Ok(Tagged::with(None, Diagnostic::MarkerNotFound));
        };
        let loop_count = session.position.loop_count();
        self.seek_to(frame, loop_count)
            .map(|outcome| Tagged::ok(Some(outcome)))
    }

    /// Finish the current pass and stop looping
    ///
    /// The stream decides how many wraps are already committed on the byte
    /// side; the codec and the position tracker follow it.
    pub fn stop_looping(&mut self) -> Result<LoopCount> {
        if !matches!(self.state, VoiceState::Streaming | VoiceState::Virtual) {
            return Err(self.wrong_state("stop_looping"));
        }
        let result = self.end_looping();
        result.map_err(|e| self.fail(e))
    }

    fn end_looping(&mut self) -> Result<LoopCount> {
        let (Some(stream), Some(session)) = (self.stream.as_mut(), self.session.as_mut()) else {
            return Err(Error::InvalidState("voice session missing".to_string()));
        };
        let stream_count = stream.stop_looping();
        let tagged = session.codec.stop_looping(stream)?;
        report(&self.events, self.id, tagged.diagnostic);

        let pending = stream
            .committed_wraps()
            .saturating_sub(session.position.wraps());
        let count = LoopCount::from_remaining_wraps(pending);
        session.position.set_loop_count(count);
        info!(
            "Voice {} stops looping (stream {}, position {})",
            self.id, stream_count, count
        );
        Ok(count)
    }

    /// Rebase a memory-resident stream onto a moved blob
    pub fn relocate_media(&mut self, media: Bytes) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.wrong_state("relocate_media"));
        };
        stream.relocate_media(media)
    }

    /// Change the pitch ratio used by the following refills
    ///
    /// # Errors
    /// `InvalidInput` for a ratio that is not a positive number; the voice
    /// keeps its previous ratio.
    pub fn set_pitch_ratio(&mut self, pitch_ratio: f64) -> Result<()> {
        if !(pitch_ratio.is_finite() && pitch_ratio > 0.0) {
            return Err(svd_common::Error::InvalidInput(format!(
                "pitch ratio must be a positive number, got {}",
                pitch_ratio
            ))
            .into());
        }
        self.params.pitch_ratio = pitch_ratio;
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn params(&self) -> &VoiceParams {
        &self.params
    }

    pub fn position(&self) -> Option<&Position> {
        self.session.as_ref().map(|s| &s.position)
    }

    pub fn header(&self) -> Option<&MediaHeader> {
        self.session.as_ref().map(|s| &s.header)
    }

    pub fn codec_info(&self) -> Option<&CodecInfo> {
        self.session.as_ref().map(|s| &s.info)
    }

    pub fn stream(&self) -> Option<&StreamingBuffer> {
        self.stream.as_ref()
    }

    pub fn markers(&self) -> Option<&MarkerTrack> {
        self.session.as_ref().map(|s| &s.markers)
    }

    /// Frames between the last seek entry point and the requested frame
    pub fn seek_remainder(&self) -> u64 {
        self.seek_remainder
    }

    /// Envelope level at the current position
    ///
    /// `None` when the media carries no envelope; a voice that has played
    /// to its end is silent.
    pub fn envelope_level(&self) -> Option<f32> {
        let session = self.session.as_ref()?;
        let level = session.envelope.level_at(session.position.current())?;
        Some(if session.position.is_finished() { 0.0 } else { level })
    }

    pub fn is_finished(&self) -> bool {
        self.position().map(|p| p.is_finished()).unwrap_or(false)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn wrong_state(&self, operation: &str) -> Error {
        Error::InvalidState(format!(
            "{} not allowed on voice {} in state {:?}",
            operation, self.id, self.state
        ))
    }

    /// Mark the voice failed and tell observers
    fn fail(&mut self, e: Error) -> Error {
        error!("Voice {} failed: {}", self.id, e);
        self.state = VoiceState::Failed;
        self.events.emit_lossy(EngineEvent::VoiceFailed {
            voice_id: self.id,
            error: e.to_string(),
            diagnostic: e.diagnostic().map(|d| d.to_string()),
            timestamp: Utc::now(),
        });
        e
    }
}

/// Cross-check what the codec reported against the header
fn validate(header: &MediaHeader, info: &CodecInfo) -> Result<()> {
    if info.total_frames == 0 || info.total_frames != header.total_frames {
        return Err(Error::invalid_file(
            Diagnostic::TotalFramesMismatch,
            format!(
                "codec reports {} frames, header declares {}",
                info.total_frames, header.total_frames
            ),
        ));
    }
    if let Some(lp) = header.loop_points {
        if lp.end <= lp.start || lp.end >= info.total_frames {
            return Err(Error::invalid_file(
                Diagnostic::LoopBoundsInvalid,
                format!(
                    "loop [{}, {}] invalid for {} frames",
                    lp.start, lp.end, info.total_frames
                ),
            ));
        }
    }
    let throughput = info.heuristics.throughput;
    if !throughput.is_finite() || throughput <= 0.0 {
        return Err(Error::invalid_file(
            Diagnostic::InvalidThroughput,
            format!("codec throughput {} bytes/ms", throughput),
        ));
    }
    Ok(())
}

/// Fold a frame reached past the loop end back into the loop region
fn wrap_into_loop(position: &Position, frame: u64) -> u64 {
    let (start, end) = (position.loop_start(), position.loop_end());
    if position.loop_count().is_looping() && frame > end {
        let length = end + 1 - start;
        start + (frame - start) % length
    } else {
        frame
    }
}

/// Forward a soft diagnostic to observers
fn report(events: &EventBus, voice_id: Uuid, diagnostic: Option<Diagnostic>) {
    let Some(diagnostic) = diagnostic else {
        return;
    };
    match diagnostic {
        Diagnostic::Starvation => trace!("Voice {} starving", voice_id),
        other => debug!("Voice {} diagnostic: {}", voice_id, other),
    }
    events.emit_lossy(EngineEvent::BufferingDiagnostic {
        voice_id,
        reason: diagnostic.to_string(),
        timestamp: Utc::now(),
    });
}
