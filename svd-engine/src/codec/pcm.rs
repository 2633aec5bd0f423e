//! Software codec for 16-bit little-endian PCM
//!
//! Decoding is a byte-to-sample copy straight out of the stream grant. The
//! only state kept across grants is a partial frame split between two grants.

use super::{
    Codec, CodecAttributes, CodecBuffer, CodecInfo, CodecParams, PrepareStatus, RefillRequest,
    SeekTarget, VirtualBehavior,
};
use crate::error::{Diagnostic, Error, Result, Tagged};
use crate::header::MediaHeader;
use crate::io::StreamHeuristics;
use crate::stream::StreamingBuffer;
use crate::types::{AudioFormat, BufferStatus, FormatTag, LoopCount};
use tracing::{debug, trace};

/// Grants smaller than this many frames are not worth a provider request
const MIN_GRANT_FRAMES: usize = 256;

#[derive(Debug, Default)]
pub struct PcmCodec {
    block_align: usize,
    channels: usize,
    data_offset: u64,
    total_frames: u64,
    /// Bytes of a frame split across two grants
    carry: Vec<u8>,
    is_virtual: bool,
}

impl PcmCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_frames(samples: &mut Vec<i16>, bytes: &[u8]) {
        samples.extend(
            bytes
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );
    }
}

impl Codec for PcmCodec {
    fn init(&mut self, header: &MediaHeader, params: &CodecParams) -> Result<Tagged<CodecInfo>> {
        let format = &header.format;
        if format.tag != FormatTag::Pcm16 {
            return Err(Error::UnsupportedFormat(format!(
                "PCM codec cannot decode {:?}",
                format.tag
            )));
        }
        if format.block_align == 0 || format.channels == 0 {
            return Err(Error::invalid_file(
                Diagnostic::InvalidHeader,
                "PCM block align and channel count must be non-zero",
            ));
        }

        self.block_align = format.block_align as usize;
        self.channels = format.channels as usize;
        self.data_offset = header.data_offset;
        self.total_frames = header.data_size / format.block_align as u64;
        self.carry.clear();

        let ba = format.block_align as u64;
        let heuristics = StreamHeuristics {
            throughput: (format.sample_rate as f32 * ba as f32) / 1000.0,
            min_buffer_bytes: MIN_GRANT_FRAMES * self.block_align,
            loop_start: header.data_offset + params.loop_start * ba,
            loop_end: header.data_offset + (params.loop_end + 1) * ba,
            priority: params.priority,
        };

        debug!(
            "PCM codec ready: {} Hz, {} ch, {} frames",
            format.sample_rate, format.channels, self.total_frames
        );

        Ok(Tagged::ok(CodecInfo {
            output_format: AudioFormat {
                sample_rate: format.sample_rate,
                channels: format.channels,
            },
            source_sample_rate: format.sample_rate,
            total_frames: self.total_frames,
            heuristics,
            attributes: CodecAttributes::default(),
        }))
    }

    fn get_buffer(
        &mut self,
        stream: &mut StreamingBuffer,
        request: &RefillRequest,
    ) -> Result<Tagged<CodecBuffer>> {
        if self.is_virtual {
            return Ok(Tagged::ok(CodecBuffer::not_ready()));
        }
        let ba = self.block_align;
        let mut samples = Vec::with_capacity(request.max_frames * self.channels);
        let mut frames = 0;

        while frames < request.max_frames {
            if stream.size_left() == 0 {
                if stream.is_last_buffer() {
                    break;
                }
                if stream.fetch()? == BufferStatus::NotReady {
                    break;
                }
                continue;
            }

            if !self.carry.is_empty() {
                let part = stream.take(ba - self.carry.len());
                self.carry.extend_from_slice(&part);
                if self.carry.len() == ba {
                    Self::push_frames(&mut samples, &self.carry);
                    self.carry.clear();
                    frames += 1;
                }
                continue;
            }

            let whole = stream.size_left() / ba;
            if whole == 0 {
                let tail = stream.take(ba);
                self.carry.extend_from_slice(&tail);
                continue;
            }
            let n = whole.min(request.max_frames - frames);
            let chunk = stream.take(n * ba);
            Self::push_frames(&mut samples, &chunk);
            frames += n;
        }

        let status = if stream.is_exhausted() {
            if !self.carry.is_empty() {
                trace!("Dropping {} trailing bytes of a partial frame", self.carry.len());
                self.carry.clear();
            }
            BufferStatus::NoMoreData
        } else if frames > 0 {
            BufferStatus::DataReady
        } else {
            BufferStatus::NotReady
        };

        Ok(Tagged::ok(CodecBuffer {
            samples,
            frames,
            source_frames: frames as u64,
            status,
        }))
    }

    fn release_buffer(&mut self) {}

    fn prepare_next_buffer(&mut self, _stream: &mut StreamingBuffer) -> Result<Tagged<PrepareStatus>> {
        Ok(Tagged::ok(PrepareStatus::Idle))
    }

    fn virtual_on(&mut self, behavior: VirtualBehavior) -> Result<Tagged<()>> {
        self.is_virtual = true;
        if behavior != VirtualBehavior::Resume {
            self.carry.clear();
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
        Ok(Tagged::ok(SeekTarget {
            frame: desired_frame,
            byte_offset: self.data_offset + desired_frame * self.block_align as u64,
        }))
    }

    fn seek(
        &mut self,
        _target: &SeekTarget,
        _desired_frame: u64,
        _loop_count: LoopCount,
    ) -> Result<Tagged<()>> {
        self.carry.clear();
        Ok(Tagged::ok(()))
    }

    fn stop_looping(&mut self, _stream: &StreamingBuffer) -> Result<Tagged<()>> {
        Ok(Tagged::ok(()))
    }

    fn is_virtual(&self) -> bool {
        self.is_virtual
    }
}
