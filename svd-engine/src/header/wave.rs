//! RIFF/WAVE header parser
//!
//! Recognized chunks:
//! - `fmt ` PCM (1), IMA ADPCM (0x11), WAVE_FORMAT_EXTENSIBLE wrapping either
//! - `fact` decoded frame count
//! - `smpl` first loop (start, inclusive end, play count)
//! - `cue ` markers
//! - `seek` seek table, `(u32 frame, u32 data offset)` pairs
//! - `anal` analysis envelope blob
//! - `gapl` encoder delay and padding, `(u32, u32)`
//! - `data` ends the header; its body need not be in the buffer
//!
//! Unknown chunks are skipped.

use super::{FormatDescriptor, HeaderParser, LoopPoints, Marker, MediaHeader};
use crate::error::{Diagnostic, Error, Result};
use crate::types::{FormatTag, LoopCount};
use bytes::Bytes;
use tracing::{debug, trace};

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IMA_ADPCM: u16 = 0x0011;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Parser for RIFF/WAVE media headers
#[derive(Debug, Default, Clone, Copy)]
pub struct WaveHeaderParser;

impl WaveHeaderParser {
    pub fn new() -> Self {
        Self
    }
}

fn invalid(detail: impl Into<String>) -> Error {
    Error::invalid_file(Diagnostic::InvalidHeader, detail)
}

fn u16_at(buf: &[u8], at: usize) -> Result<u16> {
    buf.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| invalid(format!("truncated field at {}", at)))
}

fn u32_at(buf: &[u8], at: usize) -> Result<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| invalid(format!("truncated field at {}", at)))
}

/// Frames in one IMA ADPCM block
pub fn ima_frames_per_block(block_align: u16, channels: u16) -> u32 {
    let header = 4 * channels as u32;
    let body = (block_align as u32).saturating_sub(header);
    body * 2 / channels.max(1) as u32 + 1
}

fn parse_fmt(body: &[u8]) -> Result<FormatDescriptor> {
    let mut tag = u16_at(body, 0)?;
    let channels = u16_at(body, 2)?;
    let sample_rate = u32_at(body, 4)?;
    let block_align = u16_at(body, 12)?;
    let bits_per_sample = u16_at(body, 14)?;

    if tag == WAVE_FORMAT_EXTENSIBLE {
        // Sub-format GUID starts with the actual format code
        tag = u16_at(body, 24)?;
    }
    if channels == 0 || sample_rate == 0 || block_align == 0 {
        return Err(invalid(format!(
            "fmt chunk has {} channels, {} Hz, block align {}",
            channels, sample_rate, block_align
        )));
    }

    match tag {
        WAVE_FORMAT_PCM => {
            if bits_per_sample != 16 || block_align != channels * 2 {
                return Err(Error::UnsupportedFormat(format!(
                    "PCM with {} bits and block align {}",
                    bits_per_sample, block_align
                )));
            }
            Ok(FormatDescriptor {
                tag: FormatTag::Pcm16,
                channels,
                sample_rate,
                block_align,
                bits_per_sample,
                frames_per_block: 1,
            })
        }
        WAVE_FORMAT_IMA_ADPCM => {
            if block_align as u32 <= 4 * channels as u32 {
                return Err(invalid(format!(
                    "ADPCM block align {} too small for {} channels",
                    block_align, channels
                )));
            }
            let frames_per_block = match u16_at(body, 18) {
                Ok(n) if n > 0 => n as u32,
                _ => ima_frames_per_block(block_align, channels),
            };
            Ok(FormatDescriptor {
                tag: FormatTag::ImaAdpcm,
                channels,
                sample_rate,
                block_align,
                bits_per_sample,
                frames_per_block,
            })
        }
        other => Err(Error::UnsupportedFormat(format!("format tag {:#06x}", other))),
    }
}

fn parse_smpl(body: &[u8]) -> Result<Option<LoopPoints>> {
    let loops = u32_at(body, 28)?;
    if loops == 0 {
        return Ok(None);
    }
    let start = u32_at(body, 36 + 8)? as u64;
    let end = u32_at(body, 36 + 12)? as u64;
    let play_count = u32_at(body, 36 + 20)?;
    Ok(Some(LoopPoints {
        start,
        end,
        count: LoopCount::new(play_count.min(u16::MAX as u32) as u16),
    }))
}

fn parse_cue(body: &[u8]) -> Result<Vec<Marker>> {
    let count = u32_at(body, 0)? as usize;
    let mut markers = Vec::with_capacity(count.min(body.len() / 24));
    for i in 0..count {
        let entry = 4 + i * 24;
        markers.push(Marker {
            id: u32_at(body, entry)?,
            frame: u32_at(body, entry + 20)? as u64,
        });
    }
    markers.sort_by_key(|m| m.frame);
    Ok(markers)
}

impl HeaderParser for WaveHeaderParser {
    fn parse(&self, buffer: &[u8]) -> Result<MediaHeader> {
        if buffer.len() < 12 || &buffer[0..4] != b"RIFF" || &buffer[8..12] != b"WAVE" {
            return Err(invalid("missing RIFF/WAVE signature"));
        }

        let mut format = None;
        let mut fact_frames = None;
        let mut loop_points = None;
        let mut markers = Vec::new();
        let mut seek_table = None;
        let mut analysis = None;
        let mut gapless = (0u32, 0u32);

        let mut pos = 12usize;
        loop {
            if pos + 8 > buffer.len() {
                return Err(invalid("data chunk not found in first buffer"));
            }
            let id = &buffer[pos..pos + 4];
            let size = u32_at(buffer, pos + 4)? as usize;
            let body_start = pos + 8;

            if id == b"data" {
                let format: FormatDescriptor =
                    format.ok_or_else(|| invalid("data chunk before fmt chunk"))?;
                let data_size = size as u64;
                let blocks = data_size / format.block_align as u64;
                let total_frames = match (format.tag, fact_frames) {
                    (FormatTag::Pcm16, _) => blocks,
                    (FormatTag::ImaAdpcm, Some(frames)) => frames,
                    (FormatTag::ImaAdpcm, None) => (blocks * format.frames_per_block as u64)
                        .saturating_sub(gapless.0 as u64 + gapless.1 as u64),
                };

                debug!(
                    "Parsed WAVE header: {:?}, {} Hz, {} ch, {} frames, data at {}",
                    format.tag, format.sample_rate, format.channels, total_frames, body_start
                );

                return Ok(MediaHeader {
                    format,
                    data_offset: body_start as u64,
                    data_size,
                    total_frames,
                    loop_points,
                    markers,
                    encoder_delay: gapless.0,
                    encoder_padding: gapless.1,
                    analysis,
                    seek_table,
                });
            }

            let body = buffer
                .get(body_start..body_start + size)
                .ok_or_else(|| invalid(format!("chunk {:?} truncated", String::from_utf8_lossy(id))))?;
            trace!("WAVE chunk {:?} ({} bytes)", String::from_utf8_lossy(id), size);

            match id {
                b"fmt " => format = Some(parse_fmt(body)?),
                b"fact" => fact_frames = Some(u32_at(body, 0)? as u64),
                b"smpl" => loop_points = parse_smpl(body)?,
                b"cue " => markers = parse_cue(body)?,
                b"seek" => seek_table = Some(Bytes::copy_from_slice(body)),
                b"anal" => analysis = Some(Bytes::copy_from_slice(body)),
                b"gapl" => gapless = (u32_at(body, 0)?, u32_at(body, 4)?),
                _ => {}
            }

            // Chunks are word aligned
            pos = body_start + size + (size & 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(out: &mut Vec<u8>, id: &[u8; 4], body: &[u8]) {
        out.extend_from_slice(id);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
    }

    fn fmt_body(tag: u16, channels: u16, rate: u32, block_align: u16, bits: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&tag.to_le_bytes());
        body.extend_from_slice(&channels.to_le_bytes());
        body.extend_from_slice(&rate.to_le_bytes());
        body.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
        body.extend_from_slice(&block_align.to_le_bytes());
        body.extend_from_slice(&bits.to_le_bytes());
        body
    }

    fn riff(chunks: Vec<u8>) -> Vec<u8> {
        let mut out = b"RIFF".to_vec();
        out.extend_from_slice(&((chunks.len() + 4) as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend(chunks);
        out
    }

    #[test]
    fn test_pcm_header() {
        let mut chunks = Vec::new();
        chunk(&mut chunks, b"fmt ", &fmt_body(1, 2, 48000, 4, 16));
        chunk(&mut chunks, b"data", &[0u8; 400]);
        let header = WaveHeaderParser.parse(&riff(chunks)).unwrap();

        assert_eq!(header.format.tag, FormatTag::Pcm16);
        assert_eq!(header.format.channels, 2);
        assert_eq!(header.total_frames, 100);
        assert_eq!(header.data_offset, 12 + 8 + 16 + 8);
        assert!(header.loop_points.is_none());
    }

    #[test]
    fn test_loop_cue_and_aux_chunks() {
        let mut smpl = vec![0u8; 36];
        smpl[28..32].copy_from_slice(&1u32.to_le_bytes());
        let mut loop_entry = vec![0u8; 24];
        loop_entry[8..12].copy_from_slice(&100u32.to_le_bytes());
        loop_entry[12..16].copy_from_slice(&899u32.to_le_bytes());
        loop_entry[20..24].copy_from_slice(&2u32.to_le_bytes());
        smpl.extend(loop_entry);

        let mut cue = 2u32.to_le_bytes().to_vec();
        for (id, frame) in [(7u32, 500u32), (3, 250)] {
            let mut entry = vec![0u8; 24];
            entry[0..4].copy_from_slice(&id.to_le_bytes());
            entry[20..24].copy_from_slice(&frame.to_le_bytes());
            cue.extend(entry);
        }

        let mut chunks = Vec::new();
        chunk(&mut chunks, b"fmt ", &fmt_body(1, 1, 44100, 2, 16));
        chunk(&mut chunks, b"smpl", &smpl);
        chunk(&mut chunks, b"cue ", &cue);
        chunk(&mut chunks, b"anal", &[1, 2, 3]);
        chunk(&mut chunks, b"data", &[0u8; 2000]);
        let header = WaveHeaderParser.parse(&riff(chunks)).unwrap();

        let loops = header.loop_points.unwrap();
        assert_eq!((loops.start, loops.end), (100, 899));
        assert_eq!(loops.count, LoopCount::new(2));
        assert_eq!(header.markers[0], Marker { id: 3, frame: 250 });
        assert_eq!(header.markers[1].id, 7);
        assert_eq!(header.analysis.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_adpcm_frames_from_blocks_and_gapless() {
        let mut chunks = Vec::new();
        chunk(&mut chunks, b"fmt ", &fmt_body(0x11, 1, 22050, 36, 4));
        let mut gapl = 10u32.to_le_bytes().to_vec();
        gapl.extend_from_slice(&5u32.to_le_bytes());
        chunk(&mut chunks, b"gapl", &gapl);
        chunk(&mut chunks, b"data", &[0u8; 36 * 4]);
        let header = WaveHeaderParser.parse(&riff(chunks)).unwrap();

        assert_eq!(header.format.tag, FormatTag::ImaAdpcm);
        assert_eq!(header.format.frames_per_block, 65);
        assert_eq!(header.total_frames, 4 * 65 - 15);
        assert_eq!(header.encoder_delay, 10);
    }

    #[test]
    fn test_frames_per_block_formula() {
        assert_eq!(ima_frames_per_block(36, 1), 65);
        assert_eq!(ima_frames_per_block(1024, 2), 1017);
        assert_eq!(ima_frames_per_block(256, 1), 505);
    }

    #[test]
    fn test_missing_data_chunk_is_invalid() {
        let mut chunks = Vec::new();
        chunk(&mut chunks, b"fmt ", &fmt_body(1, 1, 44100, 2, 16));
        let err = WaveHeaderParser.parse(&riff(chunks)).unwrap_err();
        assert_eq!(err.diagnostic(), Some(Diagnostic::InvalidHeader));
    }

    #[test]
    fn test_not_riff_is_invalid() {
        let err = WaveHeaderParser.parse(b"OggS....").unwrap_err();
        assert_eq!(err.diagnostic(), Some(Diagnostic::InvalidHeader));
    }

    #[test]
    fn test_unsupported_tag() {
        let mut chunks = Vec::new();
        chunk(&mut chunks, b"fmt ", &fmt_body(3, 1, 44100, 4, 32));
        chunk(&mut chunks, b"data", &[0u8; 8]);
        assert!(matches!(
            WaveHeaderParser.parse(&riff(chunks)),
            Err(Error::UnsupportedFormat(_))
        ));
    }
}
