//! Media header contract
//!
//! The header parser turns the first streamed bytes of a file into a format
//! descriptor, data bounds, loop points, markers and optional auxiliary blobs
//! (analysis envelope, seek table). The result is consumed once by codec
//! initialization.

mod wave;

pub use wave::WaveHeaderParser;

use crate::error::Result;
use crate::types::{FormatTag, LoopCount};
use bytes::Bytes;

/// Encoded format of the data chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub tag: FormatTag,
    pub channels: u16,
    pub sample_rate: u32,
    /// Bytes per frame (PCM) or per block (ADPCM)
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// Frames decoded from one block (1 for PCM)
    pub frames_per_block: u32,
}

/// Loop region in frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPoints {
    pub start: u64,
    /// Inclusive
    pub end: u64,
    pub count: LoopCount,
}

/// Cue marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub id: u32,
    pub frame: u64,
}

/// Seek table entry: a decodable entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPoint {
    pub frame: u64,
    /// Offset relative to the start of the data chunk
    pub byte_offset: u64,
}

/// Everything the parser extracts from a media header
#[derive(Debug, Clone, PartialEq)]
pub struct MediaHeader {
    pub format: FormatDescriptor,
    /// File offset of the first data byte
    pub data_offset: u64,
    pub data_size: u64,
    pub total_frames: u64,
    pub loop_points: Option<LoopPoints>,
    pub markers: Vec<Marker>,
    /// Frames of encoder delay at the head of the stream
    pub encoder_delay: u32,
    /// Frames of padding at the tail of the stream
    pub encoder_padding: u32,
    pub analysis: Option<Bytes>,
    pub seek_table: Option<Bytes>,
}

impl MediaHeader {
    /// File offset one past the last data byte
    pub fn data_end(&self) -> u64 {
        self.data_offset + self.data_size
    }

    /// Decoded seek table entries, sorted by frame
    pub fn seek_points(&self) -> Vec<SeekPoint> {
        self.seek_table
            .as_deref()
            .map(parse_seek_table)
            .unwrap_or_default()
    }
}

/// Header parser contract
pub trait HeaderParser {
    /// Parse the header at the start of `buffer`
    fn parse(&self, buffer: &[u8]) -> Result<MediaHeader>;
}

/// Decode a seek table blob of little-endian `(u32 frame, u32 byte offset)` pairs
pub fn parse_seek_table(blob: &[u8]) -> Vec<SeekPoint> {
    let mut points: Vec<SeekPoint> = blob
        .chunks_exact(8)
        .map(|entry| SeekPoint {
            frame: u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]) as u64,
            byte_offset: u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]) as u64,
        })
        .collect();
    points.sort_by_key(|p| p.frame);
    points
}
