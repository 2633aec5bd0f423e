//! Streaming sample rate converter for pitch changes
//!
//! Wraps rubato's `FastFixedIn`, which wants fixed-size planar input chunks.
//! Input is queued until a full chunk is available; the queued frames are
//! reported as buffered so callers can account for them in source time. A
//! ratio of exactly 1.0 bypasses rubato entirely.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Largest relative ratio change applied to a live resampler
const MAX_RELATIVE_RATIO: f64 = 2.0;

/// Ratio range accepted from callers (output frames per source frame)
const MIN_RATIO: f64 = 0.125;
const MAX_RATIO: f64 = 8.0;

pub struct SampleRateConverter {
    channels: usize,
    chunk_frames: usize,
    ratio: f64,
    /// Ratio the live resampler was created with
    base_ratio: f64,
    inner: Option<FastFixedIn<f32>>,
    /// Interleaved input waiting for a full chunk
    pending: Vec<f32>,
}

impl SampleRateConverter {
    /// # Arguments
    /// * `channels` - Interleaved channel count
    /// * `chunk_frames` - Input frames per rubato call
    pub fn new(channels: usize, chunk_frames: usize) -> Self {
        Self {
            channels: channels.max(1),
            chunk_frames: chunk_frames.max(1),
            ratio: 1.0,
            base_ratio: 1.0,
            inner: None,
            pending: Vec::new(),
        }
    }

    /// Output frames per source frame
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Source frames accepted but not yet turned into output
    pub fn buffered_frames(&self) -> u64 {
        (self.pending.len() / self.channels) as u64
    }

    pub fn set_ratio(&mut self, ratio: f64) -> Result<()> {
        let ratio = ratio.clamp(MIN_RATIO, MAX_RATIO);
        if (ratio - self.ratio).abs() < f64::EPSILON {
            return Ok(());
        }

        let within_range = ratio >= self.base_ratio / MAX_RELATIVE_RATIO
            && ratio <= self.base_ratio * MAX_RELATIVE_RATIO;

        if let Some(inner) = self.inner.as_mut().filter(|_| within_range) {
            inner.set_resample_ratio(ratio, false).map_err(|e| {
                Error::InvalidState(format!("resampler ratio change failed: {}", e))
            })?;
        } else if (ratio - 1.0).abs() < f64::EPSILON && self.pending.is_empty() {
            self.inner = None;
            self.base_ratio = 1.0;
        } else {
            let inner = FastFixedIn::<f32>::new(
                ratio,
                MAX_RELATIVE_RATIO,
                PolynomialDegree::Cubic,
                self.chunk_frames,
                self.channels,
            )
            .map_err(|e| Error::InvalidState(format!("resampler creation failed: {}", e)))?;
            debug!(
                "Resampler created (ratio {:.4}, chunk {} frames)",
                ratio, self.chunk_frames
            );
            self.inner = Some(inner);
            self.base_ratio = ratio;
        }
        self.ratio = ratio;
        Ok(())
    }

    /// Convert interleaved input
    ///
    /// With `flush` set, queued input is zero-padded to a full chunk and
    /// converted; output is trimmed to the length the real input maps to.
    pub fn process(&mut self, input: &[i16], flush: bool) -> Result<Vec<i16>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(input.to_vec());
        };

        self.pending.extend(input.iter().map(|&s| s as f32 / 32768.0));

        let mut output: Vec<f32> = Vec::new();
        loop {
            let needed = inner.input_frames_next();
            if self.pending.len() < needed * self.channels {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed * self.channels).collect();
            let planar = deinterleave(&chunk, self.channels);
            let converted = inner
                .process(&planar, None)
                .map_err(|e| Error::InvalidState(format!("resampling failed: {}", e)))?;
            output.extend(interleave(&converted));
        }

        if flush && !self.pending.is_empty() {
            let real_frames = self.pending.len() / self.channels;
            let needed = inner.input_frames_next();
            let mut chunk = std::mem::take(&mut self.pending);
            chunk.resize(needed * self.channels, 0.0);
            let planar = deinterleave(&chunk, self.channels);
            let converted = inner
                .process(&planar, None)
                .map_err(|e| Error::InvalidState(format!("resampling failed: {}", e)))?;
            let keep = ((real_frames as f64 * self.ratio).round() as usize)
                .min(converted.first().map(|c| c.len()).unwrap_or(0));
            let trimmed: Vec<Vec<f32>> = converted
                .into_iter()
                .map(|mut c| {
                    c.truncate(keep);
                    c
                })
                .collect();
            output.extend(interleave(&trimmed));
        }

        Ok(output
            .into_iter()
            .map(|s| (s * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect())
    }

    /// Drop queued input and filter history
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
    }
}

/// `[L, R, L, R, ...]` to `[[L, L, ...], [R, R, ...]]`
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, &sample) in frame.iter().enumerate() {
            planar[ch].push(sample);
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let frames = planar.first().map(|c| c.len()).unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planar.len());
    for i in 0..frames {
        for channel in planar {
            out.push(channel[i]);
        }
    }
    out
}
