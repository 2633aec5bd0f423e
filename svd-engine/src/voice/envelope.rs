//! Pre-computed level envelope
//!
//! The analysis blob of a media header carries a coarse loudness envelope
//! computed at authoring time:
//!
//! ```text
//! u32 count
//! count × (u32 frame, f32 level)   little-endian, frames ascending
//! ```
//!
//! The mixer queries the level at the current play position, e.g. for
//! virtualization decisions. Levels between two points are interpolated
//! linearly; outside the covered range the nearest point holds.

use crate::error::{Diagnostic, Error, Result};
use tracing::debug;

/// One envelope point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopePoint {
    pub frame: u64,
    pub level: f32,
}

/// Level envelope of one voice
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    points: Vec<EnvelopePoint>,
}

impl Envelope {
    /// Decode an analysis blob
    ///
    /// # Errors
    /// `InvalidFile` (`InvalidHeader`) when the blob is shorter than its
    /// declared point count or the levels are not finite.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let Some(count) = blob.get(0..4) else {
            return Err(Error::invalid_file(
                Diagnostic::InvalidHeader,
                "analysis blob shorter than its point count",
            ));
        };
        let count = u32::from_le_bytes([count[0], count[1], count[2], count[3]]) as usize;
        let body = &blob[4..];
        if body.len() / 8 < count {
            return Err(Error::invalid_file(
                Diagnostic::InvalidHeader,
                format!(
                    "analysis blob declares {} points but holds {}",
                    count,
                    body.len() / 8
                ),
            ));
        }

        let mut points = Vec::with_capacity(count);
        for entry in body.chunks_exact(8).take(count) {
            let frame = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]) as u64;
            let level = f32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);
            if !level.is_finite() {
                return Err(Error::invalid_file(
                    Diagnostic::InvalidHeader,
                    format!("analysis level at frame {} is not finite", frame),
                ));
            }
            points.push(EnvelopePoint { frame, level });
        }
        points.sort_by_key(|p| p.frame);

        debug!("Envelope loaded ({} points)", points.len());
        Ok(Self { points })
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[EnvelopePoint] {
        &self.points
    }

    /// Interpolated level at `frame`; `None` without points
    pub fn level_at(&self, frame: u64) -> Option<f32> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if frame <= first.frame {
            return Some(first.level);
        }
        if frame >= last.frame {
            return Some(last.level);
        }

        let next = self.points.partition_point(|p| p.frame <= frame);
        let (a, b) = (self.points[next - 1], self.points[next]);
        let span = (b.frame - a.frame) as f32;
        let t = (frame - a.frame) as f32 / span;
        Some(a.level + (b.level - a.level) * t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(points: &[(u32, f32)]) -> Vec<u8> {
        let mut out = (points.len() as u32).to_le_bytes().to_vec();
        for (frame, level) in points {
            out.extend_from_slice(&frame.to_le_bytes());
            out.extend_from_slice(&level.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_linear_interpolation() {
        let env = Envelope::parse(&blob(&[(0, 0.0), (100, 1.0), (300, 0.0)])).unwrap();
        assert_eq!(env.level_at(0), Some(0.0));
        assert!((env.level_at(50).unwrap() - 0.5).abs() < 1e-6);
        assert_eq!(env.level_at(100), Some(1.0));
        assert!((env.level_at(200).unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_holds_outside_range() {
        let env = Envelope::parse(&blob(&[(10, 0.25), (20, 0.75)])).unwrap();
        assert_eq!(env.level_at(0), Some(0.25));
        assert_eq!(env.level_at(1000), Some(0.75));
    }

    #[test]
    fn test_empty_envelope_has_no_level() {
        let env = Envelope::parse(&blob(&[])).unwrap();
        assert!(env.is_empty());
        assert_eq!(env.level_at(5), None);
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let mut data = blob(&[(0, 1.0), (10, 0.5)]);
        data.truncate(data.len() - 3);
        let err = Envelope::parse(&data).unwrap_err();
        assert_eq!(err.diagnostic(), Some(Diagnostic::InvalidHeader));

        assert!(Envelope::parse(&[1, 0]).is_err());
    }

    #[test]
    fn test_non_finite_level_rejected() {
        let data = blob(&[(0, f32::NAN)]);
        assert!(Envelope::parse(&data).is_err());
    }
}
