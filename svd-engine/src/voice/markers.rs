//! Cue marker track
//!
//! Holds the cue markers of one voice sorted by frame and answers "which
//! markers lie in the frames just played". Advances arrive in clamped
//! sub-ranges (never across a loop boundary), so every query is a plain
//! half-open interval.

use crate::header::Marker;

/// Sorted cue markers of one voice
#[derive(Debug, Clone, Default)]
pub struct MarkerTrack {
    /// Sorted by frame ascending (ties by id)
    markers: Vec<Marker>,
}

impl MarkerTrack {
    /// Build a track; markers will be sorted
    pub fn new(mut markers: Vec<Marker>) -> Self {
        markers.sort_by_key(|m| (m.frame, m.id));
        Self { markers }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Markers with `from <= frame < to`, in playback order
    pub fn crossed(&self, from: u64, to: u64) -> &[Marker] {
        if to <= from {
            return &[];
        }
        let lo = self.markers.partition_point(|m| m.frame < from);
        let hi = self.markers.partition_point(|m| m.frame < to);
        &self.markers[lo..hi]
    }

    /// Marker with `id`, if any
    pub fn find(&self, id: u32) -> Option<&Marker> {
        self.markers.iter().find(|m| m.id == id)
    }
}
