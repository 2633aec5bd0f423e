//! Per-instance output ring
//!
//! Fixed array of output slots with two monotonic heads. Batch results are
//! written at the write head; the voice reads at the read head. A slot turns
//! readable only when it is full or when it is the terminal slot of the
//! stream.
//!
//! ```text
//!  read_head                 write_head
//!     │                          │
//!  [ready][ready][ready] [filling][free]...
//!   └──── read_count ────┘└──── write_count ────┘
//! ```
//!
//! `read_count + write_count == capacity` holds after every operation. Output
//! that does not fit (resampler overshoot) waits in a backlog until a slot
//! frees up.

use crate::error::{Error, Result};
use tracing::trace;

#[derive(Debug, Clone, Default)]
struct RingSlot {
    pcm: Vec<i16>,
    frames: usize,
    source_frames: u64,
    ready: bool,
    terminal: bool,
    read_frames: usize,
    read_source: u64,
}

impl RingSlot {
    fn clear(&mut self) {
        self.pcm.clear();
        self.frames = 0;
        self.source_frames = 0;
        self.ready = false;
        self.terminal = false;
        self.read_frames = 0;
        self.read_source = 0;
    }
}

/// Readable view of the slot at the read head
#[derive(Debug, PartialEq)]
pub struct SlotView<'a> {
    pub samples: &'a [i16],
    pub frames: usize,
    pub source_frames: u64,
    /// Consuming this view finishes the stream
    pub end_of_stream: bool,
}

/// Ring of decoded output slots
#[derive(Debug)]
pub struct OutputRing {
    slots: Vec<RingSlot>,
    slot_frames: usize,
    channels: usize,
    read_head: u64,
    write_head: u64,
    read_count: usize,
    write_count: usize,
    last_ready: Option<u64>,
    backlog: Vec<i16>,
    backlog_source: u64,
    pending_terminal: bool,
    finished: bool,
    drained: bool,
}

/// Share of `source` attributed to `part` out of `whole` output frames
fn proportional(source: u64, part: usize, whole: usize) -> u64 {
    if part >= whole || whole == 0 {
        source
    } else {
        source * part as u64 / whole as u64
    }
}

impl OutputRing {
    /// # Arguments
    /// * `capacity` - Number of slots
    /// * `slot_frames` - Frames per slot
    /// * `channels` - Interleaved channels per frame
    pub fn new(capacity: usize, slot_frames: usize, channels: usize) -> Self {
        let capacity = capacity.max(1);
        let channels = channels.max(1);
        let slots = (0..capacity)
            .map(|_| RingSlot {
                pcm: Vec::with_capacity(slot_frames * channels),
                ..RingSlot::default()
            })
            .collect();
        Self {
            slots,
            slot_frames: slot_frames.max(1),
            channels,
            read_head: 0,
            write_head: 0,
            read_count: 0,
            write_count: capacity,
            last_ready: None,
            backlog: Vec::new(),
            backlog_source: 0,
            pending_terminal: false,
            finished: false,
            drained: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_frames(&self) -> usize {
        self.slot_frames
    }

    /// Slots ready for the consumer
    pub fn read_count(&self) -> usize {
        self.read_count
    }

    /// Slots available to the producer (including a partially filled one)
    pub fn write_count(&self) -> usize {
        self.write_count
    }

    fn index(&self, head: u64) -> usize {
        (head % self.slots.len() as u64) as usize
    }

    /// Output frames the producer can still place without backlog
    pub fn free_frames(&self) -> usize {
        if self.finished || self.pending_terminal {
            return 0;
        }
        let partial = if self.write_count > 0 {
            self.slots[self.index(self.write_head)].frames
        } else {
            0
        };
        (self.write_count * self.slot_frames)
            .saturating_sub(partial)
            .saturating_sub(self.backlog.len() / self.channels)
    }

    /// Append decoded output representing `source_frames` source frames
    pub fn write(&mut self, pcm: &[i16], source_frames: u64) {
        self.backlog.extend_from_slice(pcm);
        self.backlog_source += source_frames;
        self.drain_backlog();
    }

    fn drain_backlog(&mut self) {
        while self.write_count > 0 && !self.backlog.is_empty() {
            let idx = self.index(self.write_head);
            let backlog_frames = self.backlog.len() / self.channels;
            let space = self.slot_frames - self.slots[idx].frames;
            let take = space.min(backlog_frames);
            let source = proportional(self.backlog_source, take, backlog_frames);

            let slot = &mut self.slots[idx];
            slot.pcm.extend(self.backlog.drain(..take * self.channels));
            slot.frames += take;
            slot.source_frames += source;
            self.backlog_source -= source;

            if slot.frames == self.slot_frames {
                self.mark_ready();
            }
        }
        if self.pending_terminal && self.backlog.is_empty() {
            self.apply_terminal();
        }
    }

    fn mark_ready(&mut self) {
        let idx = self.index(self.write_head);
        self.slots[idx].ready = true;
        self.last_ready = Some(self.write_head);
        self.write_head += 1;
        self.write_count -= 1;
        self.read_count += 1;
        debug_assert!(self.check_invariant());
    }

    /// The producer has delivered its last output
    pub fn finish(&mut self) {
        self.pending_terminal = true;
        if self.backlog.is_empty() {
            self.apply_terminal();
        }
    }

    fn apply_terminal(&mut self) {
        self.pending_terminal = false;
        self.finished = true;
        let leftover_source = std::mem::take(&mut self.backlog_source);

        if self.write_count > 0 {
            let idx = self.index(self.write_head);
            if self.slots[idx].frames > 0 || self.unread_last_ready().is_none() {
                let slot = &mut self.slots[idx];
                slot.terminal = true;
                slot.source_frames += leftover_source;
                self.mark_ready();
                trace!("Terminal slot {} marked ready", idx);
                return;
            }
        }
        if let Some(head) = self.unread_last_ready() {
            let idx = self.index(head);
            self.slots[idx].terminal = true;
            self.slots[idx].source_frames += leftover_source;
        }
    }

    fn unread_last_ready(&self) -> Option<u64> {
        self.last_ready.filter(|&head| head >= self.read_head)
    }

    /// Up to `max_frames` of the slot at the read head
    pub fn peek(&self, max_frames: usize) -> Option<SlotView<'_>> {
        if self.read_count == 0 {
            return None;
        }
        let slot = &self.slots[self.index(self.read_head)];
        let remaining = slot.frames - slot.read_frames;
        let frames = remaining.min(max_frames);
        let remaining_source = slot.source_frames - slot.read_source;
        let start = slot.read_frames * self.channels;
        Some(SlotView {
            samples: &slot.pcm[start..start + frames * self.channels],
            frames,
            source_frames: proportional(remaining_source, frames, remaining),
            end_of_stream: slot.terminal && frames == remaining,
        })
    }

    /// Consume `frames` from the slot at the read head, releasing it once empty
    pub fn consume(&mut self, frames: usize) -> Result<()> {
        if self.read_count == 0 {
            return Err(Error::InvalidState(
                "release on a ring with no readable slot".to_string(),
            ));
        }
        let idx = self.index(self.read_head);
        let slot = &mut self.slots[idx];
        let remaining = slot.frames - slot.read_frames;
        if frames > remaining {
            return Err(Error::InvalidState(format!(
                "release of {} frames from a slot holding {}",
                frames, remaining
            )));
        }
        let source = proportional(slot.source_frames - slot.read_source, frames, remaining);
        slot.read_frames += frames;
        slot.read_source += source;

        if slot.read_frames == slot.frames {
            if slot.terminal {
                self.drained = true;
            }
            slot.clear();
            self.read_head += 1;
            self.read_count -= 1;
            self.write_count += 1;
            debug_assert!(self.check_invariant());
            self.drain_backlog();
        }
        Ok(())
    }

    /// The terminal slot has been consumed
    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// The producer has finished (terminal slot placed or pending)
    pub fn is_finished(&self) -> bool {
        self.finished || self.pending_terminal
    }

    /// Drop all content (seek, virtualization)
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.read_head = self.write_head;
        self.read_count = 0;
        self.write_count = self.slots.len();
        self.last_ready = None;
        self.backlog.clear();
        self.backlog_source = 0;
        self.pending_terminal = false;
        self.finished = false;
        self.drained = false;
    }

    /// `read_count + write_count == capacity` and heads agree with counts
    pub fn check_invariant(&self) -> bool {
        self.read_count + self.write_count == self.slots.len()
            && self.write_head >= self.read_head
            && (self.write_head - self.read_head) as usize == self.read_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize, value: i16) -> Vec<i16> {
        vec![value; n]
    }

    #[test]
    fn test_slot_ready_only_when_full() {
        let mut ring = OutputRing::new(4, 256, 1);
        ring.write(&frames(200, 1), 200);
        assert_eq!(ring.read_count(), 0);
        assert!(ring.peek(256).is_none());

        ring.write(&frames(100, 2), 100);
        assert_eq!(ring.read_count(), 1);
        assert_eq!(ring.free_frames(), 3 * 256 - 44);
        assert!(ring.check_invariant());
    }

    #[test]
    fn test_terminal_partial_slot() {
        let mut ring = OutputRing::new(4, 256, 1);
        ring.write(&frames(1000, 0), 1000);
        ring.finish();
        assert_eq!(ring.read_count(), 4);

        let mut sizes = Vec::new();
        loop {
            let view = ring.peek(256).unwrap();
            let (n, last) = (view.frames, view.end_of_stream);
            assert_eq!(view.source_frames, n as u64);
            sizes.push(n);
            ring.consume(n).unwrap();
            assert!(ring.check_invariant());
            if last {
                break;
            }
        }
        assert_eq!(sizes, vec![256, 256, 256, 232]);
        assert!(ring.is_drained());
    }

    #[test]
    fn test_terminal_on_exact_fill_marks_last_slot() {
        let mut ring = OutputRing::new(4, 256, 1);
        ring.write(&frames(512, 0), 512);
        ring.finish();
        assert_eq!(ring.read_count(), 2);
        assert!(!ring.peek(256).unwrap().end_of_stream);
        ring.consume(256).unwrap();
        assert!(ring.peek(256).unwrap().end_of_stream);
    }

    #[test]
    fn test_terminal_after_everything_consumed_adds_empty_slot() {
        let mut ring = OutputRing::new(2, 4, 1);
        ring.write(&frames(4, 0), 4);
        ring.consume(4).unwrap();
        ring.finish();

        let view = ring.peek(4).unwrap();
        assert_eq!(view.frames, 0);
        assert!(view.end_of_stream);
        ring.consume(0).unwrap();
        assert!(ring.is_drained());
    }

    #[test]
    fn test_overflow_goes_to_backlog_and_drains_on_release() {
        let mut ring = OutputRing::new(2, 4, 1);
        ring.write(&frames(10, 3), 10);
        assert_eq!(ring.read_count(), 2);
        assert_eq!(ring.write_count(), 0);
        assert_eq!(ring.free_frames(), 0);

        ring.finish();
        ring.consume(4).unwrap();
        // Backlog of 2 frames moved into the freed slot and made terminal
        assert_eq!(ring.read_count(), 2);
        ring.consume(4).unwrap();
        let view = ring.peek(4).unwrap();
        assert_eq!(view.frames, 2);
        assert!(view.end_of_stream);
        assert!(ring.check_invariant());
    }

    #[test]
    fn test_partial_reads_split_source_frames() {
        let mut ring = OutputRing::new(2, 4, 2);
        // 4 output frames standing for 8 source frames (2x pitch)
        ring.write(&frames(8, 5), 8);
        let view = ring.peek(3).unwrap();
        assert_eq!(view.frames, 3);
        assert_eq!(view.samples.len(), 6);
        assert_eq!(view.source_frames, 6);
        ring.consume(3).unwrap();

        let view = ring.peek(3).unwrap();
        assert_eq!(view.frames, 1);
        assert_eq!(view.source_frames, 2);
    }

    #[test]
    fn test_counters_stay_in_range() {
        let mut ring = OutputRing::new(3, 2, 1);
        for round in 0..20 {
            ring.write(&frames(2, round), 2);
            assert!(ring.read_count() <= ring.capacity());
            assert!(ring.write_count() <= ring.capacity());
            if round % 2 == 1 {
                while ring.peek(2).is_some() {
                    ring.consume(2).unwrap();
                    assert!(ring.check_invariant());
                }
            }
        }
        assert!(ring.consume(1).is_err());
        assert!(ring.check_invariant());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ring = OutputRing::new(2, 4, 1);
        ring.write(&frames(6, 1), 6);
        ring.finish();
        ring.reset();
        assert_eq!(ring.read_count(), 0);
        assert_eq!(ring.write_count(), 2);
        assert_eq!(ring.free_frames(), 8);
        assert!(!ring.is_finished());
        assert!(ring.check_invariant());
    }
}
