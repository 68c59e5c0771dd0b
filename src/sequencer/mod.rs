//! Frame reordering
//!
//! Frames reach the session controller through a [`FrameReorderer`]. The
//! byte-stream path is already ordered and uses [`PassThrough`]; the
//! file-notification path has no ordering guarantee and uses
//! [`FrameSequencer`].

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};

/// Restores canonical frame order ahead of classification
pub trait FrameReorderer<T>: Send {
    /// Offer a frame. Returns false if it was discarded as a duplicate.
    fn push(&mut self, sequence: u64, payload: T) -> bool;

    /// Release every frame that is now in order, lowest sequence first
    fn drain(&mut self) -> Vec<(u64, T)>;

    /// Frames held back waiting for a gap to fill
    fn pending(&self) -> usize;
}

/// Identity reorderer for sources that already deliver in order
#[derive(Debug)]
pub struct PassThrough<T> {
    queue: VecDeque<(u64, T)>,
}

impl<T> PassThrough<T> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }
}

impl<T> Default for PassThrough<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> FrameReorderer<T> for PassThrough<T> {
    fn push(&mut self, sequence: u64, payload: T) -> bool {
        self.queue.push_back((sequence, payload));
        true
    }

    fn drain(&mut self) -> Vec<(u64, T)> {
        self.queue.drain(..).collect()
    }

    fn pending(&self) -> usize {
        0
    }
}

/// Heap entry ordered by sequence number only
#[derive(Debug)]
struct Entry<T> {
    sequence: u64,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence.cmp(&other.sequence)
    }
}

/// Min-heap reorderer that releases frames gaplessly from `next_expected`
#[derive(Debug)]
pub struct FrameSequencer<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    next_expected: u64,
    discarded: u64,
}

impl<T> FrameSequencer<T> {
    /// Sequencer whose first released frame is `first`
    pub fn starting_at(first: u64) -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_expected: first,
            discarded: 0,
        }
    }

    /// Sequencer for 1-based frame numbering
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Sequence number the next released frame must carry
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Number of duplicate deliveries dropped so far
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn discard(&mut self, sequence: u64) {
        self.discarded += 1;
        tracing::warn!(
            "Discarding duplicate frame {} (next expected {})",
            sequence,
            self.next_expected
        );
    }
}

impl<T> Default for FrameSequencer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> FrameReorderer<T> for FrameSequencer<T> {
    fn push(&mut self, sequence: u64, payload: T) -> bool {
        if sequence < self.next_expected {
            self.discard(sequence);
            return false;
        }
        self.heap.push(Reverse(Entry { sequence, payload }));
        true
    }

    fn drain(&mut self) -> Vec<(u64, T)> {
        let mut released = Vec::new();
        while let Some(Reverse(head)) = self.heap.peek() {
            let sequence = head.sequence;
            if sequence > self.next_expected {
                // Gap: wait for the missing frame
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            if sequence < self.next_expected {
                // Same number pushed twice before release
                self.discard(sequence);
                continue;
            }
            self.next_expected += 1;
            released.push((entry.sequence, entry.payload));
        }
        released
    }

    fn pending(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequences<T>(frames: &[(u64, T)]) -> Vec<u64> {
        frames.iter().map(|(seq, _)| *seq).collect()
    }

    #[test]
    fn test_out_of_order_delivery_is_released_in_order() {
        let mut sequencer = FrameSequencer::new();
        let mut released = Vec::new();
        for seq in [3, 1, 4, 2] {
            sequencer.push(seq, format!("frame_{seq:04}.jpg"));
            released.extend(sequencer.drain());
        }
        assert_eq!(sequences(&released), vec![1, 2, 3, 4]);
        assert_eq!(released[0].1, "frame_0001.jpg");
        assert_eq!(sequencer.next_expected(), 5);
    }

    #[test]
    fn test_gap_holds_back_later_frames() {
        let mut sequencer = FrameSequencer::new();
        sequencer.push(2, ());
        sequencer.push(3, ());
        assert!(sequencer.drain().is_empty());
        assert_eq!(sequencer.pending(), 2);

        sequencer.push(1, ());
        assert_eq!(sequences(&sequencer.drain()), vec![1, 2, 3]);
        assert_eq!(sequencer.pending(), 0);
    }

    #[test]
    fn test_released_frame_is_not_released_twice() {
        let mut sequencer = FrameSequencer::new();
        for seq in [3, 1, 4, 2] {
            sequencer.push(seq, ());
        }
        assert_eq!(sequences(&sequencer.drain()), vec![1, 2, 3, 4]);

        assert!(!sequencer.push(2, ()));
        assert!(sequencer.drain().is_empty());
        assert_eq!(sequencer.discarded(), 1);
    }

    #[test]
    fn test_duplicate_pending_frame_is_dropped_on_drain() {
        let mut sequencer = FrameSequencer::new();
        sequencer.push(2, "first");
        sequencer.push(2, "second");
        sequencer.push(1, "one");

        let released = sequencer.drain();
        assert_eq!(sequences(&released), vec![1, 2]);
        assert_eq!(sequencer.discarded(), 1);
        assert_eq!(sequencer.pending(), 0);
    }

    #[test]
    fn test_pass_through_keeps_arrival_order() {
        let mut reorderer = PassThrough::new();
        reorderer.push(1, 'a');
        reorderer.push(2, 'b');
        assert_eq!(reorderer.drain(), vec![(1, 'a'), (2, 'b')]);
        assert!(reorderer.drain().is_empty());
    }
}
