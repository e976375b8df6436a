//! Sequence-window reordering for inbound media frames (spec §4.5:
//! "frames may arrive out of order within a small window; the pump
//! reorders rather than dropping them outright").

use std::collections::BTreeMap;

/// Buffers frames that arrive ahead of the next expected sequence
/// number, releasing them in order as gaps fill in. If the window
/// overflows (a frame is missing and never arrives), the buffer forces
/// progress by jumping ahead to the lowest buffered sequence rather
/// than stalling the pump forever.
pub struct ReorderBuffer<T> {
    expected: u64,
    window: usize,
    buffered: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    pub fn new(start_seq: u64, window: usize) -> Self {
        Self { expected: start_seq, window, buffered: BTreeMap::new() }
    }

    /// Admit a frame at `seq`. Returns any frames now ready for
    /// processing, in sequence order. Late/duplicate frames (seq below
    /// what's already been released) are dropped silently.
    pub fn push(&mut self, seq: u64, frame: T) -> Vec<(u64, T)> {
        if seq < self.expected {
            return Vec::new();
        }
        self.buffered.insert(seq, frame);

        if self.buffered.len() > self.window {
            if let Some((&lowest, _)) = self.buffered.iter().next() {
                self.expected = lowest;
            }
        }

        let mut ready = Vec::new();
        while let Some(frame) = self.buffered.remove(&self.expected) {
            ready.push((self.expected, frame));
            self.expected += 1;
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_frames_in_order_once_gap_fills() {
        let mut buf = ReorderBuffer::new(0, 8);
        assert!(buf.push(1, "b").is_empty());
        assert!(buf.push(2, "c").is_empty());
        let ready = buf.push(0, "a");
        assert_eq!(ready, vec![(0, "a"), (1, "b"), (2, "c")]);
    }

    #[test]
    fn drops_late_duplicate_frames() {
        let mut buf = ReorderBuffer::new(0, 8);
        assert_eq!(buf.push(0, "a"), vec![(0, "a")]);
        assert!(buf.push(0, "dup").is_empty());
    }

    #[test]
    fn forces_progress_when_window_overflows() {
        let mut buf = ReorderBuffer::new(0, 2);
        buf.push(5, "f");
        buf.push(6, "g");
        // third out-of-order arrival overflows the window; buffer jumps
        // expected forward to the lowest held sequence instead of
        // waiting on frame 0 forever.
        let ready = buf.push(7, "h");
        assert_eq!(ready, vec![(5, "f"), (6, "g"), (7, "h")]);
    }
}
