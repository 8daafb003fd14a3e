// Bounded outbound frame queue

use std::collections::VecDeque;
use tracing::warn;

/// FIFO of frames waiting for a ready transport.
///
/// Never rejects: at capacity the oldest fifth is dropped before admitting
/// the new frame.
#[derive(Debug)]
pub struct OutboundQueue {
    frames: VecDeque<String>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a frame; returns how many old frames were dropped to fit it
    pub fn enqueue(&mut self, frame: String) -> usize {
        let mut dropped = 0;
        if self.frames.len() >= self.capacity {
            dropped = self.trim_count().min(self.frames.len());
            self.frames.drain(..dropped);
            warn!(dropped, capacity = self.capacity, "outbound queue full, dropped oldest frames");
        }
        self.frames.push_back(frame);
        dropped
    }

    /// Take every queued frame in submission order
    pub fn drain(&mut self) -> Vec<String> {
        self.frames.drain(..).collect()
    }

    /// Put frames that could not be transmitted back at the front
    pub fn restore(&mut self, frames: Vec<String>) {
        for frame in frames.into_iter().rev() {
            self.frames.push_front(frame);
        }
        if self.frames.len() > self.capacity {
            let excess = self.frames.len() - self.capacity;
            self.frames.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn trim_count(&self) -> usize {
        (self.capacity / 5).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frames(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("f{}", i)).collect()
    }

    #[test]
    fn test_fifo_drain() {
        let mut queue = OutboundQueue::new(10);
        for frame in frames(0..3) {
            queue.enqueue(frame);
        }
        assert_eq!(queue.drain(), frames(0..3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest_fifth() {
        let mut queue = OutboundQueue::new(10);
        for frame in frames(0..10) {
            assert_eq!(queue.enqueue(frame), 0);
        }

        assert_eq!(queue.enqueue("f10".to_string()), 2);
        assert_eq!(queue.len(), 9);
        assert_eq!(queue.drain(), frames(2..11));
    }

    #[test]
    fn test_capacity_one_keeps_newest() {
        let mut queue = OutboundQueue::new(1);
        queue.enqueue("a".into());
        queue.enqueue("b".into());
        assert_eq!(queue.drain(), vec!["b".to_string()]);
    }

    #[test]
    fn test_restore_puts_frames_first() {
        let mut queue = OutboundQueue::new(4);
        queue.enqueue("late".into());
        queue.restore(vec!["a".into(), "b".into()]);
        assert_eq!(queue.drain(), vec!["a", "b", "late"]);
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity(capacity in 1usize..64, count in 0usize..300) {
            let mut queue = OutboundQueue::new(capacity);
            for i in 0..count {
                queue.enqueue(format!("f{}", i));
                prop_assert!(queue.len() <= capacity);
            }
            let drained = queue.drain();
            if count > 0 {
                prop_assert_eq!(drained.last().cloned(), Some(format!("f{}", count - 1)));
            }
            // survivors stay in submission order
            let indices: Vec<usize> = drained
                .iter()
                .map(|f| f[1..].parse::<usize>().unwrap())
                .collect();
            prop_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
