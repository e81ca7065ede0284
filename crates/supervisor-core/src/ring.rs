//! Bounded byte ring buffers for captured child output.

use std::collections::VecDeque;
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 64 * 1024;

/// A fixed-capacity byte buffer holding the most recent output of a stream.
/// Oldest bytes are overwritten once capacity is reached.
pub struct OutputRing {
    capacity: usize,
    buf: Mutex<VecDeque<u8>>,
}

impl OutputRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn append(&self, bytes: &[u8]) {
        let mut buf = self.buf.lock().expect("ring lock poisoned");
        if bytes.len() >= self.capacity {
            buf.clear();
            buf.extend(bytes[bytes.len() - self.capacity..].iter().copied());
            return;
        }
        let overflow = (buf.len() + bytes.len()).saturating_sub(self.capacity);
        for _ in 0..overflow {
            buf.pop_front();
        }
        buf.extend(bytes.iter().copied());
    }

    /// Returns a snapshot of the buffered bytes in order, oldest first.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.lock().expect("ring lock poisoned").iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.lock().expect("ring lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OutputRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// The pair of rings (stdout/stderr) owned by one descriptor.
#[derive(Default)]
pub struct OutputCapture {
    pub stdout: OutputRing,
    pub stderr: OutputRing,
}

impl OutputCapture {
    pub fn new(capacity: usize) -> Self {
        Self {
            stdout: OutputRing::new(capacity),
            stderr: OutputRing::new(capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_within_capacity_preserves_order() {
        let ring = OutputRing::new(16);
        ring.append(b"hello");
        ring.append(b" world");
        assert_eq!(ring.snapshot(), b"hello world");
    }

    #[test]
    fn append_beyond_capacity_drops_oldest() {
        let ring = OutputRing::new(5);
        ring.append(b"abcde");
        ring.append(b"fg");
        assert_eq!(ring.snapshot(), b"cdefg");
        assert_eq!(ring.len(), 5);
    }

    #[test]
    fn single_write_larger_than_capacity_keeps_tail() {
        let ring = OutputRing::new(4);
        ring.append(b"0123456789");
        assert_eq!(ring.snapshot(), b"6789");
    }

    #[test]
    fn empty_ring_reports_empty() {
        let ring = OutputRing::new(8);
        assert!(ring.is_empty());
    }
}
