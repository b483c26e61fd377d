//! Bounded in-memory scrollback.

mod shared;

pub use shared::SharedBuffer;

/// A fixed-capacity circular buffer of lines.
///
/// Appends are O(1) and overwrite the oldest entry once full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: Vec<T>,
    capacity: usize,
    /// Next slot to overwrite once the buffer is full.
    head: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity.min(4096)),
            capacity,
            head: 0,
        }
    }

    /// Append one entry, evicting the oldest if full.
    pub fn append(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.buf.len() < self.capacity {
            self.buf.push(item);
        } else {
            self.buf[self.head] = item;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// The most recent `n` entries, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<T> {
        let len = self.buf.len();
        let n = n.min(len);
        let mut out = Vec::with_capacity(n);
        for logical in (len - n)..len {
            out.push(self.buf[self.physical(logical)].clone());
        }
        out
    }

    fn physical(&self, logical: usize) -> usize {
        if self.buf.len() < self.capacity {
            logical
        } else {
            (self.head + logical) % self.capacity
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.head = 0;
    }
}
