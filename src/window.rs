use std::collections::VecDeque;

/// Fixed-capacity FIFO over one signal. Once at capacity the oldest value is
/// evicted before a new one is admitted, so len never exceeds capacity.
///
/// Sums are recomputed on each call rather than maintained incrementally; the
/// windows are small and recomputation cannot accumulate floating-point drift.
#[derive(Clone, Debug)]
pub struct SlidingWindow {
    buf: VecDeque<f64>,
    capacity: usize,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(value);
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn sum(&self) -> f64 {
        self.buf.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        if self.buf.is_empty() {
            0.0
        } else {
            self.sum() / self.buf.len() as f64
        }
    }
}
