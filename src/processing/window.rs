//! Fixed-capacity cyclic sample window

use crate::types::{Axis, ThreeAxisReading};

/// Cyclic window of accelerometer samples
///
/// Length is always `capacity`. Slots that have never been written hold
/// zero, so metrics computed before the first wrap see a zero-padded window.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    slots: Vec<ThreeAxisReading>,
    next: usize,
    written: u64,
}

impl SampleWindow {
    /// Capacity must be non-zero; callers validate it beforehand.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![ThreeAxisReading::ZERO; capacity.max(1)],
            next: 0,
            written: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Total samples written since creation or the last `clear()`
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Overwrite the oldest slot and advance
    pub fn push(&mut self, sample: ThreeAxisReading) {
        self.slots[self.next] = sample;
        self.next = (self.next + 1) % self.slots.len();
        self.written = self.written.saturating_add(1);
    }

    /// Every slot has been written at least once
    pub fn is_full(&self) -> bool {
        self.written >= self.slots.len() as u64
    }

    /// At least half the capacity has been written, enough for a spectrum
    pub fn has_spectral_fill(&self) -> bool {
        self.written.saturating_mul(2) >= self.slots.len() as u64
    }

    /// The slot that will be overwritten by the next `push`
    pub fn oldest(&self) -> ThreeAxisReading {
        self.slots[self.next]
    }

    /// Zero all slots and reset fill tracking
    pub fn clear(&mut self) {
        self.slots.fill(ThreeAxisReading::ZERO);
        self.next = 0;
        self.written = 0;
    }

    /// Samples in chronological order, oldest first
    pub fn chronological(&self) -> impl Iterator<Item = &ThreeAxisReading> {
        self.slots[self.next..]
            .iter()
            .chain(self.slots[..self.next].iter())
    }

    /// One axis in chronological order
    pub fn axis_snapshot(&self, axis: Axis) -> Vec<f64> {
        self.chronological().map(|s| s.axis(axis)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(v: f64) -> ThreeAxisReading {
        ThreeAxisReading::new(v, -v, 2.0 * v)
    }

    #[test]
    fn test_zero_padded_before_fill() {
        let mut window = SampleWindow::new(4);
        window.push(sample(1.0));

        assert_eq!(window.capacity(), 4);
        assert!(!window.is_full());
        assert_eq!(window.axis_snapshot(Axis::X), vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_wrap_keeps_length_and_order() {
        let mut window = SampleWindow::new(3);
        for i in 1..=5 {
            window.push(sample(f64::from(i)));
        }

        assert_eq!(window.capacity(), 3);
        assert!(window.is_full());
        assert_eq!(window.written(), 5);
        assert_eq!(window.axis_snapshot(Axis::X), vec![3.0, 4.0, 5.0]);
        assert_eq!(window.axis_snapshot(Axis::Y), vec![-3.0, -4.0, -5.0]);
        assert_eq!(window.oldest(), sample(3.0));

        window.push(sample(6.0));
        assert_eq!(window.oldest(), sample(4.0));
    }

    #[test]
    fn test_spectral_fill_gate() {
        let mut window = SampleWindow::new(10);
        for i in 0..4 {
            window.push(sample(f64::from(i)));
        }
        assert!(!window.has_spectral_fill());

        window.push(sample(4.0));
        assert!(window.has_spectral_fill());
    }

    #[test]
    fn test_clear_resets() {
        let mut window = SampleWindow::new(2);
        window.push(sample(1.0));
        window.push(sample(2.0));
        window.clear();

        assert_eq!(window.written(), 0);
        assert!(!window.has_spectral_fill());
        assert_eq!(window.axis_snapshot(Axis::Z), vec![0.0, 0.0]);
    }
}
