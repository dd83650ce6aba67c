//! Consecutive-frame debouncing of the drowsiness signal

/// Counts consecutive drowsy frames. The alert is derived: it holds while
/// the count exceeds the threshold and drops on the first clean frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HysteresisCounter {
    count: u32,
    threshold: u32,
}

impl HysteresisCounter {
    pub fn new(threshold: u32) -> Self {
        Self { count: 0, threshold }
    }

    /// Feed one frame's raw signal and return the debounced alert
    pub fn update(&mut self, drowsy: bool) -> bool {
        if drowsy {
            self.count = self.count.saturating_add(1);
        } else {
            self.count = 0;
        }
        self.is_alert()
    }

    pub fn is_alert(&self) -> bool {
        self.count > self.threshold
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}
