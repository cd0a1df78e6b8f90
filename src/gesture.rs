//! Hidden multi-tap gesture that unlocks the note composer.

/// Counts taps and fires once the count already reached the threshold.
///
/// With a threshold of 3 the fourth tap unlocks, then counting starts over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapGate {
    threshold: u32,
    count: u32,
}

impl TapGate {
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self { threshold, count: 0 }
    }

    /// Register one tap. Returns `true` when this tap unlocks.
    pub fn tap(&mut self) -> bool {
        if self.count >= self.threshold {
            self.count = 0;
            return true;
        }
        self.count += 1;
        false
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }
}
