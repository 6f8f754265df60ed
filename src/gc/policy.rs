//! Object-count growth policy shared by every collector.

/// Default initial object threshold.
pub const DEFAULT_INITIAL_THRESHOLD: usize = 8;
/// Default threshold ceiling.
pub const DEFAULT_MAX_THRESHOLD: usize = 1024;

/// Tracks `maxobj`, the object count that triggers the next collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthPolicy {
    ceiling: usize,
    threshold: usize,
}

impl GrowthPolicy {
    pub fn new(initial: usize, ceiling: usize) -> Self {
        debug_assert!(initial <= ceiling);
        Self {
            ceiling,
            threshold: initial,
        }
    }

    /// Current threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether creating one more object requires a collection first.
    pub fn should_collect(&self, objcnt: usize) -> bool {
        objcnt >= self.threshold
    }

    /// Recompute the threshold from the number of survivors. There is no
    /// floor: an empty heap collects again on its next allocation.
    pub fn update(&mut self, survivors: usize) {
        self.threshold = survivors.saturating_mul(2).min(self.ceiling);
    }
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_THRESHOLD, DEFAULT_MAX_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_doubles_survivors() {
        let mut policy = GrowthPolicy::default();
        assert_eq!(policy.threshold(), 8);
        assert!(!policy.should_collect(7));
        assert!(policy.should_collect(8));

        policy.update(8);
        assert_eq!(policy.threshold(), 16);
    }

    #[test]
    fn test_threshold_clamped() {
        let mut policy = GrowthPolicy::new(8, 100);
        policy.update(2);
        assert_eq!(policy.threshold(), 4);
        policy.update(0);
        assert_eq!(policy.threshold(), 0);
        assert!(policy.should_collect(0));
        policy.update(60);
        assert_eq!(policy.threshold(), 100);
        policy.update(usize::MAX);
        assert_eq!(policy.threshold(), 100);
    }
}
