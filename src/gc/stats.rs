use std::time::Duration;

/// Collection statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Number of collections run
    pub collections: usize,
    /// Total objects reclaimed by collections
    pub objects_reclaimed: usize,
    /// Objects reclaimed by the most recent collection
    pub last_reclaimed: usize,
    /// Objects surviving the most recent collection
    pub last_survivors: usize,
    /// Total time spent collecting (microseconds)
    pub total_pause_us: u64,
    /// Maximum single collection pause (microseconds)
    pub max_pause_us: u64,
}

impl GcStats {
    /// Record one finished collection.
    pub fn record(&mut self, reclaimed: usize, survivors: usize, pause: Duration) {
        let pause_us = pause.as_micros() as u64;
        self.collections += 1;
        self.objects_reclaimed += reclaimed;
        self.last_reclaimed = reclaimed;
        self.last_survivors = survivors;
        self.total_pause_us += pause_us;
        self.max_pause_us = self.max_pause_us.max(pause_us);
    }

    /// Count objects reclaimed after their collection finished, such as by a
    /// sweep resumed on allocation.
    pub fn record_deferred(&mut self, reclaimed: usize) {
        self.objects_reclaimed += reclaimed;
        self.last_reclaimed += reclaimed;
    }

    /// Average pause per collection in microseconds.
    pub fn avg_pause_us(&self) -> u64 {
        if self.collections == 0 {
            0
        } else {
            self.total_pause_us / self.collections as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record() {
        let mut stats = GcStats::default();
        stats.record(3, 5, Duration::from_micros(10));
        stats.record(1, 4, Duration::from_micros(30));
        assert_eq!(stats.collections, 2);
        assert_eq!(stats.objects_reclaimed, 4);
        assert_eq!(stats.last_reclaimed, 1);
        assert_eq!(stats.last_survivors, 4);
        assert_eq!(stats.total_pause_us, 40);
        assert_eq!(stats.max_pause_us, 30);
        assert_eq!(stats.avg_pause_us(), 20);
    }

    #[test]
    fn test_record_deferred() {
        let mut stats = GcStats::default();
        stats.record(2, 5, Duration::from_micros(10));
        stats.record_deferred(3);
        assert_eq!(stats.collections, 1);
        assert_eq!(stats.objects_reclaimed, 5);
        assert_eq!(stats.last_reclaimed, 5);
        assert_eq!(stats.last_survivors, 5);
    }
}
