use std::time::{Duration, Instant};

use crate::protocol::Detection;

/// Single slot holding the newest completed detection. Every write fully
/// replaces the previous value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResultCache {
    current: Detection,
}

impl ResultCache {
    pub fn get(&self) -> Detection {
        self.current
    }

    pub fn replace(&mut self, detection: Detection) {
        self.current = detection;
    }

    /// Back to SAFE with no point
    pub fn clear(&mut self) {
        self.current = Detection::default();
    }
}

/// Counts completed round trips per one-second window
#[derive(Debug, Clone)]
pub struct RateMeter {
    window: Duration,
    window_start: Option<Instant>,
    count: u32,
    last_rate: u32,
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RateMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            count: 0,
            last_rate: 0,
        }
    }

    pub fn record(&mut self, now: Instant) {
        let start = *self.window_start.get_or_insert(now);
        self.count += 1;
        if now.duration_since(start) >= self.window {
            self.last_rate = self.count;
            self.count = 0;
            self.window_start = Some(now);
        }
    }

    /// Count from the last completed window
    pub fn rate(&self) -> u32 {
        self.last_rate
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HazardState, Point};

    #[test]
    fn test_cache_last_write_wins() {
        let mut cache = ResultCache::default();
        assert_eq!(cache.get().state, HazardState::Safe);

        cache.replace(Detection::new(HazardState::Danger, Some(Point::new(1.0, 2.0))));
        cache.replace(Detection::new(HazardState::Warning, None));
        assert_eq!(cache.get(), Detection::new(HazardState::Warning, None));

        cache.clear();
        assert_eq!(cache.get(), Detection::default());
    }

    #[test]
    fn test_rate_meter_counts_per_window() {
        let t0 = Instant::now();
        let mut meter = RateMeter::default();
        for i in 0..12 {
            meter.record(t0 + Duration::from_millis(i * 100));
        }
        // the 11th record (t=1000ms) closes the first window
        assert_eq!(meter.rate(), 11);

        meter.reset();
        assert_eq!(meter.rate(), 0);
    }
}
