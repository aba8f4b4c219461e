use super::constants::{TIME_TAG_ROLLOVER, TRIGGER_TIME_TAG_MASK};

/// Resolves the digitizer's wrapping trigger time tag into a monotonic 64-bit timestamp.
///
/// The time tag is a 31-bit counter (bit 31 is the rollover flag and is masked off). Whenever a
/// resolved timestamp would be earlier than the previous one, a full rollover period is added to
/// the running offset. Timestamps are in nanoseconds: counter ticks times the sample period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampUnwrapper {
    sample_period_ns: u64,
    offset: u64,
    previous: u64,
}

impl TimestampUnwrapper {
    pub fn new(sample_period_ns: u64) -> Self {
        Self {
            sample_period_ns,
            offset: 0,
            previous: 0,
        }
    }

    /// Forget all rollover history. Called at every acquisition start
    pub fn reset(&mut self) {
        self.offset = 0;
        self.previous = 0;
    }

    /// Resolve the next raw time tag
    pub fn resolve(&mut self, raw_time_tag: u32) -> u64 {
        let tag = (raw_time_tag & TRIGGER_TIME_TAG_MASK) as u64;
        let mut timestamp = (tag + self.offset) * self.sample_period_ns;
        if timestamp < self.previous {
            timestamp += TIME_TAG_ROLLOVER * self.sample_period_ns;
            self.offset += TIME_TAG_ROLLOVER;
        }
        self.previous = timestamp;
        timestamp
    }

    /// Number of rollovers seen since the last reset
    pub fn rollovers(&self) -> u64 {
        self.offset / TIME_TAG_ROLLOVER
    }
}
