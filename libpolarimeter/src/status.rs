use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

use super::asymmetry::YieldResult;
use super::hit_queue::QueueCounters;

/// Lifecycle state of the pipeline scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipelineState {
    #[default]
    Idle,
    Configuring,
    Running,
    Stopping,
}

impl Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Configuring => "configuring",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        write!(f, "{name}")
    }
}

/// Conditions under which a hit (or one plane of it) is left out of the histograms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataQualityCondition {
    /// A role's waveform was absent from the hit
    MissingChannel,
    /// The pulse never crossed the CFD level
    NoCrossing,
    /// Long-gate charge was zero so no pulse-shape ratio exists
    ZeroLongCharge,
    /// Time of flight was non-positive or not a number
    TimingAnomaly,
}

impl DataQualityCondition {
    pub const ALL: [DataQualityCondition; 4] = [
        Self::MissingChannel,
        Self::NoCrossing,
        Self::ZeroLongCharge,
        Self::TimingAnomaly,
    ];

    fn index(&self) -> usize {
        match self {
            Self::MissingChannel => 0,
            Self::NoCrossing => 1,
            Self::ZeroLongCharge => 2,
            Self::TimingAnomaly => 3,
        }
    }
}

impl Display for DataQualityCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MissingChannel => "missing channel",
            Self::NoCrossing => "no CFD crossing",
            Self::ZeroLongCharge => "zero long-gate charge",
            Self::TimingAnomaly => "timing anomaly",
        };
        write!(f, "{name}")
    }
}

/// Counters shared by the pipeline tasks of one run.
///
/// Every counter only grows. A new run starts from a fresh set of counters.
#[derive(Debug, Default)]
pub struct RunCounters {
    comm_errors: AtomicU64,
    hits_processed: AtomicU64,
    quality: [AtomicU64; 4],
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_comm_error(&self) {
        self.comm_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_hit_processed(&self) {
        self.hits_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_quality(&self, condition: DataQualityCondition) {
        self.quality[condition.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn comm_errors(&self) -> u64 {
        self.comm_errors.load(Ordering::Relaxed)
    }

    pub fn hits_processed(&self) -> u64 {
        self.hits_processed.load(Ordering::Relaxed)
    }

    pub fn quality_count(&self, condition: DataQualityCondition) -> u64 {
        self.quality[condition.index()].load(Ordering::Relaxed)
    }

}

/// Point-in-time view of the pipeline, meant for display and health checks
#[derive(Debug, Clone, Default)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub queue: QueueCounters,
    pub queued_bytes: usize,
    pub comm_errors: u64,
    pub hits_processed: u64,
    pub missing_channel: u64,
    pub no_crossing: u64,
    pub zero_long_charge: u64,
    pub timing_anomaly: u64,
    pub publications: u64,
    pub latest_result: Option<YieldResult>,
    pub fault: bool,
}

impl PipelineStatus {
    /// Fill the per-run counters from the shared counters
    pub fn with_counters(mut self, counters: &RunCounters) -> Self {
        self.comm_errors = counters.comm_errors();
        self.hits_processed = counters.hits_processed();
        self.missing_channel = counters.quality_count(DataQualityCondition::MissingChannel);
        self.no_crossing = counters.quality_count(DataQualityCondition::NoCrossing);
        self.zero_long_charge = counters.quality_count(DataQualityCondition::ZeroLongCharge);
        self.timing_anomaly = counters.quality_count(DataQualityCondition::TimingAnomaly);
        self
    }

    /// One line summary for the progress display
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} | hits {} | queued {} ({}) | dropped {} | comm errors {}",
            self.state,
            self.hits_processed,
            self.queue.queued,
            human_bytes::human_bytes(self.queued_bytes as f64),
            self.queue.dropped,
            self.comm_errors,
        );
        if let Some(result) = &self.latest_result {
            line.push_str(&format!(
                " | yields in {:.0} out1 {:.0} out2 {:.0}",
                result.in_yield, result.out1_yield, result.out2_yield
            ));
        }
        line
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let counters = RunCounters::new();
        counters.note_comm_error();
        counters.note_hit_processed();
        counters.note_hit_processed();
        counters.note_quality(DataQualityCondition::NoCrossing);
        let status = PipelineStatus::default().with_counters(&counters);
        assert_eq!(status.comm_errors, 1);
        assert_eq!(status.hits_processed, 2);
        assert_eq!(status.no_crossing, 1);
        assert_eq!(status.missing_channel, 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Running.to_string(), "running");
        assert_eq!(PipelineState::default(), PipelineState::Idle);
    }
}
