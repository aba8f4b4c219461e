use std::path::PathBuf;
use thiserror::Error;

use super::channel_roles::Role;
use super::constants::*;
use super::status::PipelineState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("Digitizer driver call {call} failed with error code {code}")]
    Code { call: &'static str, code: i32 },
    #[error("Digitizer driver timed out during {0}")]
    Timeout(&'static str),
    #[error("Digitizer driver call {0} was made before the device was opened")]
    NotOpen(&'static str),
    #[error("Digitizer driver could not reach the device: {0}")]
    Link(String),
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Could not open the digitizer due to driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("Digitizer reported unsupported family code {0}")]
    UnsupportedFamily(u32),
    #[error("Digitizer runs {0} firmware, which the waveform session does not support")]
    UnsupportedFirmware(String),
    #[error("No digitizer driver is linked for {0} connections")]
    NoDriver(String),
    #[error("Could not open the replay source: {0}")]
    Trace(#[from] TraceFileError),
}

#[derive(Debug, Clone, Error)]
pub enum CommError {
    #[error("Readout failed due to driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("Readout was requested while acquisition is not running")]
    NotRunning,
}

#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    #[error("Channel {channel} is assigned to both the {first} and {second} roles")]
    DuplicateChannel {
        channel: u16,
        first: Role,
        second: Role,
    },
    #[error("Channel {channel} assigned to the {role} role does not exist; the digitizer has {n_channels} channels")]
    ChannelOutOfRange {
        channel: u16,
        role: Role,
        n_channels: u32,
    },
    #[error("DC offset {0} is outside of [0, 1]")]
    BadDcOffset(f64),
    #[error("Post trigger size {0}% is larger than 100%")]
    BadPostTriggerSize(u8),
    #[error("Record length must be non-zero")]
    ZeroRecordLength,
    #[error("Events per block transfer must be non-zero")]
    ZeroBlockEvents,
    #[error("Short gate {short} must be non-zero and no longer than the long gate {long}")]
    BadGates { short: u16, long: u16 },
    #[error("CFD threshold {0}% must be within 1-100%")]
    BadCfdThreshold(u16),
    #[error("Trigger threshold {threshold} does not fit the {bits}-bit ADC range at DC offset {offset}")]
    BadThreshold {
        threshold: u16,
        bits: u32,
        offset: f64,
    },
    #[error("Histogram binning needs at least one bin and max > min on both axes")]
    BadBinning,
    #[error("Yield region of interest is empty")]
    EmptyRegionOfInterest,
    #[error("Queue capacity must be non-zero")]
    ZeroQueueCapacity,
    #[error("Aggregation interval must be non-zero")]
    ZeroInterval,
    #[error("Recorded hit {hit} has {samples} {role} samples but the record length is {expected}")]
    RecordLengthMismatch {
        hit: usize,
        role: Role,
        samples: usize,
        expected: u32,
    },
    #[error("Digitizer rejected the configuration: {0}")]
    Driver(#[from] DriverError),
}

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("Acquisition cannot start before the session is configured")]
    NotConfigured,
    #[error("Acquisition start failed due to driver error: {0}")]
    Driver(#[from] DriverError),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Event at word {offset} has header marker {marker:#x}; expected {exp:#x}", exp=EVENT_HEADER_MARKER)]
    BadMarker { offset: usize, marker: u32 },
    #[error("Event at word {offset} declares {size} words but only {available} remain in the block")]
    Truncated {
        offset: usize,
        size: usize,
        available: usize,
    },
    #[error("Event at word {offset} declares {size} words, fewer than the {exp}-word header", exp=EVENT_HEADER_WORDS)]
    Undersized { offset: usize, size: usize },
    #[error("Event payload of {payload} words cannot be split among {channels} channels")]
    UnevenPayload { payload: usize, channels: u32 },
    #[error("Channel {channel} recorded {samples} samples; the configured record length is {expected}")]
    RecordLengthMismatch {
        channel: u32,
        samples: usize,
        expected: usize,
    },
    #[error("Event decode failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TraceFileError {
    #[error("Trace file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not open trace file {0:?} as it does not exist")]
    BadFilePath(PathBuf),
    #[error("Trace file does not start with the expected magic bytes")]
    BadMagic,
    #[error("Trace file version {0} is not supported; expected {exp}", exp=TRACE_FILE_VERSION)]
    UnsupportedVersion(u16),
    #[error("Trace file contains no hits")]
    Empty,
    #[error("Trace file declares {declared} hits but only has room for {max}")]
    BadHitCount { declared: u32, max: u64 },
    #[error("Trace file hit {hit} declares {count} samples; the limit is {max}", max=MAX_RECORD_LENGTH)]
    BadSampleCount { hit: usize, count: u32 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ResultStoreError {
    #[error("ResultStore failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("ResultStore failed to serialize a record: {0}")]
    SerializeError(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline cannot {action} while it is {state}")]
    InvalidState {
        action: &'static str,
        state: PipelineState,
    },
    #[error("Pipeline failed due to configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Pipeline failed due to session error: {0}")]
    Session(#[from] SessionError),
    #[error("Pipeline has no hardware session; it was lost when a previous run failed")]
    SessionLost,
    #[error("Pipeline {0} task panicked")]
    TaskPanicked(&'static str),
}
