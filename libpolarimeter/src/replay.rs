use std::path::Path;

use super::board::{BoardInfo, FirmwareCode};
use super::channel_roles::Role;
use super::config::AcquisitionParameters;
use super::constants::MAX_CHANNELS;
use super::error::{
    CommError, ConfigurationError, ConnectionError, SessionError, TraceFileError,
};
use super::hit::HitData;
use super::session::HardwareSession;
use super::trace_file::read_trace_file;

/// Hits handed out per pull
const REPLAY_BLOCK_HITS: usize = 64;

/// ReplaySession replays the hits of a trace file in a loop, standing in for a digitizer.
///
/// Every pass over the file shifts the timestamps by the span of the file plus one so they
/// keep increasing across passes.
#[derive(Debug)]
pub struct ReplaySession {
    board: BoardInfo,
    hits: Vec<HitData>,
    position: usize,
    pass_offset: u64,
    span: u64,
    block_hits: usize,
    max_passes: Option<u64>,
    passes: u64,
    configured: bool,
    is_running: bool,
}

impl ReplaySession {
    pub fn open(path: &Path) -> Result<Self, ConnectionError> {
        let hits = read_trace_file(path)?;
        let session = Self::from_hits(hits)?;
        log::info!(
            "Replaying {} hits from {}",
            session.hits.len(),
            path.display()
        );
        Ok(session)
    }

    pub fn from_hits(hits: Vec<HitData>) -> Result<Self, TraceFileError> {
        let (Some(first), Some(last)) = (hits.first(), hits.last()) else {
            return Err(TraceFileError::Empty);
        };
        let span = last.timestamp.saturating_sub(first.timestamp) + 1;
        Ok(Self {
            board: BoardInfo {
                model_name: String::from("trace replay"),
                model: 0,
                channels: MAX_CHANNELS,
                sample_period_ns: 1,
                adc_bits: 16,
                firmware: FirmwareCode::Standard,
                serial_number: 0,
            },
            hits,
            position: 0,
            pass_offset: 0,
            span,
            block_hits: REPLAY_BLOCK_HITS,
            max_passes: None,
            passes: 0,
            configured: false,
            is_running: false,
        })
    }

    /// Stop producing hits after this many passes over the file
    pub fn with_max_passes(mut self, passes: u64) -> Self {
        self.max_passes = Some(passes);
        self
    }

    pub fn with_block_hits(mut self, block_hits: usize) -> Self {
        self.block_hits = block_hits.max(1);
        self
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }
}

impl HardwareSession for ReplaySession {
    fn board_info(&self) -> &BoardInfo {
        &self.board
    }

    /// Validate the parameters, and check that every recorded waveform has the configured
    /// record length (or is missing, as a hardware readout would produce)
    fn configure(&mut self, params: &AcquisitionParameters) -> Result<(), ConfigurationError> {
        self.configured = false;
        params.validate(self.board.channels)?;
        let expected = params.record_length;
        for (hit, data) in self.hits.iter().enumerate() {
            for role in Role::ALL {
                let samples = data.samples(role).len();
                if samples != 0 && samples != expected as usize {
                    return Err(ConfigurationError::RecordLengthMismatch {
                        hit,
                        role,
                        samples,
                        expected,
                    });
                }
            }
        }
        self.configured = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), SessionError> {
        if !self.configured {
            return Err(SessionError::NotConfigured);
        }
        self.position = 0;
        self.pass_offset = 0;
        self.passes = 0;
        self.is_running = true;
        Ok(())
    }

    fn pull_hits(&mut self) -> Result<Vec<HitData>, CommError> {
        if !self.is_running {
            return Err(CommError::NotRunning);
        }
        let mut block = Vec::with_capacity(self.block_hits);
        while block.len() < self.block_hits {
            if self.max_passes.is_some_and(|max| self.passes >= max) {
                break;
            }
            let mut hit = self.hits[self.position].clone();
            hit.timestamp += self.pass_offset;
            block.push(hit);
            self.position += 1;
            if self.position == self.hits.len() {
                self.position = 0;
                self.pass_offset += self.span;
                self.passes += 1;
            }
        }
        Ok(block)
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        self.is_running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.is_running
    }
}
