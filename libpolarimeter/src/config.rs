use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::asymmetry::RegionOfInterest;
use super::channel_roles::ChannelRoles;
use super::constants::*;
use super::error::{ConfigError, ConfigurationError};
use super::histogram::HistogramBinning;
use super::hit_queue::OverflowPolicy;

/// Edge of the pulse which fires the digitizer self-trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolarity {
    Rising,
    Falling,
}

/// How to reach the digitizer.
///
/// `Simulated` and `Replay` are served in-process; the hardware links need an external
/// driver implementing [`crate::driver::DigitizerDriver`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionDescriptor {
    Usb { link: u32 },
    OpticalLink { link: u32, node: u32, vme_address: u32 },
    Simulated,
    Replay { trace_path: PathBuf },
}

impl ConnectionDescriptor {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Usb { .. } => "usb",
            Self::OpticalLink { .. } => "optical_link",
            Self::Simulated => "simulated",
            Self::Replay { .. } => "replay",
        }
    }

    /// The node number doubles as the module id stamped on each hit
    pub fn module_id(&self) -> u16 {
        match self {
            Self::OpticalLink { node, .. } => *node as u16,
            _ => 0,
        }
    }
}

/// Acquisition parameters of a run. Loaded once before the run and never changed while running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionParameters {
    pub dc_offset: f64,
    pub threshold: u16,
    pub cfd_threshold: u16,
    pub in_channel: u16,
    pub out_channel_1: u16,
    pub out_channel_2: u16,
    pub beam_channel: u16,
    pub short_gate: u16,
    pub long_gate: u16,
    pub record_length: u32,
    pub block_event_count: u32,
    pub trigger_polarity: TriggerPolarity,
    pub post_trigger_size_percent: u8,
}

impl Default for AcquisitionParameters {
    fn default() -> Self {
        Self {
            dc_offset: 0.2,
            threshold: 500,
            cfd_threshold: 50,
            in_channel: 0,
            out_channel_1: 1,
            out_channel_2: 2,
            beam_channel: 3,
            short_gate: 30,
            long_gate: 300,
            record_length: 256,
            block_event_count: 1024,
            trigger_polarity: TriggerPolarity::Falling,
            post_trigger_size_percent: 80,
        }
    }
}

impl AcquisitionParameters {
    pub fn channel_roles(&self) -> ChannelRoles {
        ChannelRoles::new(
            self.in_channel,
            self.out_channel_1,
            self.out_channel_2,
            self.beam_channel,
        )
    }

    /// Number of samples recorded before the trigger position
    pub fn pre_trigger_samples(&self) -> usize {
        let post = self.post_trigger_size_percent.min(100) as usize;
        self.record_length as usize * (100 - post) / 100
    }

    /// CFD fraction of the local pulse peak
    pub fn cfd_fraction(&self) -> f64 {
        self.cfd_threshold as f64 / 100.0
    }

    /// Check the parameters against a board with `n_channels` channels
    pub fn validate(&self, n_channels: u32) -> Result<(), ConfigurationError> {
        self.channel_roles().validate(n_channels)?;
        if !(0.0..=1.0).contains(&self.dc_offset) {
            return Err(ConfigurationError::BadDcOffset(self.dc_offset));
        }
        if self.post_trigger_size_percent > 100 {
            return Err(ConfigurationError::BadPostTriggerSize(
                self.post_trigger_size_percent,
            ));
        }
        if self.record_length == 0 {
            return Err(ConfigurationError::ZeroRecordLength);
        }
        if self.block_event_count == 0 {
            return Err(ConfigurationError::ZeroBlockEvents);
        }
        if self.short_gate == 0 || self.short_gate > self.long_gate {
            return Err(ConfigurationError::BadGates {
                short: self.short_gate,
                long: self.long_gate,
            });
        }
        if self.cfd_threshold == 0 || self.cfd_threshold > 100 {
            return Err(ConfigurationError::BadCfdThreshold(self.cfd_threshold));
        }
        Ok(())
    }
}

/// Settings of the pulse analysis and the PS vs TOF histograms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub beam_threshold: u16,
    pub time_offsets: [f64; NUMBER_OF_PLANES],
    pub binning: HistogramBinning,
    pub roi: RegionOfInterest,
}

impl AnalysisSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.binning.is_valid() {
            return Err(ConfigurationError::BadBinning);
        }
        if self.roi.tof_min > self.roi.tof_max || self.roi.ps_min > self.roi.ps_max {
            return Err(ConfigurationError::EmptyRegionOfInterest);
        }
        Ok(())
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        let binning = HistogramBinning::default();
        Self {
            beam_threshold: 500,
            time_offsets: [
                DEFAULT_IN_PLANE_TIME_OFFSET,
                DEFAULT_OUT_PLANE_TIME_OFFSET,
                DEFAULT_OUT_PLANE_TIME_OFFSET,
            ],
            roi: RegionOfInterest::covering(&binning),
            binning,
        }
    }
}

/// Settings of the acquisition/analysis threads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub interval_secs: u64,
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub poll_delay_ms: u64,
    pub comm_retry_delay_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            queue_capacity: 65_536,
            overflow_policy: OverflowPolicy::DropOldest,
            poll_delay_ms: 1,
            comm_retry_delay_ms: 10,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.queue_capacity == 0 {
            return Err(ConfigurationError::ZeroQueueCapacity);
        }
        if self.interval_secs == 0 {
            return Err(ConfigurationError::ZeroInterval);
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    pub fn comm_retry_delay(&self) -> Duration {
        Duration::from_millis(self.comm_retry_delay_ms)
    }
}

/// Structure representing the application configuration.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub connection: ConnectionDescriptor,
    pub acquisition: AcquisitionParameters,
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub results_path: Option<PathBuf>,
}

impl Default for Config {
    /// A runnable configuration against the simulated digitizer
    fn default() -> Self {
        Self {
            connection: ConnectionDescriptor::Simulated,
            acquisition: AcquisitionParameters::default(),
            analysis: AnalysisSettings::default(),
            pipeline: PipelineSettings::default(),
            results_path: None,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file, replacing any existing file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.acquisition.validate(16).is_ok());
        assert_eq!(config.acquisition.pre_trigger_samples(), 51);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let mut config = Config::default();
        config.connection = ConnectionDescriptor::Replay {
            trace_path: PathBuf::from("/data/wave11.pwav"),
        };
        config.acquisition.trigger_polarity = TriggerPolarity::Rising;
        config.results_path = Some(PathBuf::from("/data/results.jsonl"));
        config.write_config_file(&path).unwrap();
        let read = Config::read_config_file(&path).unwrap();
        assert_eq!(config, read);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
connection:
  kind: usb
  link: 0
acquisition:
  dc_offset: 0.2
  threshold: 400
  cfd_threshold: 30
  in_channel: 4
  out_channel_1: 5
  out_channel_2: 6
  beam_channel: 7
  short_gate: 20
  long_gate: 200
  record_length: 512
  block_event_count: 512
  trigger_polarity: falling
  post_trigger_size_percent: 80
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.connection, ConnectionDescriptor::Usb { link: 0 });
        assert_eq!(config.acquisition.channel_roles().beam, 7);
        assert_eq!(config.pipeline, PipelineSettings::default());
        assert_eq!(config.results_path, None);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::read_config_file(Path::new("/definitely/not/here.yml"));
        assert!(matches!(result, Err(ConfigError::BadFilePath(_))));
    }

    #[test]
    fn test_bad_analysis_settings() {
        let mut analysis = AnalysisSettings::default();
        assert!(analysis.validate().is_ok());
        analysis.roi.ps_min = 0.8;
        analysis.roi.ps_max = 0.2;
        assert!(matches!(
            analysis.validate(),
            Err(ConfigurationError::EmptyRegionOfInterest)
        ));
        analysis.binning.tof_bins = 0;
        assert!(matches!(
            analysis.validate(),
            Err(ConfigurationError::BadBinning)
        ));
        let pipeline = PipelineSettings {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            pipeline.validate(),
            Err(ConfigurationError::ZeroQueueCapacity)
        ));
    }

    #[test]
    fn test_bad_gates() {
        let params = AcquisitionParameters {
            short_gate: 400,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(16),
            Err(ConfigurationError::BadGates { .. })
        ));
    }
}
