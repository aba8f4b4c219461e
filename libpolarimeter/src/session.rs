use super::board::{BoardInfo, FirmwareCode};
use super::channel_roles::{ChannelRoles, Plane, Role};
use super::config::{AcquisitionParameters, ConnectionDescriptor};
use super::decode::{BlockDecoder, RawEvent};
use super::driver::DigitizerDriver;
use super::error::{CommError, ConfigurationError, ConnectionError, DecodeError, SessionError};
use super::hit::HitData;
use super::replay::ReplaySession;
use super::settings::DigitizerSettings;
use super::simulator::SimulatedDigitizer;
use super::timestamp::TimestampUnwrapper;

/// HardwareSession is a source of hits: a digitizer, or anything that behaves like one.
///
/// The lifecycle is `configure` -> `start` -> `pull_hits`... -> `stop`. A session can be
/// reconfigured and restarted after a stop. `stop` must be idempotent.
pub trait HardwareSession: Send {
    fn board_info(&self) -> &BoardInfo;

    /// Apply the acquisition parameters. Must be called before `start`
    fn configure(&mut self, params: &AcquisitionParameters) -> Result<(), ConfigurationError>;

    /// Arm the acquisition. Resets the timestamp rollover tracking
    fn start(&mut self) -> Result<(), SessionError>;

    /// Read one block transfer worth of hits. Malformed events are logged and skipped;
    /// a transport failure is a CommError and the caller should retry after a short delay.
    fn pull_hits(&mut self) -> Result<Vec<HitData>, CommError>;

    /// Disarm the acquisition. Calling stop on a stopped session does nothing
    fn stop(&mut self) -> Result<(), SessionError>;

    fn is_running(&self) -> bool;
}

impl<S: HardwareSession + ?Sized> HardwareSession for Box<S> {
    fn board_info(&self) -> &BoardInfo {
        (**self).board_info()
    }
    fn configure(&mut self, params: &AcquisitionParameters) -> Result<(), ConfigurationError> {
        (**self).configure(params)
    }
    fn start(&mut self) -> Result<(), SessionError> {
        (**self).start()
    }
    fn pull_hits(&mut self) -> Result<Vec<HitData>, CommError> {
        (**self).pull_hits()
    }
    fn stop(&mut self) -> Result<(), SessionError> {
        (**self).stop()
    }
    fn is_running(&self) -> bool {
        (**self).is_running()
    }
}

/// Open the session described by the connection.
///
/// Simulated and replay connections are served in-process. Hardware links need a driver,
/// see [`open_session_with_driver`].
pub fn open_session(
    connection: &ConnectionDescriptor,
) -> Result<Box<dyn HardwareSession>, ConnectionError> {
    match connection {
        ConnectionDescriptor::Simulated => Ok(Box::new(WaveRecordSession::open(
            SimulatedDigitizer::default(),
            connection,
        )?)),
        ConnectionDescriptor::Replay { trace_path } => {
            Ok(Box::new(ReplaySession::open(trace_path)?))
        }
        ConnectionDescriptor::Usb { .. } | ConnectionDescriptor::OpticalLink { .. } => {
            Err(ConnectionError::NoDriver(connection.kind().to_string()))
        }
    }
}

/// Open a waveform-record session on a hardware link through an external driver
pub fn open_session_with_driver(
    driver: Box<dyn DigitizerDriver>,
    connection: &ConnectionDescriptor,
) -> Result<Box<dyn HardwareSession>, ConnectionError> {
    Ok(Box::new(WaveRecordSession::open(driver, connection)?))
}

#[derive(Debug, Clone)]
struct ActiveConfiguration {
    roles: ChannelRoles,
    record_length: usize,
}

/// WaveRecordSession reads raw waveforms from a digitizer running the standard firmware
#[derive(Debug)]
pub struct WaveRecordSession<D: DigitizerDriver> {
    driver: D,
    board: BoardInfo,
    module: u16,
    configuration: Option<ActiveConfiguration>,
    buffer_size: usize,
    buffer: Vec<u8>,
    unwrapper: TimestampUnwrapper,
    is_running: bool,
    decode_errors: u64,
}

impl<D: DigitizerDriver> WaveRecordSession<D> {
    /// Open the link, identify the board and reset it
    pub fn open(mut driver: D, connection: &ConnectionDescriptor) -> Result<Self, ConnectionError> {
        driver.open(connection)?;
        let board = match Self::identify(&mut driver) {
            Ok(board) => board,
            Err(e) => {
                if let Err(close_err) = driver.close() {
                    log::warn!("Failed to close digitizer after a failed open: {close_err}");
                }
                return Err(e);
            }
        };
        board.log_summary();

        Ok(Self {
            driver,
            unwrapper: TimestampUnwrapper::new(board.sample_period_ns),
            board,
            module: connection.module_id(),
            configuration: None,
            buffer_size: 0,
            buffer: Vec::new(),
            is_running: false,
            decode_errors: 0,
        })
    }

    fn identify(driver: &mut D) -> Result<BoardInfo, ConnectionError> {
        let board = BoardInfo::identify(&driver.board_info()?)?;
        if board.firmware != FirmwareCode::Standard {
            return Err(ConnectionError::UnsupportedFirmware(board.firmware.to_string()));
        }
        driver.reset()?;
        Ok(board)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Events dropped by the decoder since the session was opened
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    fn apply(
        &mut self,
        settings: &DigitizerSettings,
        roles: &ChannelRoles,
    ) -> Result<(), ConfigurationError> {
        self.driver.set_channel_enable_mask(settings.enable_mask)?;
        self.driver.set_record_length(settings.record_length)?;
        self.driver.set_post_trigger_size(settings.post_trigger_size_percent)?;
        self.driver.set_max_events_per_block(settings.block_event_count)?;
        for role in Role::ALL {
            let channel = roles.channel(role) as u32;
            self.driver.set_channel_dc_offset(channel, settings.dc_offset_dac)?;
            self.driver.set_trigger_polarity(channel, settings.polarity)?;
        }
        for plane in Plane::ALL {
            let channel = roles.channel(plane.role()) as u32;
            self.driver.set_channel_trigger_threshold(channel, settings.threshold_adc)?;
        }
        self.driver.set_self_trigger(settings.trigger_mask)?;
        Ok(())
    }
}

/// Build a hit from a decoded event, checking every role waveform against the record length
fn build_hit(
    event: &RawEvent,
    configuration: &ActiveConfiguration,
    module: u16,
    unwrapper: &mut TimestampUnwrapper,
) -> Result<HitData, DecodeError> {
    let mut waveforms: Vec<(Role, Vec<u16>)> = Vec::with_capacity(Role::ALL.len());
    for role in Role::ALL {
        let channel = configuration.roles.channel(role) as u32;
        let Some(samples) = event.samples(channel) else {
            continue;
        };
        let expected = configuration.record_length;
        // Odd record lengths are padded to a whole word
        let fits = samples.len() == expected || (expected % 2 == 1 && samples.len() == expected + 1);
        if !fits {
            return Err(DecodeError::RecordLengthMismatch {
                channel,
                samples: samples.len(),
                expected,
            });
        }
        waveforms.push((role, samples[..expected].to_vec()));
    }

    let timestamp = unwrapper.resolve(event.trigger_time_tag);
    Ok(waveforms
        .into_iter()
        .fold(HitData::new(module, timestamp), |hit, (role, samples)| {
            hit.with_samples(role, samples)
        }))
}

impl<D: DigitizerDriver> HardwareSession for WaveRecordSession<D> {
    fn board_info(&self) -> &BoardInfo {
        &self.board
    }

    fn configure(&mut self, params: &AcquisitionParameters) -> Result<(), ConfigurationError> {
        if self.is_running {
            if let Err(e) = self.stop() {
                log::warn!("Failed to stop acquisition before reconfiguring: {e}");
            }
        }
        self.configuration = None;

        let settings = DigitizerSettings::derive(params, &self.board)?;
        let roles = params.channel_roles();
        self.apply(&settings, &roles)?;
        self.buffer_size = self.driver.allocate_readout_buffer()?;

        if self.board.needs_calibration() {
            if let Err(e) = self.driver.calibrate() {
                log::warn!("ADC calibration failed, continuing uncalibrated: {e}");
            }
        }

        log::info!(
            "Digitizer configured: enable mask {:#06b}, trigger mask {:#06b}, DC offset DAC {}, threshold {} ADC, {} samples per record, readout buffer {}",
            settings.enable_mask,
            settings.trigger_mask,
            settings.dc_offset_dac,
            settings.threshold_adc,
            settings.record_length,
            human_bytes::human_bytes(self.buffer_size as f64)
        );
        self.configuration = Some(ActiveConfiguration {
            roles,
            record_length: settings.record_length as usize,
        });
        Ok(())
    }

    fn start(&mut self) -> Result<(), SessionError> {
        if self.configuration.is_none() {
            return Err(SessionError::NotConfigured);
        }
        if self.is_running {
            return Ok(());
        }
        self.buffer = Vec::with_capacity(self.buffer_size);
        self.unwrapper.reset();
        self.driver.start_acquisition()?;
        self.is_running = true;
        log::info!("Acquisition started");
        Ok(())
    }

    fn pull_hits(&mut self) -> Result<Vec<HitData>, CommError> {
        let Some(configuration) = &self.configuration else {
            return Err(CommError::NotRunning);
        };
        if !self.is_running {
            return Err(CommError::NotRunning);
        }
        self.driver.read_block(&mut self.buffer)?;

        let mut hits = Vec::new();
        for result in BlockDecoder::new(&self.buffer) {
            match result.and_then(|event| {
                build_hit(&event, configuration, self.module, &mut self.unwrapper)
            }) {
                Ok(hit) => hits.push(hit),
                Err(e) => {
                    self.decode_errors += 1;
                    log::warn!("Skipping event: {e}");
                }
            }
        }
        Ok(hits)
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        if !self.is_running {
            return Ok(());
        }
        self.is_running = false;
        self.buffer = Vec::new();
        self.driver.stop_acquisition()?;
        log::info!("Acquisition stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.is_running
    }
}

impl<D: DigitizerDriver> Drop for WaveRecordSession<D> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Failed to stop acquisition while closing the session: {e}");
        }
        if let Err(e) = self.driver.close() {
            log::error!("Failed to close the digitizer: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::RawBoardInfo;
    use crate::constants::TRIGGER_TIME_TAG_MASK;
    use crate::simulator::SimulationSettings;

    fn session(simulation: SimulationSettings) -> WaveRecordSession<SimulatedDigitizer> {
        WaveRecordSession::open(
            SimulatedDigitizer::new(simulation),
            &ConnectionDescriptor::Simulated,
        )
        .unwrap()
    }

    #[test]
    fn test_lifecycle() {
        let mut session = session(SimulationSettings {
            events_per_read: 8,
            ..Default::default()
        });
        assert_eq!(session.board_info().model, 725);
        assert!(matches!(session.start(), Err(SessionError::NotConfigured)));
        assert!(matches!(session.pull_hits(), Err(CommError::NotRunning)));

        session.configure(&AcquisitionParameters::default()).unwrap();
        let registers = session.driver().registers();
        assert_eq!(registers.enable_mask, 0b1111);
        assert_eq!(registers.self_trigger_mask, 0b0111);
        assert_eq!(registers.thresholds[..4], [12607, 12607, 12607, 0]);
        assert!(registers.calibrated);

        session.start().unwrap();
        assert!(session.driver().is_running());
        let hits = session.pull_hits().unwrap();
        assert_eq!(hits.len(), 8);
        for hit in &hits {
            for role in Role::ALL {
                assert_eq!(hit.samples(role).len(), 256);
            }
        }
        // 25000 ticks of 4 ns
        assert_eq!(hits[1].timestamp - hits[0].timestamp, 100_000);

        session.stop().unwrap();
        session.stop().unwrap();
        assert!(!session.driver().is_running());
        assert!(!session.is_running());
    }

    #[test]
    fn test_timestamps_unwrap_across_rollover() {
        let mut session = session(SimulationSettings {
            events_per_read: 64,
            start_time_tag: TRIGGER_TIME_TAG_MASK - 500_000,
            ..Default::default()
        });
        session.configure(&AcquisitionParameters::default()).unwrap();
        session.start().unwrap();
        let mut timestamps = Vec::new();
        for _ in 0..4 {
            timestamps.extend(session.pull_hits().unwrap().iter().map(|hit| hit.timestamp));
        }
        assert_eq!(timestamps.len(), 256);
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));

        // A restart resets the rollover tracking
        session.stop().unwrap();
        session.start().unwrap();
        let first = session.pull_hits().unwrap()[0].timestamp;
        assert!(first < *timestamps.last().unwrap());
    }

    #[test]
    fn test_comm_error_is_reported() {
        let mut session = session(SimulationSettings {
            fail_every: Some(2),
            ..Default::default()
        });
        session.configure(&AcquisitionParameters::default()).unwrap();
        session.start().unwrap();
        assert!(session.pull_hits().is_ok());
        assert!(matches!(session.pull_hits(), Err(CommError::Driver(_))));
        assert!(session.pull_hits().is_ok());
    }

    #[test]
    fn test_configuration_errors() {
        let mut session = session(SimulationSettings::default());
        let params = AcquisitionParameters {
            out_channel_2: 0,
            ..Default::default()
        };
        assert!(matches!(
            session.configure(&params),
            Err(ConfigurationError::DuplicateChannel { .. })
        ));
        assert!(matches!(session.start(), Err(SessionError::NotConfigured)));
    }

    #[test]
    fn test_unsupported_boards() {
        let dpp = RawBoardInfo {
            amc_firmware: String::from("136.12"),
            family_code: 11,
            channels: 16,
            ..Default::default()
        };
        let result = WaveRecordSession::open(
            SimulatedDigitizer::with_board(dpp, SimulationSettings::default()),
            &ConnectionDescriptor::Simulated,
        );
        assert!(matches!(result, Err(ConnectionError::UnsupportedFirmware(_))));

        assert!(matches!(
            open_session(&ConnectionDescriptor::Usb { link: 0 }),
            Err(ConnectionError::NoDriver(_))
        ));
    }

    #[test]
    fn test_record_length_mismatch_is_skipped() {
        let mut unwrapper = TimestampUnwrapper::new(4);
        let configuration = ActiveConfiguration {
            roles: ChannelRoles::default(),
            record_length: 8,
        };
        let event = RawEvent {
            channels: vec![(0, vec![1; 8]), (3, vec![1; 6])],
            ..Default::default()
        };
        assert!(matches!(
            build_hit(&event, &configuration, 0, &mut unwrapper),
            Err(DecodeError::RecordLengthMismatch {
                channel: 3,
                samples: 6,
                expected: 8
            })
        ));
        let partial = RawEvent {
            channels: vec![(0, vec![1; 8])],
            trigger_time_tag: 10,
            ..Default::default()
        };
        let hit = build_hit(&partial, &configuration, 2, &mut unwrapper).unwrap();
        assert_eq!(hit.module, 2);
        assert_eq!(hit.timestamp, 40);
        assert_eq!(hit.samples(Role::InPlane).len(), 8);
        assert!(hit.samples(Role::Beam).is_empty());
    }
}
