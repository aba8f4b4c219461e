use super::board::RawBoardInfo;
use super::config::{ConnectionDescriptor, TriggerPolarity};
use super::constants::TRIGGER_TIME_TAG_MASK;
use super::decode::encode_event;
use super::driver::DigitizerDriver;
use super::error::DriverError;
use super::settings::DigitizerSettings;

const INVALID_PARAMETER: i32 = -2;
const ROLLOVER_FLAG: u32 = 0x8000_0000;

/// Shape and rate of the simulated signals
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSettings {
    /// Events returned by each block transfer (capped by the max events per block)
    pub events_per_read: u32,
    /// Time tag ticks between consecutive triggers
    pub ticks_per_event: u32,
    /// Pulse amplitude in ADC counts
    pub amplitude: f64,
    /// Samples to reach the full amplitude
    pub rise_samples: f64,
    /// Exponential decay constant in samples
    pub decay_samples: f64,
    /// The beam reference pulse precedes the detector pulses by this many samples
    pub beam_lead_samples: usize,
    pub start_time_tag: u32,
    /// Stop producing events after this many. None runs forever
    pub max_events: Option<u64>,
    /// Every n-th block transfer times out
    pub fail_every: Option<u64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            events_per_read: 16,
            ticks_per_event: 25_000,
            amplitude: 2000.0,
            rise_samples: 2.0,
            decay_samples: 40.0,
            beam_lead_samples: 20,
            start_time_tag: 0,
            max_events: None,
            fail_every: None,
        }
    }
}

/// Register values written to the simulated board
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatedRegisters {
    pub enable_mask: u32,
    pub self_trigger_mask: u32,
    pub dc_offsets: Vec<u16>,
    pub thresholds: Vec<u16>,
    pub polarities: Vec<Option<TriggerPolarity>>,
    pub record_length: u32,
    pub post_trigger_percent: u8,
    pub max_events_per_block: u32,
    pub calibrated: bool,
}

/// SimulatedDigitizer is an in-process board running the standard waveform firmware.
///
/// Every trigger carries a clean pulse on each self-triggering channel and an earlier
/// reference pulse on every other enabled channel. The trigger time tag counts in 31 bits and
/// wraps, setting the rollover flag once it has wrapped.
#[derive(Debug, Clone)]
pub struct SimulatedDigitizer {
    info: RawBoardInfo,
    simulation: SimulationSettings,
    registers: SimulatedRegisters,
    is_open: bool,
    is_running: bool,
    time_tag: u32,
    has_wrapped: bool,
    events_emitted: u64,
    reads: u64,
}

impl Default for SimulatedDigitizer {
    fn default() -> Self {
        Self::new(SimulationSettings::default())
    }
}

impl SimulatedDigitizer {
    /// A simulated DT5725: 8 channels, 250 MS/s, 14 bits
    pub fn new(simulation: SimulationSettings) -> Self {
        let info = RawBoardInfo {
            model_name: String::from("DT5725"),
            model: 725,
            channels: 8,
            family_code: 14,
            roc_firmware: String::from("4.22 - Build 2020"),
            amc_firmware: String::from("0.4 - Build 7506"),
            serial_number: 1,
            adc_bits: 14,
        };
        Self::with_board(info, simulation)
    }

    pub fn with_board(info: RawBoardInfo, simulation: SimulationSettings) -> Self {
        let channels = info.channels as usize;
        Self {
            info,
            registers: SimulatedRegisters {
                dc_offsets: vec![0; channels],
                thresholds: vec![0; channels],
                polarities: vec![None; channels],
                max_events_per_block: 1,
                ..Default::default()
            },
            time_tag: simulation.start_time_tag & TRIGGER_TIME_TAG_MASK,
            simulation,
            is_open: false,
            is_running: false,
            has_wrapped: false,
            events_emitted: 0,
            reads: 0,
        }
    }

    pub fn registers(&self) -> &SimulatedRegisters {
        &self.registers
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    fn check_open(&self, call: &'static str) -> Result<(), DriverError> {
        if self.is_open {
            Ok(())
        } else {
            Err(DriverError::NotOpen(call))
        }
    }

    fn check_channel(&self, call: &'static str, channel: u32) -> Result<usize, DriverError> {
        self.check_open(call)?;
        if channel >= self.info.channels {
            return Err(DriverError::Code {
                call,
                code: INVALID_PARAMETER,
            });
        }
        Ok(channel as usize)
    }

    /// Pulse height at `k` samples after the pulse start
    fn pulse_shape(&self, k: f64) -> f64 {
        let rise = (k + 1.0) / self.simulation.rise_samples.max(1.0);
        self.simulation.amplitude * rise.min(1.0) * (-k / self.simulation.decay_samples).exp()
    }

    fn waveform(&self, channel: usize, start: usize) -> Vec<u16> {
        let full_scale = (1u64 << self.info.adc_bits) as f64;
        let baseline =
            DigitizerSettings::baseline_adc(self.registers.dc_offsets[channel], self.info.adc_bits);
        let sign = match self.registers.polarities[channel] {
            Some(TriggerPolarity::Rising) => 1.0,
            _ => -1.0,
        };
        (0..self.registers.record_length as usize)
            .map(|i| {
                let pulse = if i >= start {
                    self.pulse_shape((i - start) as f64)
                } else {
                    0.0
                };
                (baseline + sign * pulse).round().clamp(0.0, full_scale - 1.0) as u16
            })
            .collect()
    }

    fn next_event(&mut self) -> Vec<u8> {
        let record_length = self.registers.record_length as usize;
        let post = self.registers.post_trigger_percent.min(100) as usize;
        let trigger_position = record_length * (100 - post) / 100;
        let beam_position = trigger_position.saturating_sub(self.simulation.beam_lead_samples);

        let mut channels: Vec<(u32, Vec<u16>)> = Vec::new();
        for channel in 0..self.info.channels {
            let bit = 1 << channel;
            if self.registers.enable_mask & bit == 0 {
                continue;
            }
            let start = if self.registers.self_trigger_mask & bit != 0 {
                trigger_position
            } else {
                beam_position
            };
            channels.push((channel, self.waveform(channel as usize, start)));
        }
        let refs: Vec<(u32, &[u16])> = channels
            .iter()
            .map(|(ch, samples)| (*ch, samples.as_slice()))
            .collect();

        let flag = if self.has_wrapped { ROLLOVER_FLAG } else { 0 };
        let bytes = encode_event(
            0,
            self.events_emitted as u32,
            self.time_tag | flag,
            &refs,
        );

        let next = self.time_tag as u64 + self.simulation.ticks_per_event as u64;
        if next > TRIGGER_TIME_TAG_MASK as u64 {
            self.has_wrapped = true;
        }
        self.time_tag = (next & TRIGGER_TIME_TAG_MASK as u64) as u32;
        self.events_emitted += 1;
        bytes
    }
}

impl DigitizerDriver for SimulatedDigitizer {
    fn open(&mut self, connection: &ConnectionDescriptor) -> Result<(), DriverError> {
        match connection {
            ConnectionDescriptor::Simulated => {
                self.is_open = true;
                Ok(())
            }
            other => Err(DriverError::Link(format!(
                "the simulated digitizer cannot be reached through a {} connection",
                other.kind()
            ))),
        }
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.is_running = false;
        self.is_open = false;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), DriverError> {
        self.check_open("reset")?;
        let channels = self.info.channels as usize;
        self.registers = SimulatedRegisters {
            dc_offsets: vec![0; channels],
            thresholds: vec![0; channels],
            polarities: vec![None; channels],
            max_events_per_block: 1,
            ..Default::default()
        };
        self.is_running = false;
        Ok(())
    }

    fn board_info(&self) -> Result<RawBoardInfo, DriverError> {
        self.check_open("board_info")?;
        Ok(self.info.clone())
    }

    fn set_channel_enable_mask(&mut self, mask: u32) -> Result<(), DriverError> {
        self.check_open("set_channel_enable_mask")?;
        self.registers.enable_mask = mask;
        Ok(())
    }

    fn set_channel_dc_offset(&mut self, channel: u32, dac: u16) -> Result<(), DriverError> {
        let idx = self.check_channel("set_channel_dc_offset", channel)?;
        self.registers.dc_offsets[idx] = dac;
        Ok(())
    }

    fn set_record_length(&mut self, samples: u32) -> Result<(), DriverError> {
        self.check_open("set_record_length")?;
        self.registers.record_length = samples;
        Ok(())
    }

    fn set_channel_trigger_threshold(
        &mut self,
        channel: u32,
        adc: u16,
    ) -> Result<(), DriverError> {
        let idx = self.check_channel("set_channel_trigger_threshold", channel)?;
        self.registers.thresholds[idx] = adc;
        Ok(())
    }

    fn set_self_trigger(&mut self, mask: u32) -> Result<(), DriverError> {
        self.check_open("set_self_trigger")?;
        self.registers.self_trigger_mask = mask;
        Ok(())
    }

    fn set_post_trigger_size(&mut self, percent: u8) -> Result<(), DriverError> {
        self.check_open("set_post_trigger_size")?;
        if percent > 100 {
            return Err(DriverError::Code {
                call: "set_post_trigger_size",
                code: INVALID_PARAMETER,
            });
        }
        self.registers.post_trigger_percent = percent;
        Ok(())
    }

    fn set_trigger_polarity(
        &mut self,
        channel: u32,
        polarity: TriggerPolarity,
    ) -> Result<(), DriverError> {
        let idx = self.check_channel("set_trigger_polarity", channel)?;
        self.registers.polarities[idx] = Some(polarity);
        Ok(())
    }

    fn set_max_events_per_block(&mut self, events: u32) -> Result<(), DriverError> {
        self.check_open("set_max_events_per_block")?;
        self.registers.max_events_per_block = events;
        Ok(())
    }

    fn allocate_readout_buffer(&mut self) -> Result<usize, DriverError> {
        self.check_open("allocate_readout_buffer")?;
        let channels = self.registers.enable_mask.count_ones() as usize;
        let event_words = 4 + channels * (self.registers.record_length as usize).div_ceil(2);
        Ok(event_words * 4 * self.registers.max_events_per_block as usize)
    }

    fn calibrate(&mut self) -> Result<(), DriverError> {
        self.check_open("calibrate")?;
        self.registers.calibrated = true;
        Ok(())
    }

    fn start_acquisition(&mut self) -> Result<(), DriverError> {
        self.check_open("start_acquisition")?;
        self.is_running = true;
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<(), DriverError> {
        self.check_open("stop_acquisition")?;
        self.is_running = false;
        Ok(())
    }

    fn read_block(&mut self, buffer: &mut Vec<u8>) -> Result<(), DriverError> {
        self.check_open("read_block")?;
        buffer.clear();
        self.reads += 1;
        if let Some(every) = self.simulation.fail_every {
            if every > 0 && self.reads % every == 0 {
                return Err(DriverError::Timeout("read_block"));
            }
        }
        if !self.is_running {
            return Ok(());
        }

        let mut n_events = self
            .simulation
            .events_per_read
            .min(self.registers.max_events_per_block) as u64;
        if let Some(max) = self.simulation.max_events {
            n_events = n_events.min(max.saturating_sub(self.events_emitted));
        }
        for _ in 0..n_events {
            let event = self.next_event();
            buffer.extend_from_slice(&event);
        }
        Ok(())
    }
}
