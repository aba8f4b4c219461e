use super::board::BoardInfo;
use super::config::{AcquisitionParameters, TriggerPolarity};
use super::constants::DC_OFFSET_FULL_SCALE;
use super::error::ConfigurationError;

/// Register-level digitizer settings derived from the acquisition parameters.
///
/// The DC offset DAC spans the full 16 bits while the trigger threshold is expressed in ADC
/// counts, so both are derived together from the fractional offset and the pulse polarity.
#[derive(Debug, Clone, PartialEq)]
pub struct DigitizerSettings {
    pub enable_mask: u32,
    pub trigger_mask: u32,
    pub dc_offset_dac: u16,
    pub threshold_adc: u16,
    pub record_length: u32,
    pub block_event_count: u32,
    pub polarity: TriggerPolarity,
    pub post_trigger_size_percent: u8,
}

impl DigitizerSettings {
    /// Validate the parameters against the board and derive its register values
    pub fn derive(
        params: &AcquisitionParameters,
        board: &BoardInfo,
    ) -> Result<Self, ConfigurationError> {
        params.validate(board.channels)?;
        let roles = params.channel_roles();

        let full_scale = (1u64 << board.adc_bits) as f64;
        let offset = params.dc_offset;
        let threshold = params.threshold as f64;
        let (dac, vth) = match params.trigger_polarity {
            TriggerPolarity::Falling => (
                DC_OFFSET_FULL_SCALE * offset,
                full_scale * (1.0 - offset) - threshold,
            ),
            TriggerPolarity::Rising => (
                DC_OFFSET_FULL_SCALE * (1.0 - offset),
                full_scale * offset + threshold,
            ),
        };
        if vth < 0.0 || vth >= full_scale {
            return Err(ConfigurationError::BadThreshold {
                threshold: params.threshold,
                bits: board.adc_bits,
                offset,
            });
        }

        Ok(Self {
            enable_mask: roles.enable_mask(),
            trigger_mask: roles.trigger_mask(),
            dc_offset_dac: dac as u16,
            threshold_adc: vth as u16,
            record_length: params.record_length,
            block_event_count: params.block_event_count,
            polarity: params.trigger_polarity,
            post_trigger_size_percent: params.post_trigger_size_percent,
        })
    }

    /// Baseline level (ADC counts) implied by the DC offset DAC
    pub fn baseline_adc(dc_offset_dac: u16, adc_bits: u32) -> f64 {
        let full_scale = (1u64 << adc_bits) as f64;
        full_scale * (1.0 - dc_offset_dac as f64 / DC_OFFSET_FULL_SCALE)
    }
}
