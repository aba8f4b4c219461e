use std::fmt::Display;

use super::error::ConnectionError;

/// Board information exactly as the driver reports it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBoardInfo {
    pub model_name: String,
    pub model: u32,
    pub channels: u32,
    pub family_code: u32,
    pub roc_firmware: String,
    pub amc_firmware: String,
    pub serial_number: u32,
    pub adc_bits: u32,
}

/// Firmware families. Only `Standard` records raw waveforms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareCode {
    DppPsd,
    DppPha,
    DppCi,
    Standard,
}

impl Display for FirmwareCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DppPsd => "DPP-PSD",
            Self::DppPha => "DPP-PHA",
            Self::DppCi => "DPP-CI",
            Self::Standard => "standard",
        };
        write!(f, "{name}")
    }
}

/// Identified digitizer: model number, sampling and ADC properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardInfo {
    pub model_name: String,
    pub model: u32,
    pub channels: u32,
    pub sample_period_ns: u64,
    pub adc_bits: u32,
    pub firmware: FirmwareCode,
    pub serial_number: u32,
}

const HEXAGON_FAMILY_CODE: u32 = 999;
const HEXAGON_MODEL: u32 = 5000;

/// (model, sample period in ns, ADC bits) for a family code
fn family_properties(family_code: u32) -> Option<(u32, u64, u32)> {
    match family_code {
        5 => Some((751, 1, 10)),
        7 => Some((780, 10, 14)),
        13 => Some((781, 10, 14)),
        0 => Some((724, 10, 14)),
        11 => Some((730, 2, 14)),
        14 => Some((725, 4, 14)),
        3 => Some((720, 4, 12)),
        HEXAGON_FAMILY_CODE => Some((HEXAGON_MODEL, 10, 14)),
        _ => None,
    }
}

/// Firmware family from the major number of the AMC (daughter board) firmware release
fn firmware_code(model: u32, amc_firmware: &str) -> FirmwareCode {
    if model == HEXAGON_MODEL {
        return FirmwareCode::DppPha;
    }
    let major = amc_firmware
        .split('.')
        .next()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(0);
    match major {
        128 | 139 => FirmwareCode::DppPha,
        130 => FirmwareCode::DppCi,
        131 | 132 | 136 => FirmwareCode::DppPsd,
        _ => FirmwareCode::Standard,
    }
}

impl BoardInfo {
    /// Identify the board from what the driver reports
    pub fn identify(raw: &RawBoardInfo) -> Result<Self, ConnectionError> {
        let (model, sample_period_ns, adc_bits) = family_properties(raw.family_code)
            .ok_or(ConnectionError::UnsupportedFamily(raw.family_code))?;
        let firmware = firmware_code(model, &raw.amc_firmware);
        Ok(Self {
            model_name: raw.model_name.clone(),
            model,
            channels: raw.channels,
            sample_period_ns,
            adc_bits,
            firmware,
            serial_number: raw.serial_number,
        })
    }

    /// Does this board model need the ADC calibration sequence after configuration
    pub fn needs_calibration(&self) -> bool {
        matches!(self.model, 725 | 730 | 751)
    }

    pub fn log_summary(&self) {
        log::info!(
            "Digitizer {} (x{}) serial {}: {} channels, {} ns sampling, {}-bit ADC, {} firmware",
            self.model_name,
            self.model,
            self.serial_number,
            self.channels,
            self.sample_period_ns,
            self.adc_bits,
            self.firmware
        );
    }
}
