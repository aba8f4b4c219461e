// Raw event format (standard waveform firmware)
pub const EVENT_HEADER_MARKER: u32 = 0xA;
pub const EVENT_HEADER_WORDS: usize = 4;
pub const EVENT_SIZE_MASK: u32 = 0x0FFF_FFFF;
pub const EVENT_COUNTER_MASK: u32 = 0x00FF_FFFF;
pub const CHANNEL_MASK_BITS: u32 = 0xFF;
pub const BOARD_ID_SHIFT: u32 = 27;
pub const WORD_SIZE_BYTES: usize = 4;

// Trigger time tag
pub const TRIGGER_TIME_TAG_MASK: u32 = 0x7FFF_FFFF; // bit 31 is the rollover flag
pub const TIME_TAG_ROLLOVER: u64 = (u32::MAX / 2) as u64;

// Digitizer constants
pub const MAX_CHANNELS: u32 = 16;
pub const DC_OFFSET_FULL_SCALE: f64 = 0xFFFF as f64;
pub const NUMBER_OF_ROLES: usize = 4;
pub const NUMBER_OF_PLANES: usize = 3;

// Replay trace file
pub const TRACE_FILE_MAGIC: &[u8; 4] = b"PWAV";
pub const TRACE_FILE_VERSION: u16 = 1;
/// Bytes of the trace file header: magic, version, hit count
pub const TRACE_FILE_HEADER_BYTES: u64 = 10;
/// Smallest hit record: module, timestamp and four empty waveforms
pub const TRACE_HIT_MIN_BYTES: u64 = 2 + 8 + 4 * 4;
/// Largest waveform accepted from a trace file, in samples
pub const MAX_RECORD_LENGTH: usize = 1 << 20;

// Pulse analysis
pub const BASELINE_GUARD_SAMPLES: usize = 4;
pub const MIN_BASELINE_SAMPLES: usize = 1;
pub const BEAM_BASELINE_SAMPLES: usize = 16;
pub const DEFAULT_BEAM_CFD_FRACTION: f64 = 0.5;

// Histogram defaults (PS vs TOF)
pub const DEFAULT_TOF_BINS: usize = 1000;
pub const DEFAULT_TOF_MIN: f64 = 0.0;
pub const DEFAULT_TOF_MAX: f64 = 100.0;
pub const DEFAULT_PS_BINS: usize = 1000;
pub const DEFAULT_PS_MIN: f64 = 0.0;
pub const DEFAULT_PS_MAX: f64 = 1.0;

// Out-of-plane detectors sit further from the target
pub const DEFAULT_IN_PLANE_TIME_OFFSET: f64 = 0.0;
pub const DEFAULT_OUT_PLANE_TIME_OFFSET: f64 = 10.14 + 1.04;
