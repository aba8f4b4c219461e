use super::board::RawBoardInfo;
use super::config::{ConnectionDescriptor, TriggerPolarity};
use super::error::DriverError;

/// DigitizerDriver is the register-level interface to one digitizer board.
///
/// It is the boundary to the vendor transport: every method maps to one driver call and
/// reports the driver's own error code on failure. Implementations must bound
/// [`DigitizerDriver::read_block`] by a timeout and report it as [`DriverError::Timeout`]
/// rather than blocking forever.
pub trait DigitizerDriver: Send {
    fn open(&mut self, connection: &ConnectionDescriptor) -> Result<(), DriverError>;
    fn close(&mut self) -> Result<(), DriverError>;
    fn reset(&mut self) -> Result<(), DriverError>;
    fn board_info(&self) -> Result<RawBoardInfo, DriverError>;

    fn set_channel_enable_mask(&mut self, mask: u32) -> Result<(), DriverError>;
    fn set_channel_dc_offset(&mut self, channel: u32, dac: u16) -> Result<(), DriverError>;
    fn set_record_length(&mut self, samples: u32) -> Result<(), DriverError>;
    fn set_channel_trigger_threshold(&mut self, channel: u32, adc: u16)
        -> Result<(), DriverError>;
    /// Channels allowed to self-trigger an acquisition window (acquisition-only mode)
    fn set_self_trigger(&mut self, mask: u32) -> Result<(), DriverError>;
    fn set_post_trigger_size(&mut self, percent: u8) -> Result<(), DriverError>;
    fn set_trigger_polarity(
        &mut self,
        channel: u32,
        polarity: TriggerPolarity,
    ) -> Result<(), DriverError>;
    fn set_max_events_per_block(&mut self, events: u32) -> Result<(), DriverError>;

    /// Allocate the driver side readout buffer. Returns its size in bytes
    fn allocate_readout_buffer(&mut self) -> Result<usize, DriverError>;
    fn calibrate(&mut self) -> Result<(), DriverError>;

    fn start_acquisition(&mut self) -> Result<(), DriverError>;
    fn stop_acquisition(&mut self) -> Result<(), DriverError>;

    /// Perform one block transfer, replacing the contents of `buffer` with the raw block.
    /// An empty buffer means no event was ready.
    fn read_block(&mut self, buffer: &mut Vec<u8>) -> Result<(), DriverError>;
}

impl<D: DigitizerDriver + ?Sized> DigitizerDriver for Box<D> {
    fn open(&mut self, connection: &ConnectionDescriptor) -> Result<(), DriverError> {
        (**self).open(connection)
    }
    fn close(&mut self) -> Result<(), DriverError> {
        (**self).close()
    }
    fn reset(&mut self) -> Result<(), DriverError> {
        (**self).reset()
    }
    fn board_info(&self) -> Result<RawBoardInfo, DriverError> {
        (**self).board_info()
    }
    fn set_channel_enable_mask(&mut self, mask: u32) -> Result<(), DriverError> {
        (**self).set_channel_enable_mask(mask)
    }
    fn set_channel_dc_offset(&mut self, channel: u32, dac: u16) -> Result<(), DriverError> {
        (**self).set_channel_dc_offset(channel, dac)
    }
    fn set_record_length(&mut self, samples: u32) -> Result<(), DriverError> {
        (**self).set_record_length(samples)
    }
    fn set_channel_trigger_threshold(
        &mut self,
        channel: u32,
        adc: u16,
    ) -> Result<(), DriverError> {
        (**self).set_channel_trigger_threshold(channel, adc)
    }
    fn set_self_trigger(&mut self, mask: u32) -> Result<(), DriverError> {
        (**self).set_self_trigger(mask)
    }
    fn set_post_trigger_size(&mut self, percent: u8) -> Result<(), DriverError> {
        (**self).set_post_trigger_size(percent)
    }
    fn set_trigger_polarity(
        &mut self,
        channel: u32,
        polarity: TriggerPolarity,
    ) -> Result<(), DriverError> {
        (**self).set_trigger_polarity(channel, polarity)
    }
    fn set_max_events_per_block(&mut self, events: u32) -> Result<(), DriverError> {
        (**self).set_max_events_per_block(events)
    }
    fn allocate_readout_buffer(&mut self) -> Result<usize, DriverError> {
        (**self).allocate_readout_buffer()
    }
    fn calibrate(&mut self) -> Result<(), DriverError> {
        (**self).calibrate()
    }
    fn start_acquisition(&mut self) -> Result<(), DriverError> {
        (**self).start_acquisition()
    }
    fn stop_acquisition(&mut self) -> Result<(), DriverError> {
        (**self).stop_acquisition()
    }
    fn read_block(&mut self, buffer: &mut Vec<u8>) -> Result<(), DriverError> {
        (**self).read_block(buffer)
    }
}
