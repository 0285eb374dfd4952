use log::info;
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

use crate::error::HardwareError;
use crate::hal::AnalogInputs;

pub const MCP3208_CHANNELS: usize = 8;

/// MCP3208 12-bit ADC on SPI0.0, single-ended reads.
pub struct Mcp3208 {
    spi: Spi,
    channels: usize,
}

impl Mcp3208 {
    pub fn new(channels: usize) -> Result<Self, HardwareError> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, 1_000_000, Mode::Mode0)?;
        info!("MCP3208 ADC initialized on SPI0.0 ({} channels)", channels);
        Ok(Mcp3208 {
            spi,
            channels: channels.min(MCP3208_CHANNELS),
        })
    }
}

impl AnalogInputs for Mcp3208 {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn read_channel(&mut self, channel: usize) -> Result<u16, HardwareError> {
        if channel >= self.channels {
            return Err(HardwareError::ChannelOutOfRange(channel));
        }

        // start bit, single-ended, D2 in the first byte; D1 D0 in the second
        let ch = channel as u8;
        let tx_buffer = [0x06 | (ch >> 2), (ch & 0x03) << 6, 0x00];
        let mut rx_buffer = [0u8; 3];

        self.spi.transfer(&mut rx_buffer, &tx_buffer)?;

        Ok((((rx_buffer[1] & 0x0F) as u16) << 8) | (rx_buffer[2] as u16))
    }
}
