//! What the link needs from the board. Implementations live in `adc` and
//! `gpio` for the Raspberry Pi; tests use in-memory fakes.

use crate::error::HardwareError;
use crate::packet::{ControlPacket, DIGITAL_OUTPUTS};

pub trait AnalogInputs: Send {
    fn channel_count(&self) -> usize;
    fn read_channel(&mut self, channel: usize) -> Result<u16, HardwareError>;
}

/// Proportional outputs driven with a 16-bit duty at the servo frame rate.
pub trait DutyOutputs: Send {
    fn channel_count(&self) -> usize;
    fn write_duty(&mut self, channel: usize, duty: u16) -> Result<(), HardwareError>;
}

pub trait DigitalInputs: Send {
    fn pin_count(&self) -> usize;
    fn read_pin(&mut self, index: usize) -> Result<bool, HardwareError>;
}

pub trait DigitalOutputs: Send {
    fn pin_count(&self) -> usize;
    fn write_pin(&mut self, index: usize, high: bool) -> Result<(), HardwareError>;
}

/// Switch inputs of the sender. `lights[i]` is the input carried in packet
/// output bit `i`, `rate` the input of the rate switch.
pub struct SenderSwitches {
    pub inputs: Box<dyn DigitalInputs>,
    pub lights: Vec<usize>,
    pub rate: Option<usize>,
}

impl SenderSwitches {
    /// Packet bit-field for the current switch positions.
    pub fn read_digital(&mut self) -> Result<u8, HardwareError> {
        let mut packet = ControlPacket::default();
        for (bit, &input) in self.lights.iter().enumerate().take(DIGITAL_OUTPUTS) {
            packet.set_output(bit, self.inputs.read_pin(input)?);
        }
        if let Some(input) = self.rate {
            packet.set_high_rate(self.inputs.read_pin(input)?);
        }
        Ok(packet.digital)
    }
}

pub mod mock {
    //! Shared-state fakes, cloneable so a test can keep a handle on what a
    //! task wrote after handing the device over.

    use super::*;
    use std::sync::{Arc, Mutex, PoisonError};

    #[derive(Clone, Default)]
    pub struct MockAnalog {
        values: Arc<Mutex<Vec<u16>>>,
    }

    impl MockAnalog {
        pub fn new(count: usize) -> Self {
            MockAnalog {
                values: Arc::new(Mutex::new(vec![0; count])),
            }
        }

        pub fn set(&self, channel: usize, value: u16) {
            let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = values.get_mut(channel) {
                *slot = value;
            }
        }
    }

    impl AnalogInputs for MockAnalog {
        fn channel_count(&self) -> usize {
            self.values.lock().unwrap_or_else(PoisonError::into_inner).len()
        }

        fn read_channel(&mut self, channel: usize) -> Result<u16, HardwareError> {
            let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
            values.get(channel).copied().ok_or(HardwareError::ChannelOutOfRange(channel))
        }
    }

    #[derive(Clone, Default)]
    pub struct MockDuty {
        duties: Arc<Mutex<Vec<Option<u16>>>>,
    }

    impl MockDuty {
        pub fn new(count: usize) -> Self {
            MockDuty {
                duties: Arc::new(Mutex::new(vec![None; count])),
            }
        }

        pub fn duty(&self, channel: usize) -> Option<u16> {
            self.duties
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(channel)
                .copied()
                .flatten()
        }
    }

    impl DutyOutputs for MockDuty {
        fn channel_count(&self) -> usize {
            self.duties.lock().unwrap_or_else(PoisonError::into_inner).len()
        }

        fn write_duty(&mut self, channel: usize, duty: u16) -> Result<(), HardwareError> {
            let mut duties = self.duties.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = duties.get_mut(channel).ok_or(HardwareError::ChannelOutOfRange(channel))?;
            *slot = Some(duty);
            Ok(())
        }
    }

    /// Pins usable both as inputs and as outputs.
    #[derive(Clone, Default)]
    pub struct MockPins {
        levels: Arc<Mutex<Vec<bool>>>,
    }

    impl MockPins {
        pub fn new(count: usize) -> Self {
            MockPins {
                levels: Arc::new(Mutex::new(vec![false; count])),
            }
        }

        pub fn set(&self, index: usize, high: bool) {
            let mut levels = self.levels.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = levels.get_mut(index) {
                *slot = high;
            }
        }

        pub fn level(&self, index: usize) -> bool {
            self.levels
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(index)
                .copied()
                .unwrap_or(false)
        }

        fn len(&self) -> usize {
            self.levels.lock().unwrap_or_else(PoisonError::into_inner).len()
        }
    }

    impl DigitalInputs for MockPins {
        fn pin_count(&self) -> usize {
            self.len()
        }

        fn read_pin(&mut self, index: usize) -> Result<bool, HardwareError> {
            if index >= self.len() {
                return Err(HardwareError::ChannelOutOfRange(index));
            }
            Ok(self.level(index))
        }
    }

    impl DigitalOutputs for MockPins {
        fn pin_count(&self) -> usize {
            self.len()
        }

        fn write_pin(&mut self, index: usize, high: bool) -> Result<(), HardwareError> {
            if index >= self.len() {
                return Err(HardwareError::ChannelOutOfRange(index));
            }
            self.set(index, high);
            Ok(())
        }
    }
}
