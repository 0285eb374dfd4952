use log::info;
use rppal::gpio::{Gpio, InputPin, Level, OutputPin};

use crate::error::HardwareError;
use crate::hal::{DigitalInputs, DigitalOutputs, DutyOutputs};
use crate::mapping::SERVO_FREQ_HZ;

/// Active-low switches with the internal pull-up enabled.
pub struct SwitchInputs {
    pins: Vec<InputPin>,
}

impl SwitchInputs {
    pub fn new(pin_numbers: &[u8]) -> Result<Self, HardwareError> {
        let gpio = Gpio::new()?;
        let mut pins = Vec::new();

        for &pin_num in pin_numbers {
            let pin = gpio.get(pin_num)?.into_input_pullup();
            info!("GPIO {} initialized as switch", pin_num);
            pins.push(pin);
        }

        Ok(SwitchInputs { pins })
    }
}

impl DigitalInputs for SwitchInputs {
    fn pin_count(&self) -> usize {
        self.pins.len()
    }

    fn read_pin(&mut self, index: usize) -> Result<bool, HardwareError> {
        let pin = self.pins.get(index).ok_or(HardwareError::ChannelOutOfRange(index))?;
        Ok(pin.read() == Level::Low)
    }
}

pub struct PinOutputs {
    pins: Vec<OutputPin>,
}

impl PinOutputs {
    pub fn new(pin_numbers: &[u8]) -> Result<Self, HardwareError> {
        let gpio = Gpio::new()?;
        let mut pins = Vec::new();

        for &pin_num in pin_numbers {
            let mut pin = gpio.get(pin_num)?.into_output();
            pin.set_low();
            info!("GPIO {} initialized as output", pin_num);
            pins.push(pin);
        }

        Ok(PinOutputs { pins })
    }
}

impl DigitalOutputs for PinOutputs {
    fn pin_count(&self) -> usize {
        self.pins.len()
    }

    fn write_pin(&mut self, index: usize, high: bool) -> Result<(), HardwareError> {
        let pin = self.pins.get_mut(index).ok_or(HardwareError::ChannelOutOfRange(index))?;
        if high {
            pin.set_high();
        } else {
            pin.set_low();
        }
        Ok(())
    }
}

/// Servo outputs on software PWM at the servo frame rate.
pub struct SoftPwmServos {
    pins: Vec<OutputPin>,
}

impl SoftPwmServos {
    pub fn new(pin_numbers: &[u8]) -> Result<Self, HardwareError> {
        let gpio = Gpio::new()?;
        let mut pins = Vec::new();

        for &pin_num in pin_numbers {
            let mut pin = gpio.get(pin_num)?.into_output();
            pin.set_pwm_frequency(SERVO_FREQ_HZ as f64, 0.0)?;
            info!("GPIO {} initialized as servo output", pin_num);
            pins.push(pin);
        }

        Ok(SoftPwmServos { pins })
    }
}

impl DutyOutputs for SoftPwmServos {
    fn channel_count(&self) -> usize {
        self.pins.len()
    }

    fn write_duty(&mut self, channel: usize, duty: u16) -> Result<(), HardwareError> {
        let pin = self.pins.get_mut(channel).ok_or(HardwareError::ChannelOutOfRange(channel))?;
        let duty_cycle = duty as f64 / 65536.0;
        pin.set_pwm_frequency(SERVO_FREQ_HZ as f64, duty_cycle)?;
        Ok(())
    }
}
