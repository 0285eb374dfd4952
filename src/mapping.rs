//! Raw channel reading to servo pulse width.
//!
//! Two variants are kept side by side:
//! - [`Mapper::map_channel`] uses the per-channel calibration: raw pre-clamp,
//!   expo shaping, then a piecewise linear map around the output center.
//! - [`Mapper::map_rate`] needs no calibration and scales a fixed symmetric
//!   span around the servo center by the rate factor. The receiver uses it
//!   until the device has been configured.
//!
//! Neither function can fail. Broken calibrations (inverted ranges, expo
//! outside [0, 1], a zero raw domain) are clamped to something bounded.

use crate::config::ChannelCalibration;

pub const RAW_DOMAIN_MAX: u16 = 4095;

pub const SERVO_FREQ_HZ: u32 = 50;
pub const SERVO_US_MIN: u16 = 1000;
pub const SERVO_US_CENTER: u16 = 1500;
pub const SERVO_US_MAX: u16 = 2000;

pub const RATE_LOW_SCALE: f64 = 0.5;
pub const RATE_HIGH_SCALE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rate {
    Low,
    High,
}

impl Rate {
    pub fn from_flag(high: bool) -> Self {
        if high { Rate::High } else { Rate::Low }
    }

    pub fn scale(&self) -> f64 {
        match self {
            Rate::Low => RATE_LOW_SCALE,
            Rate::High => RATE_HIGH_SCALE,
        }
    }
}

/// S-curve shaping on a normalized input: `n + e * (n^3 - n)`.
///
/// Identity at `expo = 0`, pure cubic at `expo = 1`. Monotonic on [0, 1]
/// for every expo in [0, 1] since the slope is at least `1 - expo`.
pub fn apply_expo(normalized: f64, expo: f32) -> f64 {
    let n = normalized.clamp(0.0, 1.0);
    let e = if expo.is_nan() { 0.0 } else { (expo as f64).clamp(0.0, 1.0) };
    if e == 0.0 {
        return n;
    }
    n + e * (n * n * n - n)
}

/// 16-bit duty for a pulse width at the servo frame rate.
pub fn pulse_to_duty(pulse_us: u16) -> u16 {
    let period_us = 1_000_000 / SERVO_FREQ_HZ;
    let duty = (pulse_us as u32 * (1 << 16)) / period_us;
    duty.min(u16::MAX as u32) as u16
}

fn ordered(a: u16, b: u16) -> (u16, u16) {
    if a <= b { (a, b) } else { (b, a) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapper {
    raw_domain_max: u16,
}

impl Default for Mapper {
    fn default() -> Self {
        Mapper::new(RAW_DOMAIN_MAX)
    }
}

impl Mapper {
    pub fn new(raw_domain_max: u16) -> Self {
        Mapper { raw_domain_max }
    }

    /// Raw reading as a fraction of the raw domain. A zero domain maps to 0.
    pub fn normalize(&self, raw: u16) -> f64 {
        if self.raw_domain_max == 0 {
            return 0.0;
        }
        (raw as f64 / self.raw_domain_max as f64).min(1.0)
    }

    pub fn map_channel(&self, raw: u16, calibration: &ChannelCalibration) -> u16 {
        let (raw_lo, raw_hi) = ordered(calibration.raw_min, calibration.raw_max);
        let norm = self.normalize(raw.clamp(raw_lo, raw_hi));
        let shaped = apply_expo(norm, calibration.expo);

        let (out_lo, out_hi) = ordered(calibration.out_min, calibration.out_max);
        let center = calibration.out_center.clamp(out_lo, out_hi) as f64;
        let (lo, hi) = (out_lo as f64, out_hi as f64);

        let value = if shaped < 0.5 {
            let t = shaped * 2.0;
            lo + t * (center - lo)
        } else {
            let t = (shaped - 0.5) * 2.0;
            center + t * (hi - center)
        };
        value.round().clamp(lo, hi) as u16
    }

    pub fn map_rate(&self, raw: u16, rate: Rate) -> u16 {
        let norm = self.normalize(raw);
        let span = (SERVO_US_MAX - SERVO_US_MIN) as f64 * rate.scale();
        let center = (SERVO_US_MIN as f64 + SERVO_US_MAX as f64) * 0.5;
        let value = center + (norm - 0.5) * span;
        value
            .round()
            .clamp(SERVO_US_MIN as f64, SERVO_US_MAX as f64) as u16
    }
}
