//! Status LED waveforms.
//!
//! | State                   | Period  | Pattern        |
//! |-------------------------|---------|----------------|
//! | running, link up        | 2000 ms | short blink    |
//! | running, link down      |  400 ms | fast blink     |
//! | config mode, link up    | 1500 ms | double blink   |
//! | config mode, link down  | 2000 ms | triple blink   |

use log::warn;

use crate::hal::DigitalOutputs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingState {
    RunningConnected,
    RunningDisconnected,
    ConfigConnected,
    ConfigDisconnected,
}

impl OperatingState {
    pub fn from_flags(connected: bool, config_mode: bool) -> Self {
        match (config_mode, connected) {
            (false, true) => OperatingState::RunningConnected,
            (false, false) => OperatingState::RunningDisconnected,
            (true, true) => OperatingState::ConfigConnected,
            (true, false) => OperatingState::ConfigDisconnected,
        }
    }

    pub fn waveform(&self) -> &'static Waveform {
        match self {
            OperatingState::RunningConnected => &HEARTBEAT,
            OperatingState::RunningDisconnected => &FAST_BLINK,
            OperatingState::ConfigConnected => &DOUBLE_BLINK,
            OperatingState::ConfigDisconnected => &TRIPLE_BLINK,
        }
    }
}

/// One period of an on/off pattern; `on` holds `[start, end)` in ms.
#[derive(Debug, PartialEq, Eq)]
pub struct Waveform {
    pub period_ms: u64,
    pub on: &'static [(u64, u64)],
}

impl Waveform {
    pub fn level_at(&self, elapsed_ms: u64) -> bool {
        if self.period_ms == 0 {
            return false;
        }
        let position = elapsed_ms % self.period_ms;
        self.on.iter().any(|&(start, end)| position >= start && position < end)
    }
}

pub const HEARTBEAT: Waveform = Waveform {
    period_ms: 2000,
    on: &[(0, 100)],
};

pub const FAST_BLINK: Waveform = Waveform {
    period_ms: 400,
    on: &[(0, 200)],
};

pub const DOUBLE_BLINK: Waveform = Waveform {
    period_ms: 1500,
    on: &[(0, 100), (200, 300)],
};

pub const TRIPLE_BLINK: Waveform = Waveform {
    period_ms: 2000,
    on: &[(0, 100), (200, 300), (400, 500)],
};

pub fn instantaneous_output(state: OperatingState, elapsed_ms: u64) -> bool {
    state.waveform().level_at(elapsed_ms)
}

/// Drives one LED pin from the free-running clock, writing only on level
/// changes.
pub struct StatusIndicator {
    pin: Box<dyn DigitalOutputs>,
    index: usize,
    level: Option<bool>,
}

impl StatusIndicator {
    pub fn new(pin: Box<dyn DigitalOutputs>, index: usize) -> Self {
        StatusIndicator { pin, index, level: None }
    }

    pub fn update(&mut self, state: OperatingState, now_ms: u64) {
        let level = instantaneous_output(state, now_ms);
        if self.level == Some(level) {
            return;
        }
        match self.pin.write_pin(self.index, level) {
            Ok(()) => self.level = Some(level),
            Err(e) => warn!("Status LED write failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockPins;

    const STATES: [OperatingState; 4] = [
        OperatingState::RunningConnected,
        OperatingState::RunningDisconnected,
        OperatingState::ConfigConnected,
        OperatingState::ConfigDisconnected,
    ];

    fn pulses(state: OperatingState) -> usize {
        let wave = state.waveform();
        (1..wave.period_ms)
            .filter(|&t| instantaneous_output(state, t) && !instantaneous_output(state, t - 1))
            .count()
            + instantaneous_output(state, 0) as usize
    }

    #[test]
    fn test_periodicity() {
        for state in STATES {
            let period = state.waveform().period_ms;
            for t in 0..3 * period {
                assert_eq!(instantaneous_output(state, t), instantaneous_output(state, t + period));
            }
        }
    }

    #[test]
    fn test_waveforms_are_distinct() {
        for (i, a) in STATES.iter().enumerate() {
            for b in &STATES[i + 1..] {
                let (wa, wb) = (a.waveform(), b.waveform());
                assert!(wa.period_ms != wb.period_ms || wa.on != wb.on, "{a:?} vs {b:?}");
            }
        }
        assert_eq!(pulses(OperatingState::RunningConnected), 1);
        assert_eq!(pulses(OperatingState::RunningDisconnected), 1);
        assert_eq!(pulses(OperatingState::ConfigConnected), 2);
        assert_eq!(pulses(OperatingState::ConfigDisconnected), 3);
    }

    #[test]
    fn test_interval_edges() {
        let state = OperatingState::ConfigConnected;
        assert!(instantaneous_output(state, 0));
        assert!(instantaneous_output(state, 99));
        assert!(!instantaneous_output(state, 100));
        assert!(instantaneous_output(state, 200));
        assert!(!instantaneous_output(state, 300));
        assert!(instantaneous_output(state, 1500));
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(OperatingState::from_flags(true, false), OperatingState::RunningConnected);
        assert_eq!(OperatingState::from_flags(false, false), OperatingState::RunningDisconnected);
        assert_eq!(OperatingState::from_flags(true, true), OperatingState::ConfigConnected);
        assert_eq!(OperatingState::from_flags(false, true), OperatingState::ConfigDisconnected);
    }

    #[test]
    fn test_status_indicator_follows_waveform() {
        let pins = MockPins::new(1);
        let mut led = StatusIndicator::new(Box::new(pins.clone()), 0);
        led.update(OperatingState::RunningDisconnected, 10);
        assert!(pins.level(0));
        led.update(OperatingState::RunningDisconnected, 250);
        assert!(!pins.level(0));
        led.update(OperatingState::RunningDisconnected, 410);
        assert!(pins.level(0));
    }

    #[test]
    fn test_status_indicator_tracks_clock_across_state_change() {
        let pins = MockPins::new(1);
        let mut led = StatusIndicator::new(Box::new(pins.clone()), 0);
        let timeline = [
            (OperatingState::RunningConnected, 0),
            (OperatingState::RunningConnected, 150),
            (OperatingState::ConfigConnected, 1234),
            (OperatingState::ConfigConnected, 1510),
            (OperatingState::ConfigConnected, 1600),
            (OperatingState::ConfigConnected, 1710),
            (OperatingState::ConfigDisconnected, 2050),
            (OperatingState::ConfigDisconnected, 2450),
        ];
        for (state, now) in timeline {
            led.update(state, now);
            assert_eq!(pins.level(0), instantaneous_output(state, now), "{state:?} at {now}");
        }
    }
}
