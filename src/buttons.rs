//! Mode button handling: a level debouncer feeding a hold detector.
//!
//! Both are driven by elapsed milliseconds, never by how often they are
//! polled, so the behaviour does not depend on the loop period.

pub const DEBOUNCE_MS: u64 = 50;
pub const LONG_PRESS_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    current: bool,
    last_stable: bool,
    last_change_ms: u64,
    debounce_ms: u64,
}

impl Debouncer {
    pub fn new(debounce_ms: u64) -> Self {
        Debouncer {
            current: false,
            last_stable: false,
            last_change_ms: 0,
            debounce_ms,
        }
    }

    pub fn update(&mut self, level: bool, now_ms: u64) -> Option<Edge> {
        if level != self.current {
            self.current = level;
            self.last_change_ms = now_ms;
            return None;
        }

        if now_ms.saturating_sub(self.last_change_ms) >= self.debounce_ms && self.current != self.last_stable {
            self.last_stable = self.current;
            return Some(if self.current { Edge::Rising } else { Edge::Falling });
        }

        None
    }

    pub fn is_pressed(&self) -> bool {
        self.last_stable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    Idle,
    PressedBelowThreshold { since_ms: u64 },
    HoldTriggered,
}

/// Fires once per continuous hold of at least `hold_ms`. The button must be
/// released before it can fire again.
#[derive(Debug, Clone)]
pub struct HoldDetector {
    debouncer: Debouncer,
    state: HoldState,
    hold_ms: u64,
}

impl Default for HoldDetector {
    fn default() -> Self {
        HoldDetector::new(DEBOUNCE_MS, LONG_PRESS_MS)
    }
}

impl HoldDetector {
    pub fn new(debounce_ms: u64, hold_ms: u64) -> Self {
        HoldDetector {
            debouncer: Debouncer::new(debounce_ms),
            state: HoldState::Idle,
            hold_ms,
        }
    }

    pub fn state(&self) -> HoldState {
        self.state
    }

    /// Feed the raw level; returns true on the tick the hold threshold is crossed.
    pub fn update(&mut self, level: bool, now_ms: u64) -> bool {
        match self.debouncer.update(level, now_ms) {
            Some(Edge::Rising) => {
                self.state = HoldState::PressedBelowThreshold { since_ms: now_ms };
            }
            Some(Edge::Falling) => {
                self.state = HoldState::Idle;
            }
            None => {}
        }

        if let HoldState::PressedBelowThreshold { since_ms } = self.state {
            if now_ms.saturating_sub(since_ms) >= self.hold_ms {
                self.state = HoldState::HoldTriggered;
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive the detector at `period_ms` from `from` to `to` with a fixed level.
    fn run(detector: &mut HoldDetector, level: bool, from: u64, to: u64, period_ms: u64) -> usize {
        let mut triggers = 0;
        let mut t = from;
        while t < to {
            if detector.update(level, t) {
                triggers += 1;
            }
            t += period_ms;
        }
        triggers
    }

    #[test]
    fn test_debounce_ignores_glitches() {
        let mut debouncer = Debouncer::new(50);
        assert_eq!(debouncer.update(true, 0), None);
        assert_eq!(debouncer.update(false, 20), None);
        assert_eq!(debouncer.update(false, 100), None);
        assert!(!debouncer.is_pressed());

        assert_eq!(debouncer.update(true, 200), None);
        assert_eq!(debouncer.update(true, 230), None);
        assert_eq!(debouncer.update(true, 250), Some(Edge::Rising));
        assert!(debouncer.is_pressed());
        assert_eq!(debouncer.update(true, 260), None);
    }

    #[test]
    fn test_hold_fires_once_per_hold() {
        let mut detector = HoldDetector::new(50, 2000);
        assert_eq!(run(&mut detector, true, 0, 10_000, 10), 1);
        assert_eq!(detector.state(), HoldState::HoldTriggered);

        assert_eq!(run(&mut detector, false, 10_000, 10_200, 10), 0);
        assert_eq!(detector.state(), HoldState::Idle);

        assert_eq!(run(&mut detector, true, 10_200, 13_000, 10), 1);
    }

    #[test]
    fn test_short_press_does_not_fire() {
        let mut detector = HoldDetector::new(50, 2000);
        assert_eq!(run(&mut detector, true, 0, 1500, 10), 0);
        assert!(matches!(detector.state(), HoldState::PressedBelowThreshold { .. }));
        assert_eq!(run(&mut detector, false, 1500, 2500, 10), 0);
        assert_eq!(detector.state(), HoldState::Idle);
    }

    #[test]
    fn test_independent_of_poll_period() {
        for period in [1, 10, 20, 100] {
            let mut detector = HoldDetector::new(50, 2000);
            let mut fired_at = None;
            let mut t = 0;
            while t < 5000 {
                if detector.update(true, t) {
                    fired_at = Some(t);
                }
                t += period;
            }
            let fired_at = fired_at.unwrap();
            assert!(fired_at >= 2050 && fired_at < 2050 + 2 * period, "period {period}: {fired_at}");
        }
    }
}
