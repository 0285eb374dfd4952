//! Link liveness derived from inbound traffic.

use std::time::Instant;

use log::{info, warn};

use crate::shared::Snapshot;

pub const LINK_TIMEOUT_MS: u64 = 1000;
pub const SIGNAL_QUALITY_FLOOR: i8 = -120;

/// Monotonic milliseconds since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub connected: bool,
    pub signal_quality: i8,
    pub last_update_ms: Option<u64>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        LinkStatus {
            connected: false,
            signal_quality: SIGNAL_QUALITY_FLOOR,
            last_update_ms: None,
        }
    }
}

impl LinkStatus {
    pub fn age_ms(&self, now_ms: u64) -> Option<u64> {
        self.last_update_ms.map(|t| now_ms.saturating_sub(t))
    }
}

/// Only [`LinkTracker::on_packet_received`] sets `connected` and only
/// [`LinkTracker::sweep`] clears it.
#[derive(Default)]
pub struct LinkTracker {
    status: Snapshot<LinkStatus>,
}

impl LinkTracker {
    pub fn new() -> Self {
        LinkTracker::default()
    }

    pub fn on_packet_received(&self, signal_quality: i8, now_ms: u64) {
        let was_connected = self.status.load().connected;
        self.status.publish(LinkStatus {
            connected: true,
            signal_quality,
            last_update_ms: Some(now_ms),
        });
        if !was_connected {
            info!("Link up (signal {} dBm)", signal_quality);
        }
    }

    /// Returns true when this call expired the link.
    pub fn sweep(&self, now_ms: u64) -> bool {
        let expired = self.status.update(|status| {
            let last = status.last_update_ms?;
            if status.connected && now_ms.saturating_sub(last) > LINK_TIMEOUT_MS {
                Some(LinkStatus {
                    connected: false,
                    signal_quality: SIGNAL_QUALITY_FLOOR,
                    last_update_ms: status.last_update_ms,
                })
            } else {
                None
            }
        });
        if expired {
            warn!("Link lost: no packet for more than {} ms", LINK_TIMEOUT_MS);
        }
        expired
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.load()
    }

    pub fn is_connected(&self) -> bool {
        self.status().connected
    }
}
