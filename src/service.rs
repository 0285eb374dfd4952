//! Contract of the configuration interface, independent of how it is served.

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};

use crate::config::{ConfigStore, DeviceConfig};
use crate::error::ConfigError;
use crate::packet::{CHANNEL_COUNT, RATE_BIT};
use crate::shared::NodeState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub timestamp: i64,
    pub connected: bool,
    pub signal_quality: i8,
    pub last_packet_age_ms: Option<u64>,
    pub channels: [u16; CHANNEL_COUNT],
    pub outputs: [u16; CHANNEL_COUNT],
    pub digital: u8,
    pub high_rate: bool,
}

#[derive(Clone)]
pub struct ConfigService {
    state: Arc<NodeState>,
    store: Arc<dyn ConfigStore>,
    exit_requested: Arc<AtomicBool>,
    write_lock: Arc<Mutex<()>>,
}

impl ConfigService {
    pub fn new(state: Arc<NodeState>, store: Arc<dyn ConfigStore>) -> Self {
        ConfigService {
            state,
            store,
            exit_requested: Arc::new(AtomicBool::new(false)),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn get_config(&self) -> Arc<DeviceConfig> {
        self.state.config.load()
    }

    /// Apply a partial update and persist it.
    ///
    /// On a persistence failure the new values stay active in memory and the
    /// error is returned so the caller can report that they are not durable.
    pub fn set_config(&self, entries: &Map<String, Value>) -> Result<DeviceConfig, ConfigError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = (*self.state.config.load()).clone();
        let applied = next.apply_entries(entries)?;
        next.configured = true;

        for (i, cal) in next.channels.iter().enumerate() {
            if !cal.is_consistent() {
                warn!("Channel {} calibration is inconsistent and will be clamped: {:?}", i + 1, cal);
            }
        }

        self.state.config.publish(next.clone());
        info!("Applied {} setting(s)", applied);

        self.store.save(&next)?;
        Ok(next)
    }

    pub fn reset(&self) -> Result<DeviceConfig, ConfigError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let defaults = DeviceConfig::default();
        self.state.config.publish(defaults.clone());
        info!("Settings reset to defaults");
        self.store.save(&defaults)?;
        Ok(defaults)
    }

    pub fn telemetry(&self) -> Telemetry {
        let now_ms = self.state.now_ms();
        let link = self.state.link.status();
        let packet = self.state.packets.latest().map(|r| r.packet).unwrap_or_default();
        let outputs = self.state.outputs.current();
        Telemetry {
            timestamp: chrono::Utc::now().timestamp_millis(),
            connected: link.connected,
            signal_quality: link.signal_quality,
            last_packet_age_ms: link.age_ms(now_ms),
            channels: packet.channels,
            outputs: outputs.pulses_us,
            digital: packet.digital & !RATE_BIT,
            high_rate: packet.is_high_rate(),
        }
    }

    pub fn request_exit(&self) {
        self.exit_requested.store(true, Ordering::SeqCst);
    }

    pub fn take_exit_request(&self) -> bool {
        self.exit_requested.swap(false, Ordering::SeqCst)
    }
}
