use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use log::{info, warn};

use crate::error::ConfigError;
use crate::mapping::{RAW_DOMAIN_MAX, SERVO_US_CENTER, SERVO_US_MAX, SERVO_US_MIN};
use crate::packet::CHANNEL_COUNT;

pub const RADIO_CHANNEL_DEFAULT: u8 = 1;
pub const RADIO_CHANNEL_MAX: u8 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress(pub [u8; 6]);

impl PeerAddress {
    pub const BROADCAST: PeerAddress = PeerAddress([0xFF; 6]);
}

impl Default for PeerAddress {
    fn default() -> Self {
        PeerAddress::BROADCAST
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

impl FromStr for PeerAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or("expected 6 bytes")?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| format!("bad byte {:?}", part))?;
        }
        if parts.next().is_some() {
            return Err("expected 6 bytes".to_string());
        }
        Ok(PeerAddress(bytes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Receiver,
    Sender,
}

impl Role {
    pub fn as_u8(&self) -> u8 {
        match self {
            Role::Receiver => 0,
            Role::Sender => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Role::Receiver),
            1 => Some(Role::Sender),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Receiver => write!(f, "receiver"),
            Role::Sender => write!(f, "sender"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCalibration {
    pub raw_min: u16,    // Start of the usable raw range
    pub raw_max: u16,    // End of the usable raw range
    pub out_min: u16,    // Pulse width at full low deflection (us)
    pub out_center: u16, // Pulse width at center (us)
    pub out_max: u16,    // Pulse width at full high deflection (us)
    pub expo: f32,       // 0.0 linear .. 1.0 strong S-curve
}

impl Default for ChannelCalibration {
    fn default() -> Self {
        ChannelCalibration {
            raw_min: 0,
            raw_max: RAW_DOMAIN_MAX,
            out_min: SERVO_US_MIN,
            out_center: SERVO_US_CENTER,
            out_max: SERVO_US_MAX,
            expo: 0.0,
        }
    }
}

impl ChannelCalibration {
    pub fn is_consistent(&self) -> bool {
        self.raw_min <= self.raw_max
            && self.out_min <= self.out_center
            && self.out_center <= self.out_max
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub peer: PeerAddress,
    pub radio_channel: u8,
    pub channels: [ChannelCalibration; CHANNEL_COUNT],
    pub role: Role,
    pub configured: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            peer: PeerAddress::BROADCAST,
            radio_channel: RADIO_CHANNEL_DEFAULT,
            channels: [ChannelCalibration::default(); CHANNEL_COUNT],
            role: Role::Receiver,
            configured: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelField {
    RawMin,
    RawMax,
    OutMin,
    OutCenter,
    OutMax,
    Expo,
}

impl ChannelField {
    const ALL: [ChannelField; 6] = [
        ChannelField::RawMin,
        ChannelField::RawMax,
        ChannelField::OutMin,
        ChannelField::OutCenter,
        ChannelField::OutMax,
        ChannelField::Expo,
    ];

    fn suffix(&self) -> &'static str {
        match self {
            ChannelField::RawMin => "min",
            ChannelField::RawMax => "max",
            ChannelField::OutMin => "smin",
            ChannelField::OutCenter => "sctr",
            ChannelField::OutMax => "smax",
            ChannelField::Expo => "expo",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        ChannelField::ALL.into_iter().find(|f| f.suffix() == suffix)
    }

    fn key(&self, channel: usize) -> String {
        format!("ch{}_{}", channel + 1, self.suffix())
    }
}

/// `"ch3_smin"` -> (2, OutMin)
fn parse_channel_key(key: &str) -> Option<(usize, ChannelField)> {
    let (number, suffix) = key.strip_prefix("ch")?.split_once('_')?;
    let number: usize = number.parse().ok()?;
    if !(1..=CHANNEL_COUNT).contains(&number) {
        return None;
    }
    Some((number - 1, ChannelField::from_suffix(suffix)?))
}

fn as_u16(key: &str, value: &Value) -> Result<u16, ConfigError> {
    value
        .as_u64()
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| ConfigError::invalid(key, format!("expected 0..=65535, got {}", value)))
}

fn as_flag(key: &str, value: &Value) -> Result<bool, ConfigError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
        _ => Err(ConfigError::invalid(key, format!("expected 0/1, got {}", value))),
    }
}

impl DeviceConfig {
    /// Flat key/value form, shared by the settings file and the
    /// configuration interface.
    pub fn to_entries(&self) -> Map<String, Value> {
        let mut entries = Map::new();
        entries.insert("peer_mac".into(), Value::from(self.peer.to_string()));
        entries.insert("channel".into(), Value::from(self.radio_channel));
        for (i, cal) in self.channels.iter().enumerate() {
            for field in ChannelField::ALL {
                let value = match field {
                    ChannelField::RawMin => Value::from(cal.raw_min),
                    ChannelField::RawMax => Value::from(cal.raw_max),
                    ChannelField::OutMin => Value::from(cal.out_min),
                    ChannelField::OutCenter => Value::from(cal.out_center),
                    ChannelField::OutMax => Value::from(cal.out_max),
                    ChannelField::Expo => Value::from(cal.expo as f64),
                };
                entries.insert(field.key(i), value);
            }
        }
        entries.insert("dev_role".into(), Value::from(self.role.as_u8()));
        entries.insert("configured".into(), Value::from(self.configured as u8));
        entries
    }

    /// Lenient load: missing or unusable keys keep their default.
    pub fn from_entries(entries: &Map<String, Value>) -> Self {
        let mut config = DeviceConfig::default();
        for (key, value) in entries {
            match config.apply_entry(key, value) {
                Ok(true) => {}
                Ok(false) => warn!("Ignoring unknown settings key {}", key),
                Err(e) => warn!("Using default for {}: {}", key, e),
            }
        }
        config
    }

    /// Strict partial update: every recognised key must hold a valid value
    /// or nothing is applied. Unknown keys are ignored.
    pub fn apply_entries(&mut self, entries: &Map<String, Value>) -> Result<usize, ConfigError> {
        let mut next = self.clone();
        let mut applied = 0;
        for (key, value) in entries {
            if next.apply_entry(key, value)? {
                applied += 1;
            }
        }
        *self = next;
        Ok(applied)
    }

    fn apply_entry(&mut self, key: &str, value: &Value) -> Result<bool, ConfigError> {
        match key {
            "peer_mac" => {
                let text = value
                    .as_str()
                    .ok_or_else(|| ConfigError::invalid(key, "expected aa:bb:cc:dd:ee:ff"))?;
                self.peer = text.parse().map_err(|e: String| ConfigError::invalid(key, e))?;
            }
            "channel" => {
                // Zero is never a valid radio channel, it means "unset".
                let channel = value
                    .as_u64()
                    .filter(|c| (1..=RADIO_CHANNEL_MAX as u64).contains(c))
                    .ok_or_else(|| {
                        ConfigError::invalid(key, format!("expected 1..={}, got {}", RADIO_CHANNEL_MAX, value))
                    })?;
                self.radio_channel = channel as u8;
            }
            "dev_role" => {
                let role = match value {
                    Value::String(s) if s == "sender" => Some(Role::Sender),
                    Value::String(s) if s == "receiver" => Some(Role::Receiver),
                    Value::Number(n) => n.as_u64().and_then(|v| u8::try_from(v).ok()).and_then(Role::from_u8),
                    _ => None,
                };
                self.role = role.ok_or_else(|| ConfigError::invalid(key, format!("unknown role {}", value)))?;
            }
            "configured" => self.configured = as_flag(key, value)?,
            _ => {
                let Some((index, field)) = parse_channel_key(key) else {
                    return Ok(false);
                };
                let cal = &mut self.channels[index];
                match field {
                    ChannelField::RawMin => cal.raw_min = as_u16(key, value)?,
                    ChannelField::RawMax => cal.raw_max = as_u16(key, value)?,
                    ChannelField::OutMin => cal.out_min = as_u16(key, value)?,
                    ChannelField::OutCenter => cal.out_center = as_u16(key, value)?,
                    ChannelField::OutMax => cal.out_max = as_u16(key, value)?,
                    ChannelField::Expo => {
                        let expo = value
                            .as_f64()
                            .filter(|e| e.is_finite())
                            .ok_or_else(|| ConfigError::invalid(key, format!("expected a number, got {}", value)))?;
                        cal.expo = expo.clamp(0.0, 1.0) as f32;
                    }
                }
            }
        }
        Ok(true)
    }
}

pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<DeviceConfig, ConfigError>;
    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError>;
}

/// Settings kept as a pretty-printed JSON object of flat keys.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }

    /// Sibling file written first and renamed over the settings file.
    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> Result<DeviceConfig, ConfigError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No settings at {}, using defaults", self.path.display());
                return Ok(DeviceConfig::default());
            }
            Err(e) => return Err(e.into()),
        };
        let entries = match serde_json::from_str::<Value>(&content)? {
            Value::Object(entries) => entries,
            other => {
                warn!("Settings file is not an object ({}), using defaults", other);
                return Ok(DeviceConfig::default());
            }
        };
        info!("Settings loaded from {}", self.path.display());
        Ok(DeviceConfig::from_entries(&entries))
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(&Value::Object(config.to_entries()))?;
        let staging = self.staging_path();
        {
            let mut file = fs::File::create(&staging)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&staging, &self.path)?;
        info!("Settings saved to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store, optionally failing every save.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Option<Map<String, Value>>>,
    fail_saves: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_entries(entries: Map<String, Value>) -> Self {
        MemoryStore {
            entries: Mutex::new(Some(entries)),
            fail_saves: false,
        }
    }

    pub fn failing() -> Self {
        MemoryStore {
            entries: Mutex::new(None),
            fail_saves: true,
        }
    }

    pub fn entries(&self) -> Option<Map<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<DeviceConfig, ConfigError> {
        Ok(match self.entries() {
            Some(entries) => DeviceConfig::from_entries(&entries),
            None => DeviceConfig::default(),
        })
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        if self.fail_saves {
            return Err(io::Error::new(io::ErrorKind::Other, "storage unavailable").into());
        }
        *self.entries.lock().unwrap_or_else(PoisonError::into_inner) = Some(config.to_entries());
        Ok(())
    }
}
