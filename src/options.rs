//! Process options taken from the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use log::warn;

pub const DEFAULT_CONFIG_PATH: &str = "rclink.json";
pub const DEFAULT_WS_ADDR: &str = "0.0.0.0:10013";
pub const DEFAULT_UDP_PORT: u16 = 10100;
pub const DEFAULT_IFACE: &str = "wlan0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub config_path: PathBuf,
    pub ws_addr: String,
    pub udp_base_port: u16,
    pub interface: String,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            ws_addr: DEFAULT_WS_ADDR.to_string(),
            udp_base_port: DEFAULT_UDP_PORT,
            interface: DEFAULT_IFACE.to_string(),
        }
    }
}

impl Options {
    pub fn from_env() -> Self {
        Options::from_lookup(|key| env::var(key).ok())
    }

    /// Unset or unparsable values keep their default.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let defaults = Options::default();
        Options {
            config_path: lookup("RCLINK_CONFIG").map(PathBuf::from).unwrap_or(defaults.config_path),
            ws_addr: lookup("RCLINK_WS_ADDR").unwrap_or(defaults.ws_addr),
            udp_base_port: parsed(&lookup, "RCLINK_UDP_PORT").unwrap_or(defaults.udp_base_port),
            interface: lookup("RCLINK_IFACE").unwrap_or(defaults.interface),
        }
    }
}

fn parsed<T: FromStr, F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}", key, raw);
            None
        }
    }
}
