use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to persist settings: {0}")]
    Persistence(#[from] io::Error),

    #[error("settings encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("radio I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame of {0} bytes rejected by transport")]
    FrameRejected(usize),

    #[error("frame not acknowledged by peer")]
    NotDelivered,
}

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("channel {0} out of range")]
    ChannelOutOfRange(usize),

    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("SPI error: {0}")]
    Spi(#[from] rppal::spi::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("resource {0} is already in use")]
    ResourceBusy(&'static str),

    #[error("resource {0} is not available on this device")]
    ResourceUnavailable(&'static str),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}
