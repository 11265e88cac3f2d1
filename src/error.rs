use std::path::PathBuf;

/// A buffer that cannot be a badge framebuffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BitmapError {
    #[error("packed bitmap must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum FontError {
    #[error("font data is not a usable TrueType/OpenType face")]
    InvalidFace,
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("font {path}: {source}")]
    Font { path: PathBuf, source: FontError },
}

/// Failures reported by a transport backend.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bluetooth not available: {0}")]
    Unavailable(String),

    #[error("blocked by permissions: {0}")]
    PermissionDenied(String),

    #[error("not connected")]
    NotConnected,

    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(uuid::Uuid),

    #[error("rejected by remote (status {0})")]
    Rejected(u8),

    #[error("ble: {0}")]
    Ble(#[from] btleplug::Error),
}

/// Precondition failures of [`crate::session::TransferSession::send`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("not ready (connect first)")]
    NotReady,

    #[error("a transfer is already in flight")]
    Busy,

    #[error("payload too large for a frame ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("link task has shut down")]
    LinkClosed,
}
