//! Error types for the collaborator layer. The detector core itself is total.

use thiserror::Error;

/// Rejection returned by `DeviceShake::enable_listening`. Never retried internally.
#[derive(Debug, Error)]
pub enum EnableError {
    #[error("Accelerometer is not available on this device")]
    SensorUnavailable,

    #[error("Failed to register accelerometer listener: {0}")]
    RegistrationFailed(#[source] SensorError),
}

/// Failures reported by a `SensorSource`.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor {0} is already registered")]
    AlreadyRegistered(String),

    #[error("sensor refused subscription: {0}")]
    Refused(String),

    #[error("failed to spawn sensor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum HapticsError {
    #[error("no vibrator available")]
    NoVibrator,

    #[error("vibration failed: {0}")]
    Device(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListenerError {
    #[error("unknown event name: {0}")]
    UnknownEvent(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Failures loading a recorded accelerometer trace.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("trace IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("trace line {line}: timestamp {timestamp_ms} is earlier than the previous reading")]
    OutOfOrder { line: usize, timestamp_ms: u64 },
}
