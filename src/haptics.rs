//! Haptic feedback adapter. The platform decides how a pulse is rendered;
//! the dispatcher only asks for one of a given length.

use std::time::Duration;

use tracing::info;

use crate::error::HapticsError;

pub trait Haptics: Send + Sync {
    fn has_vibrator(&self) -> bool;

    /// Fire a single pulse. Must not block for longer than the pulse itself.
    fn vibrate(&self, duration: Duration) -> Result<(), HapticsError>;
}

/// Device without a vibration motor.
pub struct NoHaptics;

impl Haptics for NoHaptics {
    fn has_vibrator(&self) -> bool {
        false
    }

    fn vibrate(&self, _duration: Duration) -> Result<(), HapticsError> {
        Err(HapticsError::NoVibrator)
    }
}

/// Logs each pulse instead of driving hardware. Used by the replay CLI.
pub struct LogHaptics;

impl Haptics for LogHaptics {
    fn has_vibrator(&self) -> bool {
        true
    }

    fn vibrate(&self, duration: Duration) -> Result<(), HapticsError> {
        info!(pulse_ms = duration.as_millis() as u64, "haptic pulse");
        Ok(())
    }
}
