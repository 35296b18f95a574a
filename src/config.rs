//! Runtime settings: JSON file on disk, environment overrides, validation.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detector::DetectorConfig;
use crate::error::SettingsError;

pub const ENV_THRESHOLD: &str = "DEVICESHAKE_THRESHOLD";
pub const ENV_COOLDOWN_MS: &str = "DEVICESHAKE_COOLDOWN_MS";
pub const ENV_PULSE_MS: &str = "DEVICESHAKE_PULSE_MS";

/// Haptic feedback settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HapticsConfig {
    pub enabled: bool,
    /// Length of the pulse fired per shake.
    pub pulse_ms: u64,
}

impl Default for HapticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pulse_ms: 200,
        }
    }
}

/// Sample queue between sensor callback and detector worker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Readings buffered before the sensor side starts dropping.
    pub queue_capacity: usize,
    /// Delivery cadence requested from the platform (~60ms UI rate).
    pub nominal_interval_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            nominal_interval_ms: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub detector: DetectorConfig,
    pub haptics: HapticsConfig,
    pub sensor: SensorConfig,
}

impl Settings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_json_str(&content)?;
        info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn from_json_str(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path` when given, falling back to defaults if the file is missing.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(p) => match Self::load_from_file(p) {
                Err(SettingsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %p.display(), "settings file not found, using defaults");
                    Ok(Self::default())
                }
                other => other,
            },
            None => Ok(Self::default()),
        }
    }

    /// Apply `DEVICESHAKE_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), SettingsError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_THRESHOLD) {
            self.detector.threshold = parse_env(ENV_THRESHOLD, &raw)?;
        }
        if let Some(raw) = lookup(ENV_COOLDOWN_MS) {
            self.detector.cooldown_ms = parse_env(ENV_COOLDOWN_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_PULSE_MS) {
            self.haptics.pulse_ms = parse_env(ENV_PULSE_MS, &raw)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let threshold = self.detector.threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(SettingsError::Invalid {
                key: "detector.threshold",
                reason: format!("must be a positive finite number, got {threshold}"),
            });
        }
        if self.sensor.queue_capacity == 0 {
            return Err(SettingsError::Invalid {
                key: "sensor.queue_capacity",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, SettingsError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| SettingsError::Invalid {
        key,
        reason: format!("{raw:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.detector.threshold, 12.0);
        assert_eq!(settings.detector.cooldown_ms, 1000);
        assert!(!settings.detector.reset_cooldown_on_enable);
        assert_eq!(settings.haptics.pulse_ms, 200);
        assert_eq!(settings.sensor.queue_capacity, 256);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings = Settings::from_json_str(r#"{"detector": {"threshold": 9.5}}"#).unwrap();
        assert_eq!(settings.detector.threshold, 9.5);
        assert_eq!(settings.detector.cooldown_ms, 1000);
        assert!(settings.haptics.enabled);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let err = Settings::from_json_str(r#"{"detector": {"threshold": -1.0}}"#).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: "detector.threshold", .. }));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            Settings::from_json_str("{ not json"),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [(ENV_THRESHOLD, "15"), (ENV_COOLDOWN_MS, " 250 ")]
            .into_iter()
            .collect();
        let mut settings = Settings::default();
        settings
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.detector.threshold, 15.0);
        assert_eq!(settings.detector.cooldown_ms, 250);
        assert_eq!(settings.haptics.pulse_ms, 200);
    }

    #[test]
    fn test_env_override_parse_error() {
        let mut settings = Settings::default();
        let err = settings
            .apply_overrides(|k| (k == ENV_COOLDOWN_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: ENV_COOLDOWN_MS, .. }));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let path = Path::new("/nonexistent/deviceshake/settings.json");
        assert_eq!(Settings::load_or_default(Some(path)).unwrap(), Settings::default());
    }
}
