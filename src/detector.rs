//! Shake detection core: first-difference magnitude threshold with cooldown.
//! Pipeline per sample: validity gate → baseline → delta norm → threshold → cooldown.
//! The first difference between consecutive samples rejects gravity and slow tilt;
//! only sudden jerks exceed the threshold.

use serde::{Deserialize, Serialize};

/// One accelerometer reading in m/s².
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Sample {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm of the component-wise difference `self - other`.
    #[inline]
    pub fn delta_magnitude(&self, other: &Sample) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Detector tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Delta magnitude (m/s²) that must be strictly exceeded to signal a shake.
    pub threshold: f32,
    /// Minimum time between two emitted shakes.
    pub cooldown_ms: u32,
    /// Forget the last shake time on every `enable()`.
    pub reset_cooldown_on_enable: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 12.0,
            cooldown_ms: 1000,
            reset_cooldown_on_enable: false,
        }
    }
}

/// An emitted shake.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShakeEvent {
    pub timestamp_ms: u64,
    pub magnitude: f32,
}

/// What a single `ingest` call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    /// Detector disabled; sample ignored.
    Inactive,
    /// Sample had a NaN or infinite component; state untouched.
    InvalidSample,
    /// First sample since enable; stored as baseline.
    Baselined,
    BelowThreshold { magnitude: f32 },
    /// Over threshold but inside the cooldown window.
    CoolingDown { magnitude: f32, remaining_ms: u64 },
    Shake(ShakeEvent),
}

impl IngestOutcome {
    pub fn into_event(self) -> Option<ShakeEvent> {
        match self {
            IngestOutcome::Shake(event) => Some(event),
            _ => None,
        }
    }
}

/// Stateful shake detector. Not internally synchronized; callers serialize access.
#[derive(Debug)]
pub struct ShakeDetector {
    config: DetectorConfig,
    previous_sample: Option<Sample>,
    last_shake_ms: Option<u64>,
    active: bool,
}

impl ShakeDetector {
    /// Create a detector in the inactive state.
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            previous_sample: None,
            last_shake_ms: None,
            active: false,
        }
    }

    /// Start accepting samples. From inactive, drops the baseline so the next
    /// sample only re-baselines. No-op while already active.
    pub fn enable(&mut self) {
        if self.active {
            return;
        }
        self.active = true;
        self.previous_sample = None;
        if self.config.reset_cooldown_on_enable {
            self.last_shake_ms = None;
        }
    }

    /// Stop accepting samples. Further `ingest` calls are no-ops.
    pub fn disable(&mut self) {
        self.active = false;
    }

    /// Feed one sample taken at `now_ms`. Returns the shake it triggered, if any.
    #[inline]
    pub fn ingest(&mut self, sample: Sample, now_ms: u64) -> Option<ShakeEvent> {
        self.ingest_detailed(sample, now_ms).into_event()
    }

    /// Same transition as `ingest`, reporting why no event fired.
    pub fn ingest_detailed(&mut self, sample: Sample, now_ms: u64) -> IngestOutcome {
        if !self.active {
            return IngestOutcome::Inactive;
        }
        if !sample.is_finite() {
            return IngestOutcome::InvalidSample;
        }

        let previous = match self.previous_sample.replace(sample) {
            Some(previous) => previous,
            None => return IngestOutcome::Baselined,
        };

        let magnitude = sample.delta_magnitude(&previous);
        // NaN compares false and falls through here as well.
        if !(magnitude > self.config.threshold) {
            return IngestOutcome::BelowThreshold { magnitude };
        }

        let cooldown = u64::from(self.config.cooldown_ms);
        if let Some(last) = self.last_shake_ms {
            let elapsed = now_ms.saturating_sub(last);
            if elapsed < cooldown {
                return IngestOutcome::CoolingDown {
                    magnitude,
                    remaining_ms: cooldown - elapsed,
                };
            }
        }

        self.last_shake_ms = Some(now_ms);
        IngestOutcome::Shake(ShakeEvent {
            timestamp_ms: now_ms,
            magnitude,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a baseline sample is held (i.e. the next sample can produce a delta).
    pub fn is_baselined(&self) -> bool {
        self.previous_sample.is_some()
    }

    pub fn last_shake_ms(&self) -> Option<u64> {
        self.last_shake_ms
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}

impl Default for ShakeDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}
