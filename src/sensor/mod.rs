//! Sensor side of the pipeline: sources push `SensorReading`s into a bounded
//! crossbeam channel drained by the detector worker.
//! A source never blocks its delivery thread; when the queue is full the reading is dropped.

pub mod replay;

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel as cb;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::detector::Sample;
use crate::error::SensorError;
use crate::metrics::{MetricsRegistry, metric_names};

pub use replay::ReplaySource;

/// One sample plus its monotonic arrival time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sample: Sample,
    pub timestamp_ms: u64,
}

impl SensorReading {
    pub fn new(x: f32, y: f32, z: f32, timestamp_ms: u64) -> Self {
        Self {
            sample: Sample::new(x, y, z),
            timestamp_ms,
        }
    }
}

/// Sending half handed to a source on registration.
#[derive(Clone)]
pub struct SampleSink {
    tx: cb::Sender<SensorReading>,
    metrics: Option<Arc<MetricsRegistry>>,
}

/// Result of offering a reading to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; reading dropped.
    Dropped,
    /// Detector side gone; the source should stop.
    Closed,
}

impl SampleSink {
    /// Create a sink and the matching receiver with room for `capacity` readings.
    pub fn bounded(capacity: usize) -> (Self, cb::Receiver<SensorReading>) {
        let (tx, rx) = cb::bounded(capacity.max(1));
        (Self { tx, metrics: None }, rx)
    }

    /// Count dropped readings in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[inline]
    pub fn offer(&self, reading: SensorReading) -> Delivery {
        match self.tx.try_send(reading) {
            Ok(()) => Delivery::Queued,
            Err(cb::TrySendError::Full(_)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.increment(metric_names::SAMPLES_DROPPED);
                }
                Delivery::Dropped
            }
            Err(cb::TrySendError::Disconnected(_)) => Delivery::Closed,
        }
    }

    /// Wait up to `timeout` for queue space. For recorded playback, where losing
    /// readings would change the result.
    pub fn send_timeout(&self, reading: SensorReading, timeout: Duration) -> Delivery {
        match self.tx.send_timeout(reading, timeout) {
            Ok(()) => Delivery::Queued,
            Err(cb::SendTimeoutError::Timeout(_)) => Delivery::Dropped,
            Err(cb::SendTimeoutError::Disconnected(_)) => Delivery::Closed,
        }
    }
}

/// Platform accelerometer adapter. Injected into `DeviceShake`; the detector never owns it.
pub trait SensorSource: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the device has the sensor at all.
    fn is_available(&self) -> bool;

    /// Start delivering readings into `sink`, roughly one every `interval`.
    /// The interval is a hint; platforms may deliver faster or slower.
    fn register(&self, sink: SampleSink, interval: Duration) -> Result<(), SensorError>;

    /// Stop delivery and release the sink. Safe to call when not registered.
    fn unregister(&self);
}

/// Source fed by an external callback (`on_sample`), e.g. a platform sensor listener.
pub struct PushSource {
    name: String,
    available: bool,
    sink: Mutex<Option<SampleSink>>,
    interval: Mutex<Option<Duration>>,
}

impl PushSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: true,
            sink: Mutex::new(None),
            interval: Mutex::new(None),
        }
    }

    /// A source that reports no hardware, for devices without an accelerometer.
    pub fn unavailable(name: impl Into<String>) -> Self {
        Self {
            available: false,
            ..Self::new(name)
        }
    }

    /// Deliver one reading. Returns false if nobody is listening or the queue is full.
    pub fn on_sample(&self, x: f32, y: f32, z: f32, timestamp_ms: u64) -> bool {
        let sink = self.sink.lock();
        match sink.as_ref() {
            Some(sink) => sink.offer(SensorReading::new(x, y, z, timestamp_ms)) == Delivery::Queued,
            None => false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Delivery cadence asked for by the current registration, for the platform
    /// binding to configure its listener with.
    pub fn requested_interval(&self) -> Option<Duration> {
        *self.interval.lock()
    }
}

impl SensorSource for PushSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn register(&self, sink: SampleSink, interval: Duration) -> Result<(), SensorError> {
        if !self.available {
            return Err(SensorError::Refused(format!("{} has no accelerometer", self.name)));
        }
        let mut slot = self.sink.lock();
        if slot.is_some() {
            return Err(SensorError::AlreadyRegistered(self.name.clone()));
        }
        *slot = Some(sink);
        *self.interval.lock() = Some(interval);
        info!(sensor = %self.name, interval_ms = interval.as_millis() as u64, "push source registered");
        Ok(())
    }

    fn unregister(&self) {
        if self.sink.lock().take().is_some() {
            *self.interval.lock() = None;
            debug!(sensor = %self.name, "push source unregistered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UI_RATE: Duration = Duration::from_millis(60);

    #[test]
    fn test_push_source_delivers_after_register() {
        let source = PushSource::new("test");
        assert!(!source.on_sample(0.0, 0.0, 9.8, 0));

        let (sink, rx) = SampleSink::bounded(4);
        source.register(sink, UI_RATE).unwrap();
        assert_eq!(source.requested_interval(), Some(UI_RATE));
        assert!(source.on_sample(0.0, 0.0, 9.8, 10));
        assert_eq!(rx.try_recv().unwrap(), SensorReading::new(0.0, 0.0, 9.8, 10));

        source.unregister();
        assert!(!source.is_registered());
        assert_eq!(source.requested_interval(), None);
        assert!(!source.on_sample(0.0, 0.0, 9.8, 20));
    }

    #[test]
    fn test_push_source_rejects_double_register() {
        let source = PushSource::new("test");
        let (a, _rx_a) = SampleSink::bounded(1);
        let (b, _rx_b) = SampleSink::bounded(1);
        source.register(a, UI_RATE).unwrap();
        assert!(matches!(source.register(b, UI_RATE), Err(SensorError::AlreadyRegistered(_))));
    }

    #[test]
    fn test_full_queue_drops() {
        let (sink, rx) = SampleSink::bounded(1);
        assert_eq!(sink.offer(SensorReading::new(0.0, 0.0, 0.0, 0)), Delivery::Queued);
        assert_eq!(sink.offer(SensorReading::new(0.0, 0.0, 0.0, 1)), Delivery::Dropped);
        drop(rx);
        assert_eq!(sink.offer(SensorReading::new(0.0, 0.0, 0.0, 2)), Delivery::Closed);
    }

    #[test]
    fn test_unavailable_source() {
        let source = PushSource::unavailable("none");
        assert!(!source.is_available());
        let (sink, _rx) = SampleSink::bounded(1);
        assert!(matches!(source.register(sink, UI_RATE), Err(SensorError::Refused(_))));
    }
}
