//! Recorded accelerometer trace playback.
//! Trace format, one reading per line: CSV `t_ms,x,y,z` or JSON
//! `{"t_ms":..,"x":..,"y":..,"z":..}`. Blank lines and `#` comments are skipped,
//! as is a `t_ms,...` CSV header.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{Delivery, SampleSink, SensorReading, SensorSource};
use crate::error::{ReplayError, SensorError};

const SEND_RETRY: Duration = Duration::from_millis(50);

#[derive(Debug, Deserialize)]
struct TraceLine {
    t_ms: u64,
    x: f32,
    y: f32,
    z: f32,
}

/// How fast a trace is played back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Back-to-back, waiting only for queue space.
    AsFastAsPossible,
    /// Sleep for the recorded gap between readings.
    Recorded,
}

/// Plays a fixed list of readings into the detector on a dedicated thread.
pub struct ReplaySource {
    name: String,
    readings: Arc<Vec<SensorReading>>,
    pacing: Pacing,
    stop_flag: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<usize>>>,
}

impl ReplaySource {
    pub fn from_readings(name: impl Into<String>, readings: Vec<SensorReading>) -> Self {
        Self {
            name: name.into(),
            readings: Arc::new(readings),
            pacing: Pacing::AsFastAsPossible,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Load a trace file. The source is named after the file.
    pub fn load_from_file(path: &Path) -> Result<Self, ReplayError> {
        let content = std::fs::read_to_string(path)?;
        let readings = parse_trace(&content)?;
        info!(path = %path.display(), readings = readings.len(), "trace loaded");
        Ok(Self::from_readings(path.display().to_string(), readings))
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Block until playback ends on its own. Returns the number of readings delivered.
    pub fn wait_until_finished(&self) -> usize {
        let handle = self.worker.lock().take();
        match handle {
            Some(h) => h.join().unwrap_or_else(|_| {
                warn!(sensor = %self.name, "replay thread panicked");
                0
            }),
            None => 0,
        }
    }
}

impl SensorSource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        true
    }

    /// The requested interval is ignored: a trace carries its own timestamps.
    fn register(&self, sink: SampleSink, _interval: Duration) -> Result<(), SensorError> {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(SensorError::AlreadyRegistered(self.name.clone()));
        }
        self.stop_flag.store(false, Ordering::SeqCst);

        let readings = Arc::clone(&self.readings);
        let stop_flag = Arc::clone(&self.stop_flag);
        let pacing = self.pacing;
        let handle = std::thread::Builder::new()
            .name("sensor-replay".into())
            .spawn(move || play(&readings, pacing, &sink, &stop_flag))?;
        *worker = Some(handle);

        info!(sensor = %self.name, readings = self.readings.len(), pacing = ?self.pacing, "replay started");
        Ok(())
    }

    fn unregister(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let delivered = self.wait_until_finished();
        debug!(sensor = %self.name, delivered, "replay unregistered");
    }
}

/// Playback loop. The sink is dropped on return, which closes the stream.
fn play(readings: &[SensorReading], pacing: Pacing, sink: &SampleSink, stop_flag: &AtomicBool) -> usize {
    let mut delivered = 0;
    let mut previous_ms: Option<u64> = None;

    for reading in readings {
        if pacing == Pacing::Recorded {
            if let Some(prev) = previous_ms {
                let gap = reading.timestamp_ms.saturating_sub(prev);
                if gap > 0 {
                    std::thread::sleep(Duration::from_millis(gap));
                }
            }
            previous_ms = Some(reading.timestamp_ms);
        }

        loop {
            if stop_flag.load(Ordering::Relaxed) {
                return delivered;
            }
            match sink.send_timeout(*reading, SEND_RETRY) {
                Delivery::Queued => break,
                Delivery::Dropped => continue,
                Delivery::Closed => return delivered,
            }
        }
        delivered += 1;
    }
    delivered
}

/// Parse a trace file body into readings, enforcing non-decreasing timestamps.
pub fn parse_trace(content: &str) -> Result<Vec<SensorReading>, ReplayError> {
    let mut readings = Vec::new();
    let mut last_ms: Option<u64> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("t_ms") {
            continue;
        }

        let reading = if line.starts_with('{') {
            let parsed: TraceLine = serde_json::from_str(line).map_err(|e| ReplayError::Malformed {
                line: line_no,
                reason: e.to_string(),
            })?;
            SensorReading::new(parsed.x, parsed.y, parsed.z, parsed.t_ms)
        } else {
            parse_csv_line(line, line_no)?
        };

        if last_ms.is_some_and(|last| reading.timestamp_ms < last) {
            return Err(ReplayError::OutOfOrder {
                line: line_no,
                timestamp_ms: reading.timestamp_ms,
            });
        }
        last_ms = Some(reading.timestamp_ms);
        readings.push(reading);
    }
    Ok(readings)
}

fn parse_csv_line(line: &str, line_no: usize) -> Result<SensorReading, ReplayError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(ReplayError::Malformed {
            line: line_no,
            reason: format!("expected 4 fields (t_ms,x,y,z), got {}", fields.len()),
        });
    }
    let malformed = |what: &str, e: &dyn std::fmt::Display| ReplayError::Malformed {
        line: line_no,
        reason: format!("bad {what}: {e}"),
    };
    let t_ms: u64 = fields[0].parse().map_err(|e| malformed("timestamp", &e))?;
    let x: f32 = fields[1].parse().map_err(|e| malformed("x", &e))?;
    let y: f32 = fields[2].parse().map_err(|e| malformed("y", &e))?;
    let z: f32 = fields[3].parse().map_err(|e| malformed("z", &e))?;
    Ok(SensorReading::new(x, y, z, t_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_parse_mixed_trace() {
        let trace = "\
# recorded on a desk
t_ms,x,y,z
0, 0.0, 0.0, 9.81

50,0.0,0.0,29.81
{\"t_ms\": 100, \"x\": 1.5, \"y\": -2.0, \"z\": 9.81}
";
        let readings = parse_trace(trace).unwrap();
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[1], SensorReading::new(0.0, 0.0, 29.81, 50));
        assert_eq!(readings[2], SensorReading::new(1.5, -2.0, 9.81, 100));
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        let err = parse_trace("0,1,2\n").unwrap_err();
        assert!(matches!(err, ReplayError::Malformed { line: 1, .. }));
    }

    #[test]
    fn test_parse_rejects_bad_number() {
        let err = parse_trace("0,0,0,0\n10,zero,0,0\n").unwrap_err();
        assert!(matches!(err, ReplayError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_parse_rejects_out_of_order() {
        let err = parse_trace("100,0,0,0\n50,0,0,0\n").unwrap_err();
        assert!(matches!(err, ReplayError::OutOfOrder { line: 2, timestamp_ms: 50 }));
    }

    #[test]
    fn test_replay_delivers_all_then_closes() {
        let readings: Vec<SensorReading> = (0..10)
            .map(|i| SensorReading::new(0.0, 0.0, i as f32, i * 10))
            .collect();
        let source = ReplaySource::from_readings("trace", readings.clone());
        // smaller than the trace, so playback has to wait for space
        let (sink, rx) = SampleSink::bounded(2);
        source.register(sink, Duration::from_millis(60)).unwrap();

        let received: Vec<SensorReading> = rx.iter().collect();
        assert_eq!(received, readings);
        assert_eq!(source.wait_until_finished(), 10);
    }

    #[test]
    fn test_unregister_stops_playback() {
        let readings: Vec<SensorReading> = (0..100)
            .map(|i| SensorReading::new(0.0, 0.0, 0.0, i))
            .collect();
        let source = ReplaySource::from_readings("trace", readings);
        let (sink, rx) = SampleSink::bounded(1);
        source.register(sink, Duration::from_millis(60)).unwrap();
        source.unregister();
        // stream closes without the full trace being consumed
        assert!(rx.iter().count() < 100);
    }

    #[test]
    fn test_recorded_pacing_sleeps_for_gaps() {
        let readings = vec![
            SensorReading::new(0.0, 0.0, 0.0, 1000),
            SensorReading::new(0.0, 0.0, 1.0, 1030),
            SensorReading::new(0.0, 0.0, 2.0, 1030),
            SensorReading::new(0.0, 0.0, 3.0, 1080),
        ];
        let source = ReplaySource::from_readings("paced", readings.clone()).with_pacing(Pacing::Recorded);
        let (sink, rx) = SampleSink::bounded(8);

        let started = Instant::now();
        source.register(sink, Duration::from_millis(60)).unwrap();
        let received: Vec<SensorReading> = rx.iter().collect();
        let elapsed = started.elapsed();

        assert_eq!(received, readings);
        // gaps of 30, 0 and 50 ms; the absolute start time is not waited for
        assert!(elapsed >= Duration::from_millis(80), "replayed in {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1000), "replayed in {elapsed:?}");
        assert_eq!(source.wait_until_finished(), 4);
    }
}
