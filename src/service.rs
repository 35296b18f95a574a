//! Plugin facade: enable/stop listening, listener management, detector worker.
//! Manages: sensor source → sample queue → detector worker → effect dispatcher.
//! The detector sits behind a mutex so worker-thread `ingest` and caller-thread
//! enable/disable never race.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel as cb;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::cancellation::{SessionGeneration, SessionGuard};
use crate::config::Settings;
use crate::detector::{IngestOutcome, ShakeDetector};
use crate::dispatcher::{Dispatcher, EffectTask};
use crate::error::{EnableError, ListenerError};
use crate::haptics::Haptics;
use crate::listeners::{ListenerHandle, ListenerRegistry};
use crate::metrics::{MetricsRegistry, MetricsSnapshot, metric_names};
use crate::sensor::{SampleSink, SensorReading, SensorSource};
use crate::state_machine::{ListenState, ListenStateMachine};

/// How often an idle worker re-checks its session guard.
const WORKER_POLL: Duration = Duration::from_millis(50);

/// Shake detection plugin bound to one sensor.
pub struct DeviceShake {
    settings: Settings,
    sensor: Arc<dyn SensorSource>,
    detector: Arc<Mutex<ShakeDetector>>,
    state_machine: Arc<ListenStateMachine>,
    sessions: SessionGeneration,
    listeners: Arc<ListenerRegistry>,
    metrics: Arc<MetricsRegistry>,
    dispatcher: Dispatcher,
    worker: Mutex<Option<JoinHandle<()>>>,
    // Serializes enable/stop against each other.
    lifecycle: Mutex<()>,
}

impl DeviceShake {
    /// Build the plugin and start its effect thread. Listening starts with `enable_listening`.
    pub fn new(
        settings: Settings,
        sensor: Arc<dyn SensorSource>,
        haptics: Arc<dyn Haptics>,
    ) -> std::io::Result<Self> {
        let listeners = Arc::new(ListenerRegistry::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let dispatcher = Dispatcher::start(
            haptics,
            Arc::clone(&listeners),
            Arc::clone(&metrics),
            settings.haptics,
        )?;

        info!(
            sensor = sensor.name(),
            threshold = settings.detector.threshold,
            cooldown_ms = settings.detector.cooldown_ms,
            "device shake plugin loaded"
        );

        Ok(Self {
            settings,
            detector: Arc::new(Mutex::new(ShakeDetector::new(settings.detector))),
            sensor,
            state_machine: Arc::new(ListenStateMachine::new()),
            sessions: SessionGeneration::new(),
            listeners,
            metrics,
            dispatcher,
            worker: Mutex::new(None),
            lifecycle: Mutex::new(()),
        })
    }

    /// Subscribe to the accelerometer and start detecting. No-op if already listening.
    pub fn enable_listening(&self) -> Result<(), EnableError> {
        let _lifecycle = self.lifecycle.lock();
        if self.state_machine.is_listening() {
            return Ok(());
        }
        // A finite source that ran dry ended its session; release it before re-registering.
        if self.join_worker() {
            self.sensor.unregister();
        }

        if !self.sensor.is_available() {
            warn!(sensor = self.sensor.name(), "enable rejected: accelerometer unavailable");
            return Err(EnableError::SensorUnavailable);
        }

        let (sink, rx) = SampleSink::bounded(self.settings.sensor.queue_capacity);
        let sink = sink.with_metrics(Arc::clone(&self.metrics));

        // Enable before registering so the first delivered reading becomes the baseline.
        self.detector.lock().enable();
        let interval = Duration::from_millis(self.settings.sensor.nominal_interval_ms);
        if let Err(e) = self.sensor.register(sink, interval) {
            self.detector.lock().disable();
            warn!(sensor = self.sensor.name(), error = %e, "enable rejected: registration failed");
            return Err(EnableError::RegistrationFailed(e));
        }

        // Listening before the worker runs, so a stream that ends at once still lands in Stopped.
        let _ = self.state_machine.transition(ListenState::Listening);
        let guard = self.sessions.advance();
        let worker = match self.spawn_worker(rx, guard) {
            Ok(handle) => handle,
            Err(e) => {
                self.sensor.unregister();
                self.sessions.cancel();
                self.detector.lock().disable();
                self.state_machine.force_stop();
                return Err(EnableError::RegistrationFailed(e.into()));
            }
        };
        *self.worker.lock() = Some(worker);

        info!(
            sensor = self.sensor.name(),
            session = self.sessions.current_generation(),
            "started listening for shake events"
        );
        Ok(())
    }

    /// Unsubscribe and stop detecting. Always succeeds.
    pub fn stop_listening(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.sensor.unregister();
        self.sessions.cancel();
        self.detector.lock().disable();
        self.join_worker();
        if self.state_machine.is_listening() {
            self.state_machine.force_stop();
            info!(sensor = self.sensor.name(), "stopped listening for shake events");
        }
    }

    /// Block until the sensor closes its stream and every queued reading is processed.
    /// The plugin is back in `Stopped` afterwards. Returns immediately when not
    /// listening. Used for finite sources such as replays.
    pub fn wait_for_sensor_end(&self) {
        self.join_worker();
    }

    pub fn add_listener<F>(&self, event: &str, callback: F) -> Result<ListenerHandle, ListenerError>
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.listeners.add_listener(event, callback)
    }

    pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
        self.listeners.remove_listener(handle)
    }

    pub fn remove_all_listeners(&self) {
        self.listeners.remove_all_listeners();
    }

    pub fn state(&self) -> ListenState {
        self.state_machine.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ListenState> {
        self.state_machine.subscribe()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn metrics_summary(&self) -> MetricsSnapshot {
        self.metrics.summary()
    }

    fn spawn_worker(
        &self,
        rx: cb::Receiver<SensorReading>,
        guard: SessionGuard,
    ) -> std::io::Result<JoinHandle<()>> {
        let detector = Arc::clone(&self.detector);
        let state_machine = Arc::clone(&self.state_machine);
        let metrics = Arc::clone(&self.metrics);
        let effects = self.dispatcher.sender();
        std::thread::Builder::new()
            .name("shake-detector".into())
            .spawn(move || run_detector_loop(rx, guard, detector, state_machine, metrics, effects))
    }

    /// Join the worker if there is one. Returns whether a worker was reaped.
    fn join_worker(&self) -> bool {
        let handle = self.worker.lock().take();
        match handle {
            Some(handle) => {
                if handle.join().is_err() {
                    warn!("detector worker panicked");
                }
                true
            }
            None => false,
        }
    }
}

impl Drop for DeviceShake {
    fn drop(&mut self) {
        self.stop_listening();
        self.dispatcher.shutdown();
    }
}

/// Detector worker: drains readings until the session ends or the sensor closes the stream.
fn run_detector_loop(
    rx: cb::Receiver<SensorReading>,
    guard: SessionGuard,
    detector: Arc<Mutex<ShakeDetector>>,
    state_machine: Arc<ListenStateMachine>,
    metrics: Arc<MetricsRegistry>,
    effects: Option<cb::Sender<EffectTask>>,
) {
    debug!(session = guard.my_generation(), "detector loop started");

    loop {
        if !guard.should_continue() {
            debug!(session = guard.my_generation(), "detector loop stopping");
            break;
        }

        let reading = match rx.recv_timeout(WORKER_POLL) {
            Ok(reading) => reading,
            Err(cb::RecvTimeoutError::Timeout) => continue,
            Err(cb::RecvTimeoutError::Disconnected) => {
                // Nobody else ends this session, so stop here. Disable first:
                // a new session can only start once the state reads Stopped.
                if guard.should_continue() {
                    detector.lock().disable();
                    state_machine.force_stop();
                }
                info!(session = guard.my_generation(), "sample stream closed, stopped listening");
                break;
            }
        };

        let span = metrics.span(metric_names::INGEST);
        let outcome = detector.lock().ingest_detailed(reading.sample, reading.timestamp_ms);
        span.finish();
        metrics.increment(metric_names::SAMPLES_INGESTED);

        match outcome {
            IngestOutcome::Shake(event) => {
                metrics.increment(metric_names::SHAKES_EMITTED);
                debug!(
                    timestamp_ms = event.timestamp_ms,
                    magnitude = event.magnitude,
                    "shake detected"
                );
                let task = EffectTask::ShakeDetected {
                    event,
                    enqueued_at: Instant::now(),
                };
                if !effects.as_ref().is_some_and(|tx| tx.send(task).is_ok()) {
                    warn!("effect dispatcher closed, shake dropped");
                }
            }
            IngestOutcome::CoolingDown {
                magnitude,
                remaining_ms,
            } => {
                metrics.increment(metric_names::SHAKES_SUPPRESSED);
                debug!(magnitude, remaining_ms, "shake suppressed by cooldown");
            }
            IngestOutcome::InvalidSample => {
                debug!(sample = ?reading.sample, "non-finite sample ignored");
            }
            other => trace!(outcome = ?other, timestamp_ms = reading.timestamp_ms, "sample"),
        }
    }
}
