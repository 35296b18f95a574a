//! Effect dispatch: shake events → haptic pulse + listener notification.
//! Detection never waits on effects: the detector worker pushes onto an unbounded
//! crossbeam channel and a dedicated OS thread renders the effects in order.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel as cb;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::HapticsConfig;
use crate::detector::ShakeEvent;
use crate::error::HapticsError;
use crate::haptics::Haptics;
use crate::listeners::{ListenerRegistry, SHAKE_EVENT};
use crate::metrics::{MetricsRegistry, metric_names};

/// Work for the effect thread.
#[derive(Debug)]
pub enum EffectTask {
    ShakeDetected {
        event: ShakeEvent,
        enqueued_at: Instant,
    },
}

/// Owns the effect channel and thread.
pub struct Dispatcher {
    tx: Mutex<Option<cb::Sender<EffectTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the effect thread.
    pub fn start(
        haptics: Arc<dyn Haptics>,
        listeners: Arc<ListenerRegistry>,
        metrics: Arc<MetricsRegistry>,
        config: HapticsConfig,
    ) -> std::io::Result<Self> {
        let (tx, rx) = cb::unbounded();
        let worker = std::thread::Builder::new()
            .name("shake-effects".into())
            .spawn(move || run_effect_loop(rx, haptics, listeners, metrics, config))?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Sender clone for the detector worker. Sending never blocks. `None` after shutdown.
    pub fn sender(&self) -> Option<cb::Sender<EffectTask>> {
        self.tx.lock().clone()
    }

    /// Close the channel and wait for queued effects to finish.
    /// Senders handed out by `sender()` must be dropped first or this waits for them.
    pub fn shutdown(&self) {
        drop(self.tx.lock().take());
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("effect thread panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_effect_loop(
    rx: cb::Receiver<EffectTask>,
    haptics: Arc<dyn Haptics>,
    listeners: Arc<ListenerRegistry>,
    metrics: Arc<MetricsRegistry>,
    config: HapticsConfig,
) {
    info!("effect loop started");
    while let Ok(task) = rx.recv() {
        handle_effect(task, haptics.as_ref(), &listeners, &metrics, config);
    }
    info!("effect channel closed, exiting effect loop");
}

fn handle_effect(
    task: EffectTask,
    haptics: &dyn Haptics,
    listeners: &ListenerRegistry,
    metrics: &Arc<MetricsRegistry>,
    config: HapticsConfig,
) {
    match task {
        EffectTask::ShakeDetected { event, enqueued_at } => {
            metrics.record(
                metric_names::QUEUE_WAIT_EFFECTS,
                enqueued_at.elapsed().as_micros() as f64,
            );

            if config.enabled {
                let span = metrics.span(metric_names::HAPTIC_PULSE);
                match pulse(haptics, Duration::from_millis(config.pulse_ms)) {
                    Ok(()) => {
                        span.finish();
                    }
                    Err(HapticsError::NoVibrator) => debug!("no vibrator available"),
                    Err(e) => {
                        metrics.increment(metric_names::HAPTIC_FAILURES);
                        warn!(error = %e, "haptic pulse failed");
                    }
                }
            }

            let span = metrics.span(metric_names::LISTENER_NOTIFY);
            let notified = listeners.notify(SHAKE_EVENT, &serde_json::json!({}));
            let notify_us = span.finish();
            info!(
                timestamp_ms = event.timestamp_ms,
                magnitude = event.magnitude,
                listeners = notified,
                notify_us,
                "shake dispatched"
            );
        }
    }
}

fn pulse(haptics: &dyn Haptics, duration: Duration) -> Result<(), HapticsError> {
    if !haptics.has_vibrator() {
        return Err(HapticsError::NoVibrator);
    }
    haptics.vibrate(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haptics::NoHaptics;

    struct CountingHaptics {
        pulses: Mutex<Vec<Duration>>,
    }

    impl Haptics for CountingHaptics {
        fn has_vibrator(&self) -> bool {
            true
        }

        fn vibrate(&self, duration: Duration) -> Result<(), HapticsError> {
            self.pulses.lock().push(duration);
            Ok(())
        }
    }

    fn shake(t: u64) -> EffectTask {
        EffectTask::ShakeDetected {
            event: ShakeEvent {
                timestamp_ms: t,
                magnitude: 20.0,
            },
            enqueued_at: Instant::now(),
        }
    }

    #[test]
    fn test_shake_pulses_and_notifies() {
        let haptics = Arc::new(CountingHaptics {
            pulses: Mutex::new(Vec::new()),
        });
        let listeners = Arc::new(ListenerRegistry::new());
        let (seen_tx, seen_rx) = cb::unbounded();
        listeners
            .add_listener(SHAKE_EVENT, move |payload| {
                let _ = seen_tx.send(payload.clone());
            })
            .unwrap();

        let dispatcher = Dispatcher::start(
            haptics.clone(),
            Arc::clone(&listeners),
            Arc::new(MetricsRegistry::new()),
            HapticsConfig::default(),
        )
        .unwrap();
        let tx = dispatcher.sender().unwrap();
        tx.send(shake(50)).unwrap();
        tx.send(shake(1100)).unwrap();
        drop(tx);
        dispatcher.shutdown();

        assert_eq!(*haptics.pulses.lock(), vec![Duration::from_millis(200); 2]);
        let payloads: Vec<_> = seen_rx.try_iter().collect();
        assert_eq!(payloads, vec![serde_json::json!({}), serde_json::json!({})]);
        assert!(dispatcher.sender().is_none());
    }

    #[test]
    fn test_missing_vibrator_still_notifies() {
        let listeners = Arc::new(ListenerRegistry::new());
        let (seen_tx, seen_rx) = cb::unbounded();
        listeners
            .add_listener(SHAKE_EVENT, move |_| {
                let _ = seen_tx.send(());
            })
            .unwrap();

        let metrics = Arc::new(MetricsRegistry::new());
        let dispatcher = Dispatcher::start(
            Arc::new(NoHaptics),
            Arc::clone(&listeners),
            Arc::clone(&metrics),
            HapticsConfig::default(),
        )
        .unwrap();
        dispatcher.sender().unwrap().send(shake(0)).unwrap();
        dispatcher.shutdown();

        assert_eq!(seen_rx.try_iter().count(), 1);
        assert_eq!(metrics.summary().timings.get(metric_names::HAPTIC_PULSE).map(|s| s.count), None);
        assert_eq!(metrics.count(metric_names::HAPTIC_FAILURES), 0);
    }

    struct BrokenHaptics;

    impl Haptics for BrokenHaptics {
        fn has_vibrator(&self) -> bool {
            true
        }

        fn vibrate(&self, _duration: Duration) -> Result<(), HapticsError> {
            Err(HapticsError::Device("motor stalled".into()))
        }
    }

    #[test]
    fn test_failed_pulse_is_counted_not_timed() {
        let listeners = Arc::new(ListenerRegistry::new());
        let (seen_tx, seen_rx) = cb::unbounded();
        listeners
            .add_listener(SHAKE_EVENT, move |_| {
                let _ = seen_tx.send(());
            })
            .unwrap();

        let metrics = Arc::new(MetricsRegistry::new());
        let dispatcher = Dispatcher::start(
            Arc::new(BrokenHaptics),
            Arc::clone(&listeners),
            Arc::clone(&metrics),
            HapticsConfig::default(),
        )
        .unwrap();
        let tx = dispatcher.sender().unwrap();
        tx.send(shake(0)).unwrap();
        tx.send(shake(2000)).unwrap();
        drop(tx);
        dispatcher.shutdown();

        assert_eq!(seen_rx.try_iter().count(), 2);
        assert_eq!(metrics.count(metric_names::HAPTIC_FAILURES), 2);
        assert!(!metrics.summary().timings.contains_key(metric_names::HAPTIC_PULSE));
    }
}
