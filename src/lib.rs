//! deviceshake: accelerometer shake detection with debounced events and haptic feedback.
//! Main library: detector core, plugin facade, sensor/haptics adapters, tracing setup.

pub mod cancellation;
pub mod config;
pub mod detector;
pub mod dispatcher;
pub mod error;
pub mod haptics;
pub mod listeners;
pub mod metrics;
pub mod sensor;
pub mod service;
pub mod state_machine;

pub use config::Settings;
pub use detector::{DetectorConfig, IngestOutcome, Sample, ShakeDetector, ShakeEvent};
pub use error::EnableError;
pub use listeners::{ListenerHandle, SHAKE_EVENT};
pub use service::DeviceShake;
pub use state_machine::ListenState;

/// Install the global tracing subscriber. `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
