//! deviceshake CLI: replay recorded accelerometer traces through the detector.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use deviceshake::haptics::LogHaptics;
use deviceshake::sensor::replay::Pacing;
use deviceshake::sensor::ReplaySource;
use deviceshake::{DeviceShake, Settings, SHAKE_EVENT};

#[derive(Parser)]
#[command(name = "deviceshake", version, about = "Accelerometer shake detection")]
struct Cli {
    /// Settings file (JSON). Missing file means defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a recorded trace (CSV `t_ms,x,y,z` or JSON lines) and print each shake.
    Replay {
        trace: PathBuf,

        /// Override the delta-magnitude threshold (m/s²).
        #[arg(long)]
        threshold: Option<f32>,

        /// Override the cooldown between shakes.
        #[arg(long)]
        cooldown_ms: Option<u32>,

        /// Sleep for the recorded gaps instead of replaying as fast as possible.
        #[arg(long)]
        realtime: bool,
    },
    /// Print the effective settings.
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    deviceshake::init_tracing("deviceshake=info", cli.log_json);

    let mut settings = Settings::load_or_default(cli.config.as_deref())
        .context("failed to load settings")?;
    settings.apply_env().context("invalid DEVICESHAKE_* environment override")?;

    match cli.command {
        Commands::Replay {
            trace,
            threshold,
            cooldown_ms,
            realtime,
        } => {
            if let Some(t) = threshold {
                settings.detector.threshold = t;
            }
            if let Some(c) = cooldown_ms {
                settings.detector.cooldown_ms = c;
            }
            settings.validate().context("invalid command-line override")?;
            replay(settings, &trace, realtime)
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn replay(settings: Settings, trace: &Path, realtime: bool) -> Result<()> {
    let pacing = if realtime { Pacing::Recorded } else { Pacing::AsFastAsPossible };
    let source = Arc::new(
        ReplaySource::load_from_file(trace)
            .with_context(|| format!("failed to load trace {}", trace.display()))?
            .with_pacing(pacing),
    );

    let plugin = DeviceShake::new(settings, source.clone(), Arc::new(LogHaptics))
        .context("failed to start effect dispatcher")?;

    let shakes = Arc::new(AtomicU64::new(0));
    {
        let shakes = Arc::clone(&shakes);
        plugin.add_listener(SHAKE_EVENT, move |payload| {
            let n = shakes.fetch_add(1, Ordering::SeqCst) + 1;
            let line = serde_json::json!({ "shake": n, "payload": payload });
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        })?;
    }

    plugin.enable_listening()?;
    plugin.wait_for_sensor_end();
    plugin.stop_listening();

    let summary = plugin.metrics_summary();
    drop(plugin);

    info!(
        readings = source.len(),
        shakes = shakes.load(Ordering::SeqCst),
        "replay finished"
    );
    eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
