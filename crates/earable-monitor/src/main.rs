//! Earable monitor: live acquisition and event detection
//!
//! Runs against the simulated earable; a BLE transport would push its
//! notification frames into the same queue.

use anyhow::Context;
use earable_core::EventKind;
use earable_monitor::{spawn_monitor, BoxedSink, DirectorySink, MonitorConfig};
use earable_simulation::{start_frame_stream, GesturePattern, StreamCommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let path = PathBuf::from(path);
            MonitorConfig::load(&path).with_context(|| format!("loading {}", path.display()))?
        }
        None => MonitorConfig::default(),
    };

    let sink = match &config.runtime.output_dir {
        Some(dir) => {
            let echo = serde_json::to_value(&config).context("serialising config")?;
            let sink = DirectorySink::create(dir, echo).context("creating recording directory")?;
            Some(Box::new(sink) as BoxedSink)
        }
        None => None,
    };

    let (monitor, frames) = spawn_monitor(&config, sink, None).context("starting monitor")?;
    let (control, stream) =
        start_frame_stream(config.simulator_stream(None), frames).context("starting simulated device")?;
    control.send(StreamCommand::Start).await?;

    // a short demo sequence of gestures once the windows have filled
    for (delay, name) in [(6.0, "blink"), (9.0, "left_gaze"), (12.0, "right_gaze"), (15.0, "jaw_clench")] {
        if let Some(pattern) = GesturePattern::preset(name) {
            control.send(StreamCommand::Schedule { delay, pattern }).await?;
        }
    }

    let mut detections = monitor.subscribe();
    info!("monitoring; press Ctrl+C to stop");
    loop {
        tokio::select! {
            event = detections.recv() => match event {
                Ok(event) => info!(kind = %event.kind(), ?event, "detection"),
                Err(e) => warn!(error = %e, "detection feed interrupted"),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl+C")?;
                break;
            }
        }
    }

    monitor.mark(EventKind::Generic);
    drop(control);
    let stream_stats = stream.await??;
    let report = monitor.shutdown().await?;
    info!(
        frames_sent = stream_stats.frames_sent,
        eeg_samples = report.eeg_samples,
        events = report.events,
        "session finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
