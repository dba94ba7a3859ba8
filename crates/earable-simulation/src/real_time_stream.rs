//! Real-time frame stream standing in for the BLE transport

use crate::earable_simulator::{EarableSimulator, SimulatorConfig};
use crate::signal_patterns::GesturePattern;
use earable_core::{EarableError, EarableResult, HostTimestamp, RawFrame};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for real-time streaming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub simulator: SimulatorConfig,
    /// Simulated seconds generated per tick
    pub chunk_duration: f64,
    /// Ticks per second
    pub update_rate: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            simulator: SimulatorConfig::default(),
            chunk_duration: 0.1,
            update_rate: 10.0,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> EarableResult<()> {
        if !(self.chunk_duration > 0.0 && self.update_rate > 0.0) {
            return Err(EarableError::config("stream chunk duration and update rate must be positive"));
        }
        self.simulator.validate()
    }

    fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.update_rate)
    }
}

/// Commands for controlling the stream
#[derive(Debug, Clone)]
pub enum StreamCommand {
    Start,
    /// Halt and rewind the device clock and sequence counter
    Stop,
    Pause,
    Resume,
    /// Inject a gesture `delay` seconds from now
    Schedule { delay: f64, pattern: GesturePattern },
    SetLinkQuality { drop_probability: f64, duplicate_probability: f64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub is_running: bool,
    pub chunks_generated: u64,
    pub frames_sent: u64,
    pub simulated_seconds: f64,
    /// Wall time spent generating the last chunk (s)
    pub last_chunk_time: f64,
}

/// Feeds simulator frames into a transport queue at wall-clock pace
pub struct RealTimeFrameStream {
    config: StreamConfig,
    simulator: Arc<Mutex<EarableSimulator>>,
    frames: mpsc::UnboundedSender<RawFrame>,
    control_receiver: mpsc::Receiver<StreamCommand>,
    control_sender: Option<mpsc::Sender<StreamCommand>>,
    stats: Arc<Mutex<StreamStats>>,
}

impl RealTimeFrameStream {
    pub fn new(config: StreamConfig, frames: mpsc::UnboundedSender<RawFrame>) -> EarableResult<Self> {
        config.validate()?;
        let simulator = EarableSimulator::new(config.simulator.clone())?;
        let (control_sender, control_receiver) = mpsc::channel(32);

        Ok(Self {
            config,
            simulator: Arc::new(Mutex::new(simulator)),
            frames,
            control_receiver,
            control_sender: Some(control_sender),
            stats: Arc::new(Mutex::new(StreamStats::default())),
        })
    }

    /// Sender for control commands; `None` once the stream is running
    pub fn control_handle(&self) -> Option<mpsc::Sender<StreamCommand>> {
        self.control_sender.clone()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub async fn stats(&self) -> StreamStats {
        *self.stats.lock().await
    }

    pub async fn is_running(&self) -> bool {
        self.stats.lock().await.is_running
    }

    /// Drive the stream until the control channel closes or the transport
    /// receiver goes away
    pub async fn run(&mut self) -> EarableResult<StreamStats> {
        // only external handles may keep the control channel open
        self.control_sender = None;
        let mut ticker = interval(self.config.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            update_rate = self.config.update_rate,
            chunk_ms = self.config.chunk_duration * 1000.0,
            "frame stream ready"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.stats.lock().await.is_running {
                        continue;
                    }
                    if !self.emit_chunk().await? {
                        info!("transport receiver closed, frame stream ending");
                        break;
                    }
                }

                command = self.control_receiver.recv() => {
                    match command {
                        Some(command) => self.handle(command).await,
                        None => {
                            info!("frame stream control channel closed");
                            break;
                        }
                    }
                }
            }
        }

        let mut stats = self.stats.lock().await;
        stats.is_running = false;
        Ok(*stats)
    }

    /// Generate and forward one chunk; false once nobody is listening
    async fn emit_chunk(&mut self) -> EarableResult<bool> {
        let started = Instant::now();
        let frames = {
            let mut sim = self.simulator.lock().await;
            sim.generate(self.config.chunk_duration)?
        };
        let elapsed = started.elapsed();

        let count = frames.len() as u64;
        for frame in frames {
            if self.frames.send(frame).is_err() {
                return Ok(false);
            }
        }

        let mut stats = self.stats.lock().await;
        stats.chunks_generated += 1;
        stats.frames_sent += count;
        stats.simulated_seconds += self.config.chunk_duration;
        stats.last_chunk_time = elapsed.as_secs_f64();

        if elapsed.as_secs_f64() > self.config.chunk_duration {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                chunk_ms = self.config.chunk_duration * 1000.0,
                "chunk generation slower than real time"
            );
        }
        Ok(true)
    }

    async fn handle(&mut self, command: StreamCommand) {
        match command {
            StreamCommand::Start | StreamCommand::Resume => {
                self.simulator.lock().await.rebase_host_clock(HostTimestamp::now());
                self.stats.lock().await.is_running = true;
                info!(?command, "frame stream running");
            }
            StreamCommand::Pause => {
                self.stats.lock().await.is_running = false;
                info!("frame stream paused");
            }
            StreamCommand::Stop => {
                self.simulator.lock().await.reset_time();
                let mut stats = self.stats.lock().await;
                *stats = StreamStats::default();
                info!("frame stream stopped");
            }
            StreamCommand::Schedule { delay, pattern } => {
                self.simulator.lock().await.schedule(delay, pattern);
                debug!(delay, gesture = pattern.description(), "gesture scheduled");
            }
            StreamCommand::SetLinkQuality {
                drop_probability,
                duplicate_probability,
            } => {
                self.simulator
                    .lock()
                    .await
                    .set_link_quality(drop_probability, duplicate_probability);
                info!(drop_probability, duplicate_probability, "link quality updated");
            }
        }
    }
}

/// Spawn a stream feeding `frames` in the background
pub fn start_frame_stream(
    config: StreamConfig,
    frames: mpsc::UnboundedSender<RawFrame>,
) -> EarableResult<(mpsc::Sender<StreamCommand>, JoinHandle<EarableResult<StreamStats>>)> {
    let mut stream = RealTimeFrameStream::new(config, frames)?;
    let control = stream
        .control_handle()
        .ok_or_else(|| EarableError::config("frame stream already started"))?;
    let handle = tokio::spawn(async move {
        let result = stream.run().await;
        if let Err(e) = &result {
            warn!(error = %e, "frame stream failed");
        }
        result
    });
    Ok((control, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use earable_core::Modality;
    use tokio::time::{sleep, timeout};

    fn fast_config() -> StreamConfig {
        StreamConfig {
            simulator: SimulatorConfig {
                seed: Some(3),
                ..SimulatorConfig::default()
            },
            chunk_duration: 0.1,
            update_rate: 50.0,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RawFrame>) -> Vec<RawFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_stream_delivers_frames_after_start() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (control, _handle) = start_frame_stream(fast_config(), tx).unwrap();

        sleep(Duration::from_millis(60)).await;
        assert!(drain(&mut rx).is_empty(), "idle until started");

        control.send(StreamCommand::Start).await.unwrap();
        sleep(Duration::from_millis(200)).await;
        let frames = drain(&mut rx);
        assert!(frames.iter().any(|f| f.modality == Modality::Eeg));

        control.send(StreamCommand::Stop).await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_halts_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (control, _handle) = start_frame_stream(fast_config(), tx).unwrap();

        control.send(StreamCommand::Start).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        control.send(StreamCommand::Pause).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        drain(&mut rx);

        sleep(Duration::from_millis(150)).await;
        assert!(drain(&mut rx).is_empty());

        control.send(StreamCommand::Resume).await.unwrap();
        sleep(Duration::from_millis(150)).await;
        assert!(!drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_stream_ends_when_transport_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (control, handle) = start_frame_stream(fast_config(), tx).unwrap();
        drop(rx);
        control.send(StreamCommand::Start).await.unwrap();

        let stats = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap().unwrap();
        assert!(!stats.is_running);
        assert_eq!(stats.frames_sent, 0);
    }

    #[tokio::test]
    async fn test_stream_ends_when_control_dropped() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (control, handle) = start_frame_stream(fast_config(), tx).unwrap();
        drop(control);
        assert!(timeout(Duration::from_secs(2), handle).await.is_ok());
    }

    #[test]
    fn test_invalid_stream_config() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = StreamConfig {
            update_rate: 0.0,
            ..StreamConfig::default()
        };
        assert!(RealTimeFrameStream::new(config, tx).is_err());
    }
}
