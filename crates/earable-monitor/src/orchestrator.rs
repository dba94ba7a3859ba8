//! Stream orchestration: one ingestion task feeding the store, two analysis
//! tasks polling it
//!
//! The transport hands frames over an unbounded queue. Ingestion decodes,
//! runs EEG through the sequence tracker and appends whole batches. The EOG
//! task runs the quality gate, blink and gaze detectors; the EMG task runs the
//! jaw-clench detector. Each analysis task owns its detector state outright.
//! A `watch` flag stops everything: ingestion closes the queue, drains what is
//! left and flushes the store one last time.

use crate::config::MonitorConfig;
use earable_core::{
    decode_frame, DecodedFrame, EarableResult, EventKind, EventMarker, HostTimestamp, RawFrame,
    RecordingSink, SequenceOutcome, SequenceStats, SequenceTracker, TimeSeriesStore,
};
use earable_processing::{
    BlinkDetector, BlinkEvent, EmgDetector, EmgEvent, GazeDetector, GazeEvent, QualityClassifier,
    QualityGate, QualitySnapshot, TickOutcome,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Boxed sink owned by the ingestion task
pub type BoxedSink = Box<dyn RecordingSink + Send>;

/// Broadcast to subscribers alongside the stored marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DetectionEvent {
    Gaze(GazeEvent),
    Blink(BlinkEvent),
    JawClench(EmgEvent),
    /// Marker placed through [`MonitorHandle::mark`]
    User(EventKind),
}

impl DetectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DetectionEvent::Gaze(gaze) => gaze.direction.event_kind(),
            DetectionEvent::Blink(_) => EventKind::Blink,
            DetectionEvent::JawClench(_) => EventKind::JawClench,
            DetectionEvent::User(kind) => *kind,
        }
    }

    fn sample_index(&self) -> Option<usize> {
        match self {
            DetectionEvent::Gaze(gaze) => Some(gaze.sample_index),
            DetectionEvent::Blink(blink) => Some(blink.sample_index),
            DetectionEvent::JawClench(emg) => Some(emg.sample_index),
            DetectionEvent::User(_) => None,
        }
    }
}

/// Ingestion counters, updated lock-free by the ingestion task
#[derive(Debug, Default)]
pub struct IngestStats {
    eeg_frames: AtomicU64,
    imu_frames: AtomicU64,
    ppg_frames: AtomicU64,
    malformed: AtomicU64,
    gaps: AtomicU64,
    missing_batches: AtomicU64,
    duplicates: AtomicU64,
    ppg_samples_dropped: AtomicU64,
    rejected_batches: AtomicU64,
    flushes: AtomicU64,
    flush_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSnapshot {
    pub eeg_frames: u64,
    pub imu_frames: u64,
    pub ppg_frames: u64,
    pub malformed: u64,
    pub gaps: u64,
    pub missing_batches: u64,
    pub duplicates: u64,
    pub ppg_samples_dropped: u64,
    pub rejected_batches: u64,
    pub flushes: u64,
    pub flush_failures: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        IngestSnapshot {
            eeg_frames: load(&self.eeg_frames),
            imu_frames: load(&self.imu_frames),
            ppg_frames: load(&self.ppg_frames),
            malformed: load(&self.malformed),
            gaps: load(&self.gaps),
            missing_batches: load(&self.missing_batches),
            duplicates: load(&self.duplicates),
            ppg_samples_dropped: load(&self.ppg_samples_dropped),
            rejected_batches: load(&self.rejected_batches),
            flushes: load(&self.flushes),
            flush_failures: load(&self.flush_failures),
        }
    }
}

#[derive(Debug, Default)]
pub struct AnalysisStats {
    eog_ticks: AtomicU64,
    emg_ticks: AtomicU64,
    quality_updates: AtomicU64,
    classifier_fallbacks: AtomicU64,
    gated_ticks: AtomicU64,
    analysis_errors: AtomicU64,
    gaze_events: AtomicU64,
    blink_events: AtomicU64,
    emg_events: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub eog_ticks: u64,
    pub emg_ticks: u64,
    pub quality_updates: u64,
    pub classifier_fallbacks: u64,
    pub gated_ticks: u64,
    pub analysis_errors: u64,
    pub gaze_events: u64,
    pub blink_events: u64,
    pub emg_events: u64,
}

impl AnalysisStats {
    pub fn snapshot(&self) -> AnalysisSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        AnalysisSnapshot {
            eog_ticks: load(&self.eog_ticks),
            emg_ticks: load(&self.emg_ticks),
            quality_updates: load(&self.quality_updates),
            classifier_fallbacks: load(&self.classifier_fallbacks),
            gated_ticks: load(&self.gated_ticks),
            analysis_errors: load(&self.analysis_errors),
            gaze_events: load(&self.gaze_events),
            blink_events: load(&self.blink_events),
            emg_events: load(&self.emg_events),
        }
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

// ============================================================================
// Ingestion
// ============================================================================

/// What happened to one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Rows appended; the new stream size
    Appended(usize),
    /// Repeated EEG sequence number
    Duplicate,
    Malformed,
    /// Decoded but not storable
    Rejected,
}

/// Decode + track + append, shared by the live loop and the shutdown drain
pub struct FrameIngestor {
    store: Arc<TimeSeriesStore>,
    tracker: SequenceTracker,
    stats: Arc<IngestStats>,
    eeg_channels: usize,
}

impl FrameIngestor {
    pub fn new(store: Arc<TimeSeriesStore>, stats: Arc<IngestStats>) -> Self {
        let eeg_channels = store.layout().eeg.channels;
        Self {
            store,
            tracker: SequenceTracker::new(),
            stats,
            eeg_channels,
        }
    }

    pub fn sequence_stats(&self) -> SequenceStats {
        self.tracker.stats()
    }

    pub fn ingest(&mut self, frame: &RawFrame) -> IngestOutcome {
        let decoded = match decode_frame(frame, self.eeg_channels) {
            Ok(decoded) => decoded,
            Err(e) => {
                bump(&self.stats.malformed, 1);
                warn!(error = %e, len = frame.bytes.len(), "dropping malformed frame");
                return IngestOutcome::Malformed;
            }
        };

        let batch = match decoded {
            DecodedFrame::Eeg(packet) => {
                bump(&self.stats.eeg_frames, 1);
                match self.tracker.observe(packet.sequence) {
                    SequenceOutcome::Accepted => {}
                    SequenceOutcome::Gap { missing, .. } => {
                        bump(&self.stats.gaps, 1);
                        bump(&self.stats.missing_batches, missing as u64);
                    }
                    SequenceOutcome::Duplicate { .. } => {
                        bump(&self.stats.duplicates, 1);
                        return IngestOutcome::Duplicate;
                    }
                }
                packet.to_batch(frame.host_timestamp)
            }
            DecodedFrame::Imu(packet) => {
                bump(&self.stats.imu_frames, 1);
                packet.to_batch(frame.host_timestamp)
            }
            DecodedFrame::Ppg(packet) => {
                bump(&self.stats.ppg_frames, 1);
                let dropped = packet.unmatched_samples() as u64;
                if dropped > 0 {
                    bump(&self.stats.ppg_samples_dropped, dropped);
                    warn!(dropped, "PPG samples without a complete row");
                }
                packet.to_batch(frame.host_timestamp)
            }
        };

        if batch.values.is_empty() {
            return IngestOutcome::Rejected;
        }
        match self.store.append(&batch) {
            Ok(size) => IngestOutcome::Appended(size),
            Err(e) => {
                bump(&self.stats.rejected_batches, 1);
                warn!(error = %e, "batch rejected by store");
                IngestOutcome::Rejected
            }
        }
    }
}

/// Sink copy-out and file I/O running on the blocking pool; hands the sink back
type FlushJob = JoinHandle<(BoxedSink, EarableResult<()>)>;

fn start_flush(store: &Arc<TimeSeriesStore>, sink: &mut Option<BoxedSink>) -> Option<FlushJob> {
    let mut owned = sink.take()?;
    let store = Arc::clone(store);
    Some(tokio::task::spawn_blocking(move || {
        let result = store.flush(owned.as_mut());
        (owned, result)
    }))
}

fn finish_flush(
    joined: Result<(BoxedSink, EarableResult<()>), JoinError>,
    sink: &mut Option<BoxedSink>,
    stats: &IngestStats,
) {
    match joined {
        Ok((owned, result)) => {
            *sink = Some(owned);
            match result {
                Ok(()) => bump(&stats.flushes, 1),
                Err(e) => {
                    bump(&stats.flush_failures, 1);
                    warn!(error = %e, "store flush failed, retrying next interval");
                }
            }
        }
        Err(e) => {
            bump(&stats.flush_failures, 1);
            warn!(error = %e, "store flush task died, persistence stopped");
        }
    }
}

async fn flush(store: &Arc<TimeSeriesStore>, sink: &mut Option<BoxedSink>, stats: &IngestStats) {
    if let Some(job) = start_flush(store, sink) {
        finish_flush(job.await, sink, stats);
    }
}

async fn ingestion_loop(
    mut frames: mpsc::UnboundedReceiver<RawFrame>,
    mut ingestor: FrameIngestor,
    mut sink: Option<BoxedSink>,
    persist_every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> SequenceStats {
    let mut persist = interval(persist_every);
    persist.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    persist.tick().await;

    // at most one flush in flight; frames keep flowing meanwhile
    let mut job: Option<FlushJob> = None;

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    ingestor.ingest(&frame);
                }
                None => {
                    info!("transport queue closed");
                    break;
                }
            },
            _ = persist.tick(), if job.is_none() => {
                job = start_flush(&ingestor.store, &mut sink);
            }
            joined = async {
                match job.as_mut() {
                    Some(running) => running.await,
                    None => std::future::pending().await,
                }
            }, if job.is_some() => {
                job = None;
                finish_flush(joined, &mut sink, &ingestor.stats);
            }
            _ = shutdown.changed() => break,
        }
    }

    if let Some(running) = job.take() {
        finish_flush(running.await, &mut sink, &ingestor.stats);
    }
    frames.close();
    let mut drained = 0usize;
    while let Ok(frame) = frames.try_recv() {
        ingestor.ingest(&frame);
        drained += 1;
    }
    flush(&ingestor.store, &mut sink, &ingestor.stats).await;
    info!(drained, "ingestion stopped");
    ingestor.sequence_stats()
}

// ============================================================================
// Analysis
// ============================================================================

/// Shared plumbing for publishing detections
#[derive(Clone)]
struct Publisher {
    store: Arc<TimeSeriesStore>,
    events: broadcast::Sender<DetectionEvent>,
}

impl Publisher {
    fn publish(&self, event: DetectionEvent) {
        let mut marker = EventMarker::new(HostTimestamp::now(), event.kind());
        if let Some(index) = event.sample_index() {
            marker = marker.at_sample(index);
        }
        self.store.push_event(marker);
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

/// One periodically polled analysis stage
pub trait AnalysisTask: Send + 'static {
    const NAME: &'static str;

    /// Run whatever is due against the store
    fn poll(&mut self, store: &TimeSeriesStore, stats: &AnalysisStats) -> EarableResult<Vec<DetectionEvent>>;
}

/// Quality gate + blink + gaze over the EOG channels
pub struct EogAnalysis {
    gate: QualityGate,
    blink: BlinkDetector,
    gaze: GazeDetector,
    quality: Arc<Mutex<Option<QualitySnapshot>>>,
}

impl EogAnalysis {
    pub fn new(config: &MonitorConfig, classifier: Option<Arc<dyn QualityClassifier>>) -> EarableResult<Self> {
        let fs = config.acquisition.eeg_rate;
        let analysis = &config.analysis;
        let channels = analysis.quality.channels;
        let gate = match classifier {
            Some(classifier) => QualityGate::with_classifier(analysis.quality.clone(), fs, Some(classifier))?,
            None => QualityGate::new(analysis.quality.clone(), fs)?,
        };
        Ok(Self {
            gate,
            blink: BlinkDetector::new(
                analysis.blink.clone(),
                (channels.left_vertical, channels.right_vertical),
                fs,
            )?,
            gaze: GazeDetector::new(
                analysis.gaze.clone(),
                (channels.left_lateral, channels.right_lateral),
                fs,
            )?,
            quality: Arc::new(Mutex::new(None)),
        })
    }
}

impl AnalysisTask for EogAnalysis {
    const NAME: &'static str = "eog";

    fn poll(&mut self, store: &TimeSeriesStore, stats: &AnalysisStats) -> EarableResult<Vec<DetectionEvent>> {
        bump(&stats.eog_ticks, 1);
        if let Some(report) = self.gate.tick(store)? {
            bump(&stats.quality_updates, 1);
            if report.used_fallback() {
                bump(&stats.classifier_fallbacks, 1);
            }
            *self.quality.lock() = Some(report.snapshot);
        }
        let snapshot = self.gate.snapshot();

        let mut events = Vec::new();
        match self.blink.tick(store, snapshot.as_ref())? {
            TickOutcome::Processed(blinks) => {
                bump(&stats.blink_events, blinks.len() as u64);
                events.extend(blinks.into_iter().map(DetectionEvent::Blink));
            }
            TickOutcome::Gated => bump(&stats.gated_ticks, 1),
            TickOutcome::InsufficientHistory | TickOutcome::NotDue => {}
        }
        match self.gaze.tick(store, snapshot.as_ref())? {
            TickOutcome::Processed(gazes) => {
                bump(&stats.gaze_events, gazes.len() as u64);
                events.extend(gazes.into_iter().map(DetectionEvent::Gaze));
            }
            TickOutcome::Gated => bump(&stats.gated_ticks, 1),
            TickOutcome::InsufficientHistory | TickOutcome::NotDue => {}
        }
        Ok(events)
    }
}

/// Jaw-clench detection
pub struct EmgAnalysis {
    detector: EmgDetector,
}

impl EmgAnalysis {
    pub fn new(config: &MonitorConfig) -> EarableResult<Self> {
        Ok(Self {
            detector: EmgDetector::new(config.analysis.emg.clone(), config.acquisition.eeg_rate)?,
        })
    }
}

impl AnalysisTask for EmgAnalysis {
    const NAME: &'static str = "emg";

    fn poll(&mut self, store: &TimeSeriesStore, stats: &AnalysisStats) -> EarableResult<Vec<DetectionEvent>> {
        match self.detector.tick(store)? {
            TickOutcome::Processed(tick) => {
                bump(&stats.emg_ticks, 1);
                let events: Vec<_> = tick.event.into_iter().map(DetectionEvent::JawClench).collect();
                bump(&stats.emg_events, events.len() as u64);
                Ok(events)
            }
            _ => Ok(Vec::new()),
        }
    }
}

async fn analysis_loop<T: AnalysisTask>(
    mut task: T,
    period: Duration,
    publisher: Publisher,
    stats: Arc<AnalysisStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(task = T::NAME, period_ms = period.as_millis() as u64, "analysis task started");

    loop {
        tokio::select! {
            _ = ticker.tick() => match task.poll(&publisher.store, &stats) {
                Ok(events) => {
                    for event in events {
                        debug!(task = T::NAME, kind = %event.kind(), "detection");
                        publisher.publish(event);
                    }
                }
                Err(e) => {
                    bump(&stats.analysis_errors, 1);
                    warn!(task = T::NAME, error = %e, "analysis tick failed");
                }
            },
            _ = shutdown.changed() => break,
        }
    }
    info!(task = T::NAME, "analysis task stopped");
}

// ============================================================================
// Monitor
// ============================================================================

/// Final counters returned by [`MonitorHandle::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitorReport {
    pub ingest: IngestSnapshot,
    pub analysis: AnalysisSnapshot,
    pub sequence: SequenceStats,
    pub eeg_samples: usize,
    pub events: usize,
}

pub struct MonitorHandle {
    store: Arc<TimeSeriesStore>,
    ingest_stats: Arc<IngestStats>,
    analysis_stats: Arc<AnalysisStats>,
    publisher: Publisher,
    quality: Arc<Mutex<Option<QualitySnapshot>>>,
    shutdown: watch::Sender<bool>,
    ingestion: JoinHandle<SequenceStats>,
    analysis: Vec<JoinHandle<()>>,
}

/// Spawn the ingestion and analysis tasks; returns the handle and the
/// transport sender frames are pushed into
pub fn spawn_monitor(
    config: &MonitorConfig,
    sink: Option<BoxedSink>,
    classifier: Option<Arc<dyn QualityClassifier>>,
) -> EarableResult<(MonitorHandle, mpsc::UnboundedSender<RawFrame>)> {
    config.validate()?;
    let store = Arc::new(TimeSeriesStore::new(config.acquisition.store_layout())?);
    let eog = EogAnalysis::new(config, classifier)?;
    let emg = EmgAnalysis::new(config)?;
    let quality = Arc::clone(&eog.quality);

    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events, _) = broadcast::channel(config.runtime.event_capacity);
    let ingest_stats = Arc::new(IngestStats::default());
    let analysis_stats = Arc::new(AnalysisStats::default());
    let publisher = Publisher {
        store: Arc::clone(&store),
        events,
    };

    let ingestion = tokio::spawn(ingestion_loop(
        frame_rx,
        FrameIngestor::new(Arc::clone(&store), Arc::clone(&ingest_stats)),
        sink,
        config.runtime.persist_interval(),
        shutdown_rx.clone(),
    ));
    let analysis = vec![
        tokio::spawn(analysis_loop(
            eog,
            config.runtime.eog_poll(),
            publisher.clone(),
            Arc::clone(&analysis_stats),
            shutdown_rx.clone(),
        )),
        tokio::spawn(analysis_loop(
            emg,
            config.runtime.emg_poll(),
            publisher.clone(),
            Arc::clone(&analysis_stats),
            shutdown_rx,
        )),
    ];
    info!(recording = %store.recording_id(), "monitor started");

    Ok((
        MonitorHandle {
            store,
            ingest_stats,
            analysis_stats,
            publisher,
            quality,
            shutdown: shutdown_tx,
            ingestion,
            analysis,
        },
        frame_tx,
    ))
}

impl MonitorHandle {
    pub fn store(&self) -> &Arc<TimeSeriesStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DetectionEvent> {
        self.publisher.events.subscribe()
    }

    pub fn ingest_stats(&self) -> IngestSnapshot {
        self.ingest_stats.snapshot()
    }

    pub fn analysis_stats(&self) -> AnalysisSnapshot {
        self.analysis_stats.snapshot()
    }

    /// Latest quality decision of the EOG task
    pub fn quality(&self) -> Option<QualitySnapshot> {
        *self.quality.lock()
    }

    /// Place an external marker at the current host time
    pub fn mark(&self, kind: EventKind) {
        self.publisher.publish(DetectionEvent::User(kind));
    }

    /// Stop every task, drain the queue and flush; counters at exit
    pub async fn shutdown(self) -> anyhow::Result<MonitorReport> {
        // receivers may already be gone if a task exited early
        let _ = self.shutdown.send(true);
        let sequence = self.ingestion.await?;
        for task in self.analysis {
            task.await?;
        }
        let report = MonitorReport {
            ingest: self.ingest_stats.snapshot(),
            analysis: self.analysis_stats.snapshot(),
            sequence,
            eeg_samples: self.store.size(earable_core::Modality::Eeg),
            events: self.store.event_count(),
        };
        info!(?report, "monitor stopped");
        Ok(report)
    }
}
