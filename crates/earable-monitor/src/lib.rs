//! Earable-Monitor: stream orchestration, persistence and configuration for
//! the live acquisition binary

pub mod config;
pub mod orchestrator;
pub mod persistence;

pub use config::{AcquisitionConfig, MonitorConfig, RuntimeConfig};
pub use orchestrator::{
    spawn_monitor, AnalysisSnapshot, AnalysisStats, AnalysisTask, BoxedSink, DetectionEvent, EmgAnalysis,
    EogAnalysis, FrameIngestor, IngestOutcome, IngestSnapshot, IngestStats, MonitorHandle, MonitorReport,
};
pub use persistence::{read_samples, DirectorySink, RecordingManifest, StreamManifest};
