//! Earable-Processing: filter bank, quality gate and event detectors
//!
//! Every detector owns its filter chains; nothing here is shared between
//! analysis tasks.

pub mod blink;
pub mod config;
pub mod design;
pub mod emg;
pub mod error;
pub mod features;
pub mod filters;
pub mod gaze;
pub mod pipeline;
pub mod processor;
pub mod quality;
pub mod stats;

pub use blink::{BlinkDetector, BlinkEvent};
pub use config::{AnalysisConfig, BlinkConfig, EmgConfig, GazeConfig, QualityChannels, QualityConfig};
pub use design::{butter, iir_notch, BandKind, Coefficients};
pub use emg::{EmgDetector, EmgEvent, EmgTick};
pub use error::{ProcessingError, ProcessingResult};
pub use features::{band_powers, BandScale, FeatureExtractor, QUALITY_BANDS, QUALITY_FEATURE_COUNT};
pub use filters::{filtfilt, lfilter, lfilter_zi, CausalStage, Priming, ZeroPhaseStage};
pub use gaze::{GazeDetector, GazeDirection, GazeEvent, GazeGroup};
pub use pipeline::{FilterChain, FilterChainBuilder, StageSpec};
pub use processor::{Cadence, StageKind, TickOutcome, WindowStage};
pub use quality::{
    ClassifierError, FeatureNormalization, LogisticModel, PairDecision, QualityClassifier,
    QualityGate, QualityReport, QualitySnapshot,
};
