//! Detector and gate configuration
//!
//! Every field has a default matching the earable's stock tuning, so a
//! partially specified JSON document is still a complete configuration.

use crate::features::QUALITY_FEATURE_COUNT;
use crate::quality::{FeatureNormalization, LogisticModel};
use earable_core::{EarableError, EarableResult};
use serde::{Deserialize, Serialize};

/// Fraction of the sampling rate the EMG band edge is clipped to
pub const EMG_MAX_EDGE_FRACTION: f64 = 0.45;

fn require(condition: bool, reason: impl FnOnce() -> String) -> EarableResult<()> {
    if condition {
        Ok(())
    } else {
        Err(EarableError::config(reason()))
    }
}

/// Whole samples in `secs`, truncated; the epsilon absorbs products like
/// `0.29 * 100.0` landing just under an integer
fn window_samples(secs: f64, fs: f64) -> usize {
    (secs * fs + 1e-9) as usize
}

// ============================================================================
// Signal quality
// ============================================================================

/// Which EEG columns play which role in the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityChannels {
    /// Left lateral (LF5)
    pub left_lateral: usize,
    /// Left vertical (OTE_L)
    pub left_vertical: usize,
    /// Right lateral (RF6)
    pub right_lateral: usize,
    /// Right vertical (OTE_R)
    pub right_vertical: usize,
}

impl Default for QualityChannels {
    fn default() -> Self {
        Self {
            left_lateral: 0,
            left_vertical: 1,
            right_lateral: 3,
            right_vertical: 4,
        }
    }
}

impl QualityChannels {
    pub fn all(&self) -> [usize; 4] {
        [
            self.left_lateral,
            self.left_vertical,
            self.right_lateral,
            self.right_vertical,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub window_secs: f64,
    pub stride_secs: f64,
    /// Any sample above this magnitude marks the window noisy (µV)
    pub amplitude_ceiling: f64,
    /// Standard deviation below this is a flat line (µV)
    pub flat_line_floor: f64,
    /// Level counted as an artifact sample (µV)
    pub artifact_level: f64,
    /// Largest tolerated fraction of artifact samples
    pub artifact_fraction: f64,
    /// Lateral pair correlation below this is accepted as a gaze signature
    pub pair_correlation: f64,
    pub channels: QualityChannels,
    pub normalization: FeatureNormalization,
    /// Optional default classifier; without one the heuristic decides
    pub model: Option<LogisticModel>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            window_secs: 3.0,
            stride_secs: 1.0,
            amplitude_ceiling: 250.0,
            flat_line_floor: 0.5,
            artifact_level: 150.0,
            artifact_fraction: 0.05,
            pair_correlation: -0.6,
            channels: QualityChannels::default(),
            normalization: FeatureNormalization::default(),
            model: None,
        }
    }
}

impl QualityConfig {
    pub fn window_samples(&self, fs: f64) -> usize {
        window_samples(self.window_secs, fs)
    }

    pub fn stride_samples(&self, fs: f64) -> usize {
        window_samples(self.stride_secs, fs).max(1)
    }

    pub fn validate(&self, eeg_channels: usize) -> EarableResult<()> {
        require(self.window_secs > 0.0, || "quality window must be positive".into())?;
        require(self.stride_secs > 0.0, || "quality stride must be positive".into())?;
        require(self.amplitude_ceiling > 0.0, || "amplitude ceiling must be positive".into())?;
        require((0.0..=1.0).contains(&self.artifact_fraction), || {
            format!("artifact fraction {} outside [0, 1]", self.artifact_fraction)
        })?;
        require((-1.0..=1.0).contains(&self.pair_correlation), || {
            format!("pair correlation {} outside [-1, 1]", self.pair_correlation)
        })?;
        for channel in self.channels.all() {
            require(channel < eeg_channels, || {
                format!("quality channel {} beyond {} EEG channels", channel, eeg_channels)
            })?;
        }
        self.normalization.validate()?;
        if let Some(model) = &self.model {
            require(model.weights.len() == QUALITY_FEATURE_COUNT, || {
                format!(
                    "classifier expects {} weights, got {}",
                    QUALITY_FEATURE_COUNT,
                    model.weights.len()
                )
            })?;
        }
        Ok(())
    }
}

// ============================================================================
// Gaze
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    pub window_secs: f64,
    pub stride_secs: f64,
    /// Quiet time required after the previous candidate (s)
    pub min_dist_from_prev: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    pub min_threshold_amp: f64,
    pub max_threshold_amp: f64,
    /// Accepted peak ratio is `[ratio, 1/ratio]`
    pub ratio_threshold: f64,
    /// Segment correlation must fall below this
    pub correlation_threshold: f64,
    /// Offset subtracted before locating zero crossings
    pub soft_zero_crossing: f64,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            window_secs: 4.0,
            stride_secs: 0.5,
            min_dist_from_prev: 0.75,
            min_duration: 0.25,
            max_duration: 3.0,
            min_threshold_amp: 30.0,
            max_threshold_amp: 100.0,
            ratio_threshold: 0.5,
            correlation_threshold: -0.5,
            soft_zero_crossing: 0.0,
        }
    }
}

impl GazeConfig {
    pub fn window_samples(&self, fs: f64) -> usize {
        window_samples(self.window_secs, fs)
    }

    pub fn stride_samples(&self, fs: f64) -> usize {
        window_samples(self.stride_secs, fs).max(1)
    }

    pub fn validate(&self) -> EarableResult<()> {
        require(self.window_secs > 0.0 && self.stride_secs > 0.0, || {
            "gaze window and stride must be positive".into()
        })?;
        require(self.min_duration < self.max_duration, || {
            format!("gaze duration range [{}, {}] is empty", self.min_duration, self.max_duration)
        })?;
        require(
            self.min_threshold_amp > 0.0 && self.min_threshold_amp < self.max_threshold_amp,
            || {
                format!(
                    "gaze amplitude range [{}, {}] is empty",
                    self.min_threshold_amp, self.max_threshold_amp
                )
            },
        )?;
        require(self.ratio_threshold > 0.0 && self.ratio_threshold <= 1.0, || {
            format!("gaze ratio threshold {} outside (0, 1]", self.ratio_threshold)
        })?;
        require(self.min_dist_from_prev >= 0.0, || "gaze min distance is negative".into())
    }
}

// ============================================================================
// Blink
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    /// Sub-window tested for a candidate (s)
    pub window_secs: f64,
    pub stride_secs: f64,
    /// Full width of a candidate region (s)
    pub search_region_secs: f64,
    pub std_threshold: f64,
    pub min_amplitude: f64,
    pub max_amplitude: f64,
    pub min_prominence: f64,
    pub correlation_threshold: f64,
    pub invert_polarity: bool,
    /// Filtered history kept beyond this is discarded (s)
    pub max_history_secs: f64,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            window_secs: 0.25,
            stride_secs: 0.25,
            search_region_secs: 1.0,
            std_threshold: 50.0,
            min_amplitude: 100.0,
            max_amplitude: 400.0,
            min_prominence: 125.0,
            correlation_threshold: 0.5,
            invert_polarity: true,
            max_history_secs: 60.0,
        }
    }
}

impl BlinkConfig {
    pub fn window_samples(&self, fs: f64) -> usize {
        window_samples(self.window_secs, fs).max(2)
    }

    pub fn stride_samples(&self, fs: f64) -> usize {
        window_samples(self.stride_secs, fs).max(1)
    }

    pub fn validate(&self) -> EarableResult<()> {
        require(self.window_secs > 0.0 && self.stride_secs > 0.0, || {
            "blink window and stride must be positive".into()
        })?;
        require(self.search_region_secs > 0.0, || "blink search region must be positive".into())?;
        require(self.min_amplitude < self.max_amplitude, || {
            format!("blink amplitude range [{}, {}] is empty", self.min_amplitude, self.max_amplitude)
        })?;
        require(self.max_history_secs >= 2.0 * self.search_region_secs, || {
            "blink history must cover at least two search regions".into()
        })
    }
}

// ============================================================================
// EMG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmgConfig {
    pub window_secs: f64,
    pub stride_secs: f64,
    pub band_low: f64,
    /// Upper band edge, clipped below Nyquist at design time
    pub band_high: f64,
    pub filter_order: usize,
    pub ring_len: usize,
    /// Ratio at or above which an event fires
    pub significance: f64,
    /// Ticks before the reference is re-learned
    pub decay_ticks: u32,
    /// Windows without a sample above this are masked (µV)
    pub amplitude_floor: f64,
    pub channels: Vec<usize>,
}

impl Default for EmgConfig {
    fn default() -> Self {
        Self {
            window_secs: 1.0,
            stride_secs: 1.0,
            band_low: 10.0,
            band_high: 100.0,
            filter_order: 2,
            ring_len: 2,
            significance: 3.0,
            decay_ticks: 3,
            amplitude_floor: 10.0,
            channels: vec![0, 3],
        }
    }
}

impl EmgConfig {
    pub fn window_samples(&self, fs: f64) -> usize {
        window_samples(self.window_secs, fs)
    }

    pub fn stride_samples(&self, fs: f64) -> usize {
        window_samples(self.stride_secs, fs).max(1)
    }

    /// Band actually designed at `fs`
    pub fn effective_band(&self, fs: f64) -> (f64, f64) {
        (self.band_low, self.band_high.min(EMG_MAX_EDGE_FRACTION * fs))
    }

    pub fn validate(&self, fs: f64, eeg_channels: usize) -> EarableResult<()> {
        require(self.window_secs > 0.0 && self.stride_secs > 0.0, || {
            "EMG window and stride must be positive".into()
        })?;
        let (low, high) = self.effective_band(fs);
        require(low > 0.0 && low < high, || {
            format!("EMG band {}-{} Hz is empty at {} Hz", low, high, fs)
        })?;
        require(self.ring_len > 0, || "EMG ring must hold at least one value".into())?;
        require(self.significance > 0.0, || "EMG significance must be positive".into())?;
        require(!self.channels.is_empty(), || "EMG needs at least one channel".into())?;
        for &channel in &self.channels {
            require(channel < eeg_channels, || {
                format!("EMG channel {} beyond {} EEG channels", channel, eeg_channels)
            })?;
        }
        Ok(())
    }
}

/// All analysis settings together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub quality: QualityConfig,
    pub gaze: GazeConfig,
    pub blink: BlinkConfig,
    pub emg: EmgConfig,
}

impl AnalysisConfig {
    pub fn validate(&self, fs: f64, eeg_channels: usize) -> EarableResult<()> {
        self.quality.validate(eeg_channels)?;
        self.gaze.validate()?;
        self.blink.validate()?;
        self.emg.validate(fs, eeg_channels)
    }
}
