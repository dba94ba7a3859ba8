//! Signal quality gate
//!
//! Each gated channel is demeaned and run through the quality chain, then
//! checked against amplitude, flat-line and artifact heuristics. The lateral
//! pair gets a second opinion: a strongly anti-correlated pair is accepted as
//! a gaze signature, anything else goes to an external classifier when one is
//! configured.

use crate::config::QualityConfig;
use crate::features::{FeatureExtractor, QUALITY_FEATURE_COUNT};
use crate::pipeline::FilterChain;
use crate::stats::{demean, pearson, ChannelStats};
use earable_core::{EarableError, EarableResult, Modality, TimeSeriesStore, Window};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why the classifier could not give an answer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classifier failed: {0}")]
    Failed(String),
}

impl ClassifierError {
    /// No classifier to ask, as opposed to one that failed
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ClassifierError::Unavailable(_))
    }
}

/// External bad-quality classifier
///
/// Must be synchronous and free of side effects: the same features always
/// produce the same probability.
pub trait QualityClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// Probability that the channel behind `features` is bad
    fn bad_probability(&self, features: &[f64]) -> Result<f64, ClassifierError>;
}

/// Per-feature standardisation applied before classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureNormalization {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Default for FeatureNormalization {
    fn default() -> Self {
        Self {
            means: vec![0.0; QUALITY_FEATURE_COUNT],
            stds: vec![1.0; QUALITY_FEATURE_COUNT],
        }
    }
}

impl FeatureNormalization {
    pub fn validate(&self) -> EarableResult<()> {
        if self.means.len() != QUALITY_FEATURE_COUNT || self.stds.len() != QUALITY_FEATURE_COUNT {
            return Err(EarableError::config(format!(
                "feature normalisation needs {} means and stds",
                QUALITY_FEATURE_COUNT
            )));
        }
        if self.stds.iter().any(|&s| !(s > 0.0)) {
            return Err(EarableError::config("feature normalisation stds must be positive"));
        }
        Ok(())
    }

    pub fn apply(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(f, (m, s))| (f - m) / s)
            .collect()
    }
}

/// Logistic regression over the normalised feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl QualityClassifier for LogisticModel {
    fn name(&self) -> &str {
        "logistic"
    }

    fn bad_probability(&self, features: &[f64]) -> Result<f64, ClassifierError> {
        if features.len() != self.weights.len() {
            return Err(ClassifierError::Failed(format!(
                "expected {} features, got {}",
                self.weights.len(),
                features.len()
            )));
        }
        let z: f64 = self.bias + features.iter().zip(&self.weights).map(|(f, w)| f * w).sum::<f64>();
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

/// Cached quality decision for the gated channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualitySnapshot {
    /// Store size the decision was computed at
    pub computed_at: usize,
    pub left_lateral: bool,
    pub left_vertical: bool,
    pub right_lateral: bool,
    pub right_vertical: bool,
}

impl QualitySnapshot {
    /// Both lateral channels usable for gaze
    pub fn lateral_ok(&self) -> bool {
        self.left_lateral && self.right_lateral
    }

    /// Both vertical channels usable for blinks
    pub fn vertical_ok(&self) -> bool {
        self.left_vertical && self.right_vertical
    }
}

/// How the lateral pair was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairDecision {
    /// Anti-correlated and heuristically clean
    Correlated,
    /// Classifier output
    Classified,
    /// Heuristic result kept because no classifier answered
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub snapshot: QualitySnapshot,
    pub pair_correlation: Option<f64>,
    pub pair_decision: PairDecision,
    pub classifier_error: Option<ClassifierError>,
}

impl QualityReport {
    pub fn used_fallback(&self) -> bool {
        self.pair_decision == PairDecision::Fallback
    }
}

pub struct QualityGate {
    config: QualityConfig,
    fs: f64,
    // one chain per gated channel, in `QualityChannels::all()` order
    chains: Vec<FilterChain>,
    extractor: FeatureExtractor,
    classifier: Option<Arc<dyn QualityClassifier>>,
    last: Option<QualitySnapshot>,
}

impl QualityGate {
    /// Gate using the configured logistic model, if any
    pub fn new(config: QualityConfig, fs: f64) -> EarableResult<Self> {
        let classifier = config
            .model
            .clone()
            .map(|model| Arc::new(model) as Arc<dyn QualityClassifier>);
        Self::with_classifier(config, fs, classifier)
    }

    pub fn with_classifier(
        config: QualityConfig,
        fs: f64,
        classifier: Option<Arc<dyn QualityClassifier>>,
    ) -> EarableResult<Self> {
        config.normalization.validate()?;
        if classifier.is_none() {
            info!("no quality classifier configured, lateral pair decided by heuristics");
        }
        let chains = (0..4)
            .map(|_| FilterChain::quality(fs))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            fs,
            chains,
            extractor: FeatureExtractor::new(fs),
            classifier,
            last: None,
        })
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Most recent decision
    pub fn snapshot(&self) -> Option<QualitySnapshot> {
        self.last
    }

    /// Whether a new decision is owed at store size `size`
    pub fn is_due(&self, size: usize) -> bool {
        if size < self.config.window_samples(self.fs) {
            return false;
        }
        match self.last {
            None => true,
            Some(last) => size >= last.computed_at + self.config.stride_samples(self.fs),
        }
    }

    /// Recompute from the store when the stride has elapsed
    pub fn tick(&mut self, store: &TimeSeriesStore) -> EarableResult<Option<QualityReport>> {
        if !self.is_due(store.size(Modality::Eeg)) {
            return Ok(None);
        }
        let window = store.read_latest(
            Modality::Eeg,
            &self.config.channels.all(),
            self.config.window_samples(self.fs),
        )?;
        Ok(window.map(|w| self.evaluate(&w)))
    }

    /// Decide quality for one window whose columns follow
    /// `QualityChannels::all()` order
    pub fn evaluate(&mut self, window: &Window) -> QualityReport {
        let mut filtered: Vec<Vec<f64>> = self
            .chains
            .iter_mut()
            .zip(&window.columns)
            .map(|(chain, column)| {
                chain.reset();
                chain.apply(&demean(column))
            })
            .collect();
        filtered.resize(4, Vec::new());

        let mut ok: Vec<bool> = filtered.iter().map(|x| self.heuristic_ok(x)).collect();

        let (left, right) = (&filtered[0], &filtered[2]);
        let pair_correlation = pearson(left, right);
        let mut classifier_error = None;

        let anti_correlated = pair_correlation.is_some_and(|r| r < self.config.pair_correlation);
        let pair_decision = if anti_correlated && ok[0] && ok[2] {
            PairDecision::Correlated
        } else {
            match self.classify_pair(left, right) {
                Ok((left_ok, right_ok)) => {
                    ok[0] = left_ok;
                    ok[2] = right_ok;
                    PairDecision::Classified
                }
                Err(err) => {
                    if err.is_unavailable() {
                        debug!(error = %err, "quality classifier fallback, keeping heuristic decision");
                    } else {
                        warn!(error = %err, "quality classifier fallback, keeping heuristic decision");
                    }
                    classifier_error = Some(err);
                    PairDecision::Fallback
                }
            }
        };

        let snapshot = QualitySnapshot {
            computed_at: window.end(),
            left_lateral: ok[0],
            left_vertical: ok[1],
            right_lateral: ok[2],
            right_vertical: ok[3],
        };
        debug!(
            at = snapshot.computed_at,
            lateral = snapshot.lateral_ok(),
            vertical = snapshot.vertical_ok(),
            decision = ?pair_decision,
            "quality updated"
        );
        self.last = Some(snapshot);

        QualityReport {
            snapshot,
            pair_correlation,
            pair_decision,
            classifier_error,
        }
    }

    fn heuristic_ok(&self, data: &[f64]) -> bool {
        if data.is_empty() {
            return false;
        }
        let stats = ChannelStats::calculate(data);
        let artifacts = data.iter().filter(|x| x.abs() > self.config.artifact_level).count();
        let artifact_fraction = artifacts as f64 / data.len() as f64;

        !(stats.max_abs > self.config.amplitude_ceiling
            || stats.std_dev < self.config.flat_line_floor
            || artifact_fraction > self.config.artifact_fraction)
    }

    fn classify_pair(&mut self, left: &[f64], right: &[f64]) -> Result<(bool, bool), ClassifierError> {
        let classifier = self
            .classifier
            .clone()
            .ok_or_else(|| ClassifierError::Unavailable("no classifier configured".into()))?;

        let mut decide = |data: &[f64]| -> Result<bool, ClassifierError> {
            let features = self.extractor.quality_features(data);
            let normalised = self.config.normalization.apply(&features);
            let p = classifier.bad_probability(&normalised)?;
            if !p.is_finite() {
                return Err(ClassifierError::Failed(format!("non-finite probability {}", p)));
            }
            Ok(p.round_ties_even() == 0.0)
        };
        Ok((decide(left)?, decide(right)?))
    }
}

impl std::fmt::Debug for QualityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityGate")
            .field("fs", &self.fs)
            .field("classifier", &self.classifier.as_ref().map(|c| c.name().to_string()))
            .field("last", &self.last)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use earable_core::{SampleBatch, StoreLayout};
    use std::f64::consts::PI;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FS: f64 = 125.0;

    fn sine(freq: f64, amp: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| amp * (2.0 * PI * freq * i as f64 / FS).sin()).collect()
    }

    fn window(columns: Vec<Vec<f64>>) -> Window {
        Window {
            modality: Modality::Eeg,
            start: 0,
            columns,
        }
    }

    struct FixedClassifier {
        probabilities: Vec<f64>,
        calls: AtomicUsize,
    }

    impl QualityClassifier for FixedClassifier {
        fn name(&self) -> &str {
            "fixed"
        }

        fn bad_probability(&self, _features: &[f64]) -> Result<f64, ClassifierError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.probabilities[call % self.probabilities.len()])
        }
    }

    struct BrokenClassifier;

    impl QualityClassifier for BrokenClassifier {
        fn name(&self) -> &str {
            "broken"
        }

        fn bad_probability(&self, _features: &[f64]) -> Result<f64, ClassifierError> {
            Err(ClassifierError::Failed("model not loaded".into()))
        }
    }

    fn gate(classifier: Option<Arc<dyn QualityClassifier>>) -> QualityGate {
        QualityGate::with_classifier(QualityConfig::default(), FS, classifier).unwrap()
    }

    #[test]
    fn test_anticorrelated_pair_skips_classifier() {
        let classifier = Arc::new(FixedClassifier {
            probabilities: vec![1.0],
            calls: AtomicUsize::new(0),
        });
        let mut gate = gate(Some(classifier.clone()));
        let a = sine(10.0, 20.0, 375);
        let b: Vec<f64> = a.iter().map(|x| -x).collect();
        let report = gate.evaluate(&window(vec![a.clone(), a.clone(), b, a]));

        assert_eq!(report.pair_decision, PairDecision::Correlated);
        assert!(report.snapshot.lateral_ok());
        assert!(report.snapshot.vertical_ok());
        assert!(report.pair_correlation.unwrap() < -0.99);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_heuristics_flag_noise() {
        let mut gate = gate(None);
        let clean = sine(10.0, 20.0, 375);
        let flat = vec![3.0; 375];
        let mut spiky = clean.clone();
        spiky[200] = 900.0;
        let report = gate.evaluate(&window(vec![clean.clone(), flat, clean, spiky]));

        let snapshot = report.snapshot;
        assert!(snapshot.left_lateral && snapshot.right_lateral);
        assert!(!snapshot.left_vertical);
        assert!(!snapshot.right_vertical);
        assert!(report.used_fallback());
        assert!(matches!(report.classifier_error, Some(ClassifierError::Unavailable(_))));
    }

    #[test]
    fn test_classifier_decides_uncorrelated_pair() {
        let classifier = Arc::new(FixedClassifier {
            probabilities: vec![0.9, 0.1],
            calls: AtomicUsize::new(0),
        });
        let mut gate = gate(Some(classifier.clone()));
        let a = sine(10.0, 20.0, 375);
        let report = gate.evaluate(&window(vec![a.clone(), a.clone(), a.clone(), a]));

        assert_eq!(report.pair_decision, PairDecision::Classified);
        assert!(!report.snapshot.left_lateral);
        assert!(report.snapshot.right_lateral);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_classifier_failure_keeps_heuristic() {
        let mut gate = gate(Some(Arc::new(BrokenClassifier)));
        let a = sine(10.0, 20.0, 375);
        let report = gate.evaluate(&window(vec![a.clone(), a.clone(), a.clone(), a]));
        assert!(report.used_fallback());
        assert!(report.snapshot.lateral_ok());
        assert!(matches!(report.classifier_error, Some(ClassifierError::Failed(_))));
    }

    #[test]
    fn test_missing_classifier_is_an_expected_fallback() {
        let mut gate = gate(None);
        let a = sine(10.0, 20.0, 375);
        let report = gate.evaluate(&window(vec![a.clone(), a.clone(), a.clone(), a]));
        assert!(report.used_fallback());
        assert!(report.classifier_error.as_ref().is_some_and(ClassifierError::is_unavailable));
        assert!(!ClassifierError::Failed("boom".into()).is_unavailable());
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let model = LogisticModel {
            weights: vec![0.05; QUALITY_FEATURE_COUNT],
            bias: -0.5,
        };
        let mut gate = gate(Some(Arc::new(model)));
        let a = sine(7.0, 15.0, 375);
        let b: Vec<f64> = sine(3.0, 30.0, 375).iter().zip(&a).map(|(x, y)| x + y).collect();
        let w = window(vec![a.clone(), b.clone(), b, a]);

        let first = gate.evaluate(&w);
        let second = gate.evaluate(&w);
        assert_eq!(first, second);
    }

    #[test]
    fn test_logistic_model() {
        let model = LogisticModel {
            weights: vec![0.0; 2],
            bias: 0.0,
        };
        assert_eq!(model.bad_probability(&[1.0, 2.0]).unwrap(), 0.5);
        // an even coin toss rounds to good
        assert_eq!(0.5f64.round_ties_even(), 0.0);
        assert!(model.bad_probability(&[1.0]).is_err());
    }

    #[test]
    fn test_normalization() {
        let mut norm = FeatureNormalization::default();
        norm.means[0] = 2.0;
        norm.stds[0] = 4.0;
        let out = norm.apply(&[10.0; QUALITY_FEATURE_COUNT]);
        assert_eq!(out[0], 2.0);
        assert_eq!(out[1], 10.0);

        norm.stds[3] = 0.0;
        assert!(norm.validate().is_err());
    }

    #[test]
    fn test_tick_respects_window_and_stride() {
        let store = TimeSeriesStore::new(StoreLayout::earable(60.0)).unwrap();
        let mut gate = gate(None);
        let push = |rows: usize| {
            let values: Vec<f64> = (0..rows * 6).map(|i| 20.0 * ((i / 6) as f64 * 0.5).sin()).collect();
            store
                .append(&SampleBatch {
                    modality: Modality::Eeg,
                    channels: 6,
                    values,
                    host_timestamp: earable_core::HostTimestamp::from_secs_f64(0.0),
                    device_timestamp: None,
                })
                .unwrap();
        };

        push(300);
        assert!(gate.tick(&store).unwrap().is_none());
        push(100);
        let report = gate.tick(&store).unwrap().unwrap();
        assert_eq!(report.snapshot.computed_at, 400);
        assert!(gate.tick(&store).unwrap().is_none());
        push(125);
        assert_eq!(gate.tick(&store).unwrap().unwrap().snapshot.computed_at, 525);
        assert_eq!(gate.snapshot().unwrap().computed_at, 525);
    }
}
