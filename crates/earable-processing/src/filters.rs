//! Digital filters for window and sample-stream processing

use crate::design::{butter, iir_notch, BandKind, Coefficients};
use crate::error::ProcessingResult;
use crate::processor::{StageKind, WindowStage};
use serde::{Deserialize, Serialize};

// ============================================================================
// Direct-form application
// ============================================================================

/// Run `coeffs` over `input` in transposed direct form II
///
/// `state` holds `taps - 1` delay elements and is updated in place.
pub fn lfilter(coeffs: &Coefficients, input: &[f64], state: &mut [f64]) -> Vec<f64> {
    let (b, a) = coeffs.padded();
    let n = b.len();
    debug_assert_eq!(state.len(), n - 1);

    let mut output = Vec::with_capacity(input.len());
    for &x in input {
        let y = b[0] * x + state.first().copied().unwrap_or(0.0);
        for j in 0..n.saturating_sub(2) {
            state[j] = b[j + 1] * x + state[j + 1] - a[j + 1] * y;
        }
        if n >= 2 {
            state[n - 2] = b[n - 1] * x - a[n - 1] * y;
        }
        output.push(y);
    }
    output
}

/// Delay line for the steady state of a unit step input
pub fn lfilter_zi(coeffs: &Coefficients) -> Vec<f64> {
    let (b, a) = coeffs.padded();
    let n = b.len();
    if n < 2 {
        return Vec::new();
    }

    let mut zi = vec![0.0; n - 1];
    let a_sum: f64 = 1.0 + a[1..].iter().sum::<f64>();
    let b_sum: f64 = (1..n).map(|k| b[k] - a[k] * b[0]).sum();
    if a_sum.abs() < f64::EPSILON {
        return zi;
    }
    zi[0] = b_sum / a_sum;

    let mut asum = 1.0;
    let mut csum = 0.0;
    for k in 1..n - 1 {
        asum += a[k];
        csum += b[k] - a[k] * b[0];
        zi[k] = asum * zi[0] - csum;
    }
    zi
}

/// Zero-phase forward-backward filtering with odd extension at both edges
///
/// The extension is `3 * taps` samples, shortened when the window is too
/// small to reflect that far.
pub fn filtfilt(coeffs: &Coefficients, input: &[f64]) -> Vec<f64> {
    let len = input.len();
    if len < 2 {
        return input.to_vec();
    }
    let edge = (3 * coeffs.taps()).min(len - 1);

    let first = input[0];
    let last = input[len - 1];
    let mut extended = Vec::with_capacity(len + 2 * edge);
    extended.extend((1..=edge).rev().map(|i| 2.0 * first - input[i]));
    extended.extend_from_slice(input);
    extended.extend((1..=edge).map(|i| 2.0 * last - input[len - 1 - i]));

    let zi = lfilter_zi(coeffs);

    let mut state: Vec<f64> = zi.iter().map(|z| z * extended[0]).collect();
    let mut forward = lfilter(coeffs, &extended, &mut state);

    forward.reverse();
    let mut state: Vec<f64> = zi.iter().map(|z| z * forward[0]).collect();
    let mut backward = lfilter(coeffs, &forward, &mut state);
    backward.reverse();

    backward[edge..edge + len].to_vec()
}

// ============================================================================
// Stages
// ============================================================================

/// Zero-phase stage: refilters every window it is handed from scratch
#[derive(Debug, Clone)]
pub struct ZeroPhaseStage {
    name: String,
    coeffs: Coefficients,
}

impl ZeroPhaseStage {
    pub fn new(name: impl Into<String>, coeffs: Coefficients) -> Self {
        Self {
            name: name.into(),
            coeffs,
        }
    }

    /// Powerline notch
    pub fn notch(freq: f64, q: f64, fs: f64) -> ProcessingResult<Self> {
        Ok(Self::new(format!("notch_{}hz_q{}", freq, q), iir_notch(freq, q, fs)?))
    }

    pub fn lowpass(order: usize, cutoff: f64, fs: f64) -> ProcessingResult<Self> {
        let coeffs = butter(order, BandKind::Lowpass { cutoff }, fs)?;
        Ok(Self::new(format!("lowpass_{}hz_o{}", cutoff, order), coeffs))
    }

    pub fn highpass(order: usize, cutoff: f64, fs: f64) -> ProcessingResult<Self> {
        let coeffs = butter(order, BandKind::Highpass { cutoff }, fs)?;
        Ok(Self::new(format!("highpass_{}hz_o{}", cutoff, order), coeffs))
    }

    pub fn coefficients(&self) -> &Coefficients {
        &self.coeffs
    }
}

impl WindowStage for ZeroPhaseStage {
    fn apply(&mut self, input: &[f64]) -> Vec<f64> {
        filtfilt(&self.coeffs, input)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::ZeroPhase
    }

    fn reset(&mut self) {}
}

/// Initial delay line of a causal stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priming {
    /// Steady state for a signal that has always sat at the first sample
    FirstSample,
    /// All delay elements zero
    Zero,
}

/// Causal stage carrying its delay line across calls
#[derive(Debug, Clone)]
pub struct CausalStage {
    name: String,
    coeffs: Coefficients,
    unit_state: Vec<f64>,
    state: Option<Vec<f64>>,
    priming: Priming,
}

impl CausalStage {
    pub fn new(name: impl Into<String>, coeffs: Coefficients, priming: Priming) -> Self {
        let unit_state = lfilter_zi(&coeffs);
        Self {
            name: name.into(),
            coeffs,
            unit_state,
            state: None,
            priming,
        }
    }

    pub fn bandpass(order: usize, low: f64, high: f64, fs: f64, priming: Priming) -> ProcessingResult<Self> {
        let coeffs = butter(order, BandKind::Bandpass { low, high }, fs)?;
        Ok(Self::new(format!("bandpass_{}_{}hz_o{}", low, high, order), coeffs, priming))
    }

    /// Current delay line, `None` before the first sample
    pub fn state(&self) -> Option<&[f64]> {
        self.state.as_deref()
    }
}

impl WindowStage for CausalStage {
    fn apply(&mut self, input: &[f64]) -> Vec<f64> {
        let Some(&first) = input.first() else {
            return Vec::new();
        };
        let state = self.state.get_or_insert_with(|| match self.priming {
            Priming::FirstSample => self.unit_state.iter().map(|z| z * first).collect(),
            Priming::Zero => vec![0.0; self.unit_state.len()],
        });
        lfilter(&self.coeffs, input, state)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Causal
    }

    fn reset(&mut self) {
        self.state = None;
    }
}
