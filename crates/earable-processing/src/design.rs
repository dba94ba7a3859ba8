//! IIR coefficient design
//!
//! Butterworth filters go through the analog zero/pole/gain prototype, a
//! frequency transform and the bilinear transform. The notch is the classic
//! second-order design parameterised by centre frequency and quality factor.

use crate::error::{ProcessingError, ProcessingResult};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Transfer function `b(z) / a(z)`, normalised so `a[0] == 1`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    pub b: Vec<f64>,
    pub a: Vec<f64>,
}

impl Coefficients {
    pub fn new(b: Vec<f64>, a: Vec<f64>) -> ProcessingResult<Self> {
        let a0 = match a.first() {
            Some(&a0) if a0 != 0.0 => a0,
            _ => return Err(ProcessingError::design("a[0] must be non-zero")),
        };
        if b.is_empty() {
            return Err(ProcessingError::design("numerator is empty"));
        }
        Ok(Self {
            b: b.iter().map(|v| v / a0).collect(),
            a: a.iter().map(|v| v / a0).collect(),
        })
    }

    /// Number of taps after padding both polynomials to equal length
    pub fn taps(&self) -> usize {
        self.a.len().max(self.b.len())
    }

    /// Both polynomials zero-padded to `taps()`
    pub(crate) fn padded(&self) -> (Vec<f64>, Vec<f64>) {
        let n = self.taps();
        let mut b = self.b.clone();
        let mut a = self.a.clone();
        b.resize(n, 0.0);
        a.resize(n, 0.0);
        (b, a)
    }

    /// Magnitude response at `freq` Hz
    pub fn gain_at(&self, freq: f64, fs: f64) -> f64 {
        let w = 2.0 * PI * freq / fs;
        let eval = |coeffs: &[f64]| {
            coeffs
                .iter()
                .enumerate()
                .fold(Complex64::new(0.0, 0.0), |acc, (k, &c)| {
                    acc + Complex64::from_polar(c, -w * k as f64)
                })
        };
        (eval(&self.b) / eval(&self.a)).norm()
    }
}

/// Pass band of a Butterworth design, in Hz
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BandKind {
    Lowpass { cutoff: f64 },
    Highpass { cutoff: f64 },
    Bandpass { low: f64, high: f64 },
}

impl BandKind {
    fn validate(&self, fs: f64) -> ProcessingResult<()> {
        let nyquist = fs / 2.0;
        let in_range = |f: f64| f > 0.0 && f < nyquist;
        let ok = match *self {
            BandKind::Lowpass { cutoff } | BandKind::Highpass { cutoff } => in_range(cutoff),
            BandKind::Bandpass { low, high } => in_range(low) && in_range(high) && low < high,
        };
        if ok {
            Ok(())
        } else {
            Err(ProcessingError::design(format!(
                "{:?} must lie strictly inside (0, {}) Hz",
                self, nyquist
            )))
        }
    }
}

/// Second-order notch at `freq` Hz with quality factor `q`
pub fn iir_notch(freq: f64, q: f64, fs: f64) -> ProcessingResult<Coefficients> {
    if !(fs > 0.0) || !(freq > 0.0) || freq >= fs / 2.0 {
        return Err(ProcessingError::design(format!(
            "notch at {} Hz needs 0 < f < {} Hz",
            freq,
            fs / 2.0
        )));
    }
    if !(q > 0.0) {
        return Err(ProcessingError::design("notch quality factor must be positive"));
    }

    let w0 = 2.0 * freq / fs;
    let bw = w0 / q * PI;
    let w0 = w0 * PI;
    let beta = (bw / 2.0).tan();
    let gain = 1.0 / (1.0 + beta);
    let cos = w0.cos();

    Coefficients::new(
        vec![gain, -2.0 * gain * cos, gain],
        vec![1.0, -2.0 * gain * cos, 2.0 * gain - 1.0],
    )
}

/// Digital Butterworth filter of the given order
pub fn butter(order: usize, band: BandKind, fs: f64) -> ProcessingResult<Coefficients> {
    if order == 0 || order > 8 {
        return Err(ProcessingError::design(format!("order {} outside 1..=8", order)));
    }
    if !(fs > 0.0) {
        return Err(ProcessingError::design("sampling rate must be positive"));
    }
    band.validate(fs)?;

    // Normalised to a sampling rate of 2, pre-warped for the bilinear map
    let warp = |f: f64| 4.0 * (PI * (2.0 * f / fs) / 2.0).tan();

    let poles = analog_prototype(order);
    let (zeros, poles, gain) = match band {
        BandKind::Lowpass { cutoff } => lowpass_transform(&poles, warp(cutoff)),
        BandKind::Highpass { cutoff } => highpass_transform(&poles, warp(cutoff)),
        BandKind::Bandpass { low, high } => {
            let (w1, w2) = (warp(low), warp(high));
            bandpass_transform(&poles, (w1 * w2).sqrt(), w2 - w1)
        }
    };
    let (zeros, poles, gain) = bilinear(zeros, poles, gain);

    let b = poly(&zeros).into_iter().map(|c| c * gain).collect();
    let a = poly(&poles);
    Coefficients::new(b, a)
}

/// Poles of the unit-cutoff analog Butterworth lowpass
fn analog_prototype(order: usize) -> Vec<Complex64> {
    let n = order as i64;
    (0..order as i64)
        .map(|i| {
            let m = (-n + 1 + 2 * i) as f64;
            -Complex64::from_polar(1.0, PI * m / (2.0 * n as f64))
        })
        .collect()
}

type Zpk = (Vec<Complex64>, Vec<Complex64>, f64);

fn lowpass_transform(poles: &[Complex64], wo: f64) -> Zpk {
    let degree = poles.len() as i32;
    (Vec::new(), poles.iter().map(|&p| p * wo).collect(), wo.powi(degree))
}

fn highpass_transform(poles: &[Complex64], wo: f64) -> Zpk {
    let zeros = vec![Complex64::new(0.0, 0.0); poles.len()];
    let prod = poles.iter().fold(Complex64::new(1.0, 0.0), |acc, &p| acc * -p);
    let gain = (Complex64::new(1.0, 0.0) / prod).re;
    (zeros, poles.iter().map(|&p| wo / p).collect(), gain)
}

fn bandpass_transform(poles: &[Complex64], wo: f64, bw: f64) -> Zpk {
    let degree = poles.len();
    let mut out = Vec::with_capacity(2 * degree);
    let scaled: Vec<Complex64> = poles.iter().map(|&p| p * (bw / 2.0)).collect();
    for &p in &scaled {
        out.push(p + (p * p - wo * wo).sqrt());
    }
    for &p in &scaled {
        out.push(p - (p * p - wo * wo).sqrt());
    }
    let zeros = vec![Complex64::new(0.0, 0.0); degree];
    (zeros, out, bw.powi(degree as i32))
}

/// Bilinear transform for a normalised sampling rate of 2
fn bilinear(zeros: Vec<Complex64>, poles: Vec<Complex64>, gain: f64) -> Zpk {
    let fs2 = Complex64::new(4.0, 0.0);
    let degree = poles.len() - zeros.len();

    let num = zeros.iter().fold(Complex64::new(1.0, 0.0), |acc, &z| acc * (fs2 - z));
    let den = poles.iter().fold(Complex64::new(1.0, 0.0), |acc, &p| acc * (fs2 - p));

    let mut digital_zeros: Vec<Complex64> = zeros.iter().map(|&z| (fs2 + z) / (fs2 - z)).collect();
    digital_zeros.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(degree));
    let digital_poles = poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect();

    (digital_zeros, digital_poles, gain * (num / den).re)
}

/// Real coefficients of the monic polynomial with the given roots
fn poly(roots: &[Complex64]) -> Vec<f64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for &root in roots {
        let mut next = coeffs.clone();
        next.push(Complex64::new(0.0, 0.0));
        for i in 1..next.len() {
            next[i] -= root * coeffs[i - 1];
        }
        coeffs = next;
    }
    coeffs.into_iter().map(|c| c.re).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < tol, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_notch_matches_reference_design() {
        // 60 Hz, Q 30 at 200 Hz
        let c = iir_notch(60.0, 30.0, 200.0).unwrap();
        assert_close(&c.b, &[0.96953125, 0.59920327, 0.96953125], 1e-6);
        assert_close(&c.a, &[1.0, 0.59920327, 0.93906251], 1e-6);
    }

    #[test]
    fn test_notch_rejects_centre_and_passes_elsewhere() {
        let c = iir_notch(50.0, 10.0, 125.0).unwrap();
        assert!(c.gain_at(50.0, 125.0) < 1e-6);
        assert!((c.gain_at(5.0, 125.0) - 1.0).abs() < 0.02);
    }

    #[test]
    fn test_first_order_lowpass() {
        // butter(1, 0.5) normalised: b = [0.5, 0.5], a = [1, 0]
        let c = butter(1, BandKind::Lowpass { cutoff: 25.0 }, 100.0).unwrap();
        assert_close(&c.b, &[0.5, 0.5], 1e-12);
        assert_close(&c.a, &[1.0, 0.0], 1e-12);
    }

    #[test]
    fn test_second_order_lowpass_reference() {
        // butter(2, 0.2)
        let c = butter(2, BandKind::Lowpass { cutoff: 10.0 }, 100.0).unwrap();
        assert_close(&c.b, &[0.06745527, 0.13491055, 0.06745527], 1e-7);
        assert_close(&c.a, &[1.0, -1.1429805, 0.4128016], 1e-6);
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let c = butter(1, BandKind::Highpass { cutoff: 0.3 }, 125.0).unwrap();
        assert!(c.gain_at(0.0, 125.0) < 1e-9);
        assert!((c.gain_at(20.0, 125.0) - 1.0).abs() < 1e-3);
        assert!((c.gain_at(0.3, 125.0) - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_bandpass_shape() {
        let c = butter(2, BandKind::Bandpass { low: 0.1, high: 10.0 }, 125.0).unwrap();
        assert_eq!(c.a.len(), 5);
        assert_eq!(c.b.len(), 5);
        assert!(c.gain_at(0.0, 125.0) < 1e-9);
        assert!((c.gain_at(1.0, 125.0) - 1.0).abs() < 0.01);
        assert!((c.gain_at(10.0, 125.0) - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!(c.gain_at(40.0, 125.0) < 0.1);
    }

    #[test]
    fn test_invalid_designs() {
        assert!(butter(0, BandKind::Lowpass { cutoff: 10.0 }, 125.0).is_err());
        assert!(butter(2, BandKind::Lowpass { cutoff: 70.0 }, 125.0).is_err());
        assert!(butter(2, BandKind::Bandpass { low: 10.0, high: 5.0 }, 125.0).is_err());
        assert!(iir_notch(60.0, 12.0, 100.0).is_err());
    }
}
