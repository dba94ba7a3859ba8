//! Spectral and statistical features for quality classification and EMG

use crate::stats::ChannelStats;
use rustfft::{num_complex::Complex, FftPlanner};

/// Band edges used by the quality features, in Hz
pub const QUALITY_BANDS: [f64; 7] = [0.2, 2.0, 4.0, 8.0, 13.0, 20.0, 60.0];
/// Number of quality features per channel
pub const QUALITY_FEATURE_COUNT: usize = 16;
/// Floor applied before converting band power to decibels
pub const MIN_BAND_POWER: f64 = 1e-7;
/// Largest interval used by the Higuchi fractal dimension
pub const HIGUCHI_KMAX: usize = 10;

/// How band powers are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandScale {
    /// Raw integral
    Linear,
    /// `10 log10(max(p, MIN_BAND_POWER))`
    Decibel,
    /// Fraction of the whole one-sided spectrum
    Normalized,
}

/// One-sided FFT magnitude spectrum
#[derive(Debug, Clone)]
pub struct MagnitudeSpectrum {
    /// Bin spacing in Hz
    pub resolution: f64,
    /// `|X[k]|` for bins with `0 <= f < fs/2`, plus the Nyquist bin for odd lengths
    pub magnitudes: Vec<f64>,
}

impl MagnitudeSpectrum {
    pub fn compute(planner: &mut FftPlanner<f64>, data: &[f64], fs: f64) -> Self {
        let n = data.len();
        if n == 0 {
            return Self {
                resolution: 0.0,
                magnitudes: Vec::new(),
            };
        }
        let fft = planner.plan_fft_forward(n);
        let mut buffer: Vec<Complex<f64>> = data.iter().map(|&x| Complex::new(x, 0.0)).collect();
        fft.process(&mut buffer);

        // positive-frequency bins only; an even-length Nyquist bin is negative
        let bins = (n + 1) / 2;
        Self {
            resolution: fs / n as f64,
            magnitudes: buffer[..bins].iter().map(|c| c.norm()).collect(),
        }
    }

    pub fn frequency(&self, bin: usize) -> f64 {
        bin as f64 * self.resolution
    }

    /// Integral over `[low, high]` Hz, both edges inclusive
    pub fn band_integral(&self, low: f64, high: f64) -> f64 {
        let first = self
            .magnitudes
            .iter()
            .enumerate()
            .position(|(k, _)| self.frequency(k) >= low);
        let Some(first) = first else {
            return 0.0;
        };
        let last = (first..self.magnitudes.len())
            .take_while(|&k| self.frequency(k) <= high)
            .last();
        match last {
            Some(last) => simpson(&self.magnitudes[first..=last], self.resolution),
            None => 0.0,
        }
    }

    pub fn total(&self) -> f64 {
        simpson(&self.magnitudes, self.resolution)
    }
}

/// Composite Simpson integration over equally spaced samples
///
/// An even number of samples is handled by averaging the two ways of
/// closing the last interval with a trapezoid.
pub fn simpson(y: &[f64], dx: f64) -> f64 {
    fn odd(y: &[f64], dx: f64) -> f64 {
        if y.len() < 3 {
            return 0.0;
        }
        let last = y.len() - 1;
        let inner: f64 = y[1..last]
            .iter()
            .enumerate()
            .map(|(i, v)| if i % 2 == 0 { 4.0 * v } else { 2.0 * v })
            .sum();
        dx / 3.0 * (y[0] + inner + y[last])
    }

    match y.len() {
        0 | 1 => 0.0,
        2 => 0.5 * dx * (y[0] + y[1]),
        n if n % 2 == 1 => odd(y, dx),
        n => {
            let head = odd(&y[..n - 1], dx) + 0.5 * dx * (y[n - 2] + y[n - 1]);
            let tail = odd(&y[1..], dx) + 0.5 * dx * (y[0] + y[1]);
            0.5 * (head + tail)
        }
    }
}

/// Power in each consecutive band `[edges[i], edges[i+1]]`
pub fn band_powers(
    planner: &mut FftPlanner<f64>,
    data: &[f64],
    fs: f64,
    edges: &[f64],
    scale: BandScale,
) -> Vec<f64> {
    let spectrum = MagnitudeSpectrum::compute(planner, data, fs);
    let total = spectrum.total();
    edges
        .windows(2)
        .map(|band| {
            let power = spectrum.band_integral(band[0], band[1]);
            match scale {
                BandScale::Linear => power,
                BandScale::Decibel => 10.0 * power.max(MIN_BAND_POWER).log10(),
                BandScale::Normalized => {
                    if total > 0.0 {
                        power / total
                    } else {
                        0.0
                    }
                }
            }
        })
        .collect()
}

/// Shannon entropy of `|x|` treated as an unnormalised distribution
pub fn abs_entropy(data: &[f64]) -> f64 {
    let sum: f64 = data.iter().map(|x| x.abs()).sum();
    if sum <= 0.0 {
        return 0.0;
    }
    data.iter()
        .map(|x| x.abs() / sum)
        .filter(|&p| p > 0.0)
        .map(|p| -p * p.ln())
        .sum()
}

/// Higuchi fractal dimension
pub fn higuchi_fd(data: &[f64], kmax: usize) -> f64 {
    let n = data.len();
    let mut xs = Vec::with_capacity(kmax);
    let mut ys = Vec::with_capacity(kmax);

    for k in 1..=kmax {
        let mut lk = 0.0;
        for m in 0..k {
            let n_max = n.saturating_sub(m + 1) / k;
            if n_max == 0 {
                continue;
            }
            let mut length = 0.0;
            for j in 1..n_max {
                length += (data[m + j * k] - data[m + (j - 1) * k]).abs();
            }
            length /= k as f64;
            length *= (n as f64 - 1.0) / (k * n_max) as f64;
            lk += length;
        }
        lk /= k as f64;
        if lk > 0.0 {
            xs.push((1.0 / k as f64).ln());
            ys.push(lk.ln());
        }
    }

    slope(&xs, &ys)
}

/// Least-squares slope of `ys` against `xs`
fn slope(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    if xs.len() < 2 {
        return 0.0;
    }
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let num: f64 = xs.iter().zip(ys).map(|(x, y)| (x - mx) * (y - my)).sum();
    let den: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Reusable extractor holding the FFT planner
pub struct FeatureExtractor {
    planner: FftPlanner<f64>,
    fs: f64,
}

impl FeatureExtractor {
    pub fn new(fs: f64) -> Self {
        Self {
            planner: FftPlanner::new(),
            fs,
        }
    }

    pub fn sampling_rate(&self) -> f64 {
        self.fs
    }

    /// Quality feature vector:
    /// 6 dB band powers, 6 normalised band powers, max, mean |x|,
    /// entropy of |x|, Higuchi FD
    pub fn quality_features(&mut self, data: &[f64]) -> [f64; QUALITY_FEATURE_COUNT] {
        let mut features = [0.0; QUALITY_FEATURE_COUNT];
        let db = band_powers(&mut self.planner, data, self.fs, &QUALITY_BANDS, BandScale::Decibel);
        let norm = band_powers(&mut self.planner, data, self.fs, &QUALITY_BANDS, BandScale::Normalized);
        features[..6].copy_from_slice(&db);
        features[6..12].copy_from_slice(&norm);

        let stats = ChannelStats::calculate(data);
        features[12] = stats.max;
        features[13] = stats.mean_abs;
        features[14] = abs_entropy(data);
        features[15] = higuchi_fd(data, HIGUCHI_KMAX);
        features
    }

    /// Linear power in `[low, high]` Hz
    pub fn band_power(&mut self, data: &[f64], low: f64, high: f64) -> f64 {
        band_powers(&mut self.planner, data, self.fs, &[low, high], BandScale::Linear)
            .first()
            .copied()
            .unwrap_or(0.0)
    }
}

impl std::fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureExtractor").field("fs", &self.fs).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, amp: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| amp * (2.0 * PI * freq * i as f64 / fs).sin()).collect()
    }

    #[test]
    fn test_simpson_exact_for_quadratics() {
        let y: Vec<f64> = (0..5).map(|i| (i as f64).powi(2)).collect();
        assert!((simpson(&y, 1.0) - 64.0 / 3.0).abs() < 1e-12);
        assert_eq!(simpson(&[1.0, 3.0], 2.0), 4.0);
        assert_eq!(simpson(&[5.0], 1.0), 0.0);
        // even count of a straight line is exact
        assert!((simpson(&[0.0, 1.0, 2.0, 3.0], 1.0) - 4.5).abs() < 1e-12);
    }

    #[test]
    fn test_spectrum_excludes_negative_nyquist() {
        let mut planner = FftPlanner::new();
        let even = MagnitudeSpectrum::compute(&mut planner, &[1.0; 8], 8.0);
        assert_eq!(even.magnitudes.len(), 4);
        let odd = MagnitudeSpectrum::compute(&mut planner, &[1.0; 9], 9.0);
        assert_eq!(odd.magnitudes.len(), 5);
        assert!((even.magnitudes[0] - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_band_power_tracks_amplitude() {
        let fs = 125.0;
        let mut extractor = FeatureExtractor::new(fs);
        let quiet = extractor.band_power(&sine(30.0, 20.0, fs, 125), 10.0, 62.5);
        let loud = extractor.band_power(&sine(30.0, 100.0, fs, 125), 10.0, 62.5);
        assert!((loud / quiet - 5.0).abs() < 1e-9);
        let outside = extractor.band_power(&sine(3.0, 100.0, fs, 125), 10.0, 62.5);
        assert!(outside < quiet * 0.01);
    }

    #[test]
    fn test_normalized_bands_sum_below_one() {
        let fs = 125.0;
        let mut planner = FftPlanner::new();
        let data: Vec<f64> = sine(10.0, 20.0, fs, 375)
            .iter()
            .zip(sine(3.0, 10.0, fs, 375))
            .map(|(a, b)| a + b)
            .collect();
        let norm = band_powers(&mut planner, &data, fs, &QUALITY_BANDS, BandScale::Normalized);
        let sum: f64 = norm.iter().sum();
        // Simpson weights differ between a band and the whole spectrum
        assert!(sum > 0.5 && sum < 1.5, "sum {}", sum);
        // 10 Hz falls in the 8-13 Hz band
        assert!(norm[3] > norm[0] && norm[3] > norm[5]);
    }

    #[test]
    fn test_decibel_floor() {
        let mut planner = FftPlanner::new();
        let db = band_powers(&mut planner, &[0.0; 64], 125.0, &QUALITY_BANDS, BandScale::Decibel);
        assert!(db.iter().all(|&v| (v + 70.0).abs() < 1e-9));
    }

    #[test]
    fn test_entropy() {
        assert!((abs_entropy(&[1.0, -1.0, 1.0, -1.0]) - 4f64.ln()).abs() < 1e-12);
        assert_eq!(abs_entropy(&[0.0; 4]), 0.0);
        assert_eq!(abs_entropy(&[0.0, 5.0, 0.0]), 0.0);
    }

    #[test]
    fn test_higuchi_line_and_noise() {
        let line: Vec<f64> = (0..300).map(|i| i as f64).collect();
        let fd = higuchi_fd(&line, HIGUCHI_KMAX);
        assert!((fd - 1.0).abs() < 0.05, "fd {}", fd);

        // alternating sequence is maximally rough
        let zigzag: Vec<f64> = (0..300).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!(higuchi_fd(&zigzag, HIGUCHI_KMAX) > 1.5);
    }

    #[test]
    fn test_quality_feature_vector_layout() {
        let fs = 125.0;
        let data = sine(10.0, 20.0, fs, 375);
        let features = FeatureExtractor::new(fs).quality_features(&data);
        assert_eq!(features.len(), QUALITY_FEATURE_COUNT);
        assert!((features[12] - 20.0).abs() < 0.5);
        assert!((features[13] - 40.0 / PI).abs() < 0.5);
        assert!(features.iter().all(|f| f.is_finite()));
    }
}
