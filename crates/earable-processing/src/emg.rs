//! Jaw-clench (EMG burst) detection with a self-calibrating baseline

use crate::config::EmgConfig;
use crate::features::{FeatureExtractor, MIN_BAND_POWER};
use crate::pipeline::FilterChain;
use crate::processor::{Cadence, TickOutcome};
use crate::stats::max_abs;
use earable_core::{EarableResult, Modality, TimeSeriesStore, Window};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Adaptive reference for one channel
#[derive(Debug, Clone, PartialEq)]
struct Baseline {
    ring: VecDeque<f64>,
    ring_len: usize,
    reference: Option<f64>,
    decay: u32,
}

impl Baseline {
    fn new(ring_len: usize, decay: u32) -> Self {
        Self {
            ring: VecDeque::with_capacity(ring_len + 1),
            ring_len,
            reference: None,
            decay,
        }
    }

    /// Push `power` and return the unmasked ratio against the reference
    fn observe(&mut self, power: f64) -> f64 {
        self.ring.push_back(power);
        while self.ring.len() > self.ring_len {
            self.ring.pop_front();
        }
        let reference = *self.reference.get_or_insert(power);
        if reference > 0.0 {
            power / reference
        } else {
            0.0
        }
    }

    /// Re-learn the reference after a quiet tick or once the counter runs out
    fn calibrate(&mut self, ratio: f64, significance: f64, initial_decay: u32) -> bool {
        if ratio < significance || self.decay == 0 {
            self.reference = self.ring.iter().copied().reduce(f64::min);
            self.decay = initial_decay;
            true
        } else {
            self.decay -= 1;
            false
        }
    }
}

/// Jaw clench: band power jumped over the calibrated baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmgEvent {
    /// EEG index one past the window that fired
    pub sample_index: usize,
    /// Stream time of `sample_index` (s)
    pub time: f64,
    /// Largest masked ratio across channels
    pub peak_ratio: f64,
}

/// Per-tick measurements, reported whether or not an event fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmgTick {
    /// EMG band power per channel (dB)
    pub band_power_db: Vec<f64>,
    /// Ratio after the amplitude mask
    pub ratios: Vec<f64>,
    /// Channels whose baseline was replaced this tick
    pub recalibrated: Vec<bool>,
    pub event: Option<EmgEvent>,
}

/// Adaptive-baseline jaw clench detector over the configured EEG columns
pub struct EmgDetector {
    config: EmgConfig,
    fs: f64,
    band: (f64, f64),
    chains: Vec<FilterChain>,
    filtered: Vec<Vec<f64>>,
    baselines: Vec<Baseline>,
    extractor: FeatureExtractor,
    cadence: Cadence,
    next: Option<usize>,
}

impl EmgDetector {
    pub fn new(config: EmgConfig, fs: f64) -> EarableResult<Self> {
        let band = config.effective_band(fs);
        let channels = config.channels.len();
        let chains = (0..channels)
            .map(|_| FilterChain::emg(fs, config.filter_order, band.0, band.1))
            .collect::<Result<Vec<_>, _>>()?;
        let baselines = (0..channels)
            .map(|_| Baseline::new(config.ring_len, config.decay_ticks))
            .collect();
        let cadence = Cadence::new(config.window_samples(fs), config.stride_samples(fs));
        Ok(Self {
            config,
            fs,
            band,
            chains,
            filtered: vec![Vec::new(); channels],
            baselines,
            extractor: FeatureExtractor::new(fs),
            cadence,
            next: None,
        })
    }

    /// Designed pass band after clipping to the sampling rate
    pub fn band(&self) -> (f64, f64) {
        self.band
    }

    /// Current reference band power per channel
    pub fn references(&self) -> Vec<Option<f64>> {
        self.baselines.iter().map(|b| b.reference).collect()
    }

    pub fn tick(&mut self, store: &TimeSeriesStore) -> EarableResult<TickOutcome<EmgTick>> {
        let size = store.size(Modality::Eeg);
        if let Err(outcome) = self.cadence.poll(size) {
            return Ok(outcome);
        }
        let window = self.cadence.window();
        let start = self
            .next
            .unwrap_or_else(|| size.saturating_sub(window))
            .max(size.saturating_sub(window));
        let samples = store.read_channels(Modality::Eeg, &self.config.channels, start..size)?;
        Ok(match self.process(&samples) {
            Some(tick) => TickOutcome::Processed(tick),
            None => TickOutcome::InsufficientHistory,
        })
    }

    /// Filter the new samples in `window`; evaluate once a full window of
    /// filtered data is available
    pub fn process(&mut self, window: &Window) -> Option<EmgTick> {
        if window.columns.len() != self.chains.len() || window.is_empty() {
            return None;
        }
        if self.next.is_some_and(|next| next != window.start) {
            warn!(expected = ?self.next, got = window.start, "EMG stream discontinuous, refiltering");
            for chain in self.chains.iter_mut() {
                chain.reset();
            }
            for filtered in self.filtered.iter_mut() {
                filtered.clear();
            }
        }
        self.next = Some(window.end());

        let length = self.cadence.window();
        for ((chain, filtered), column) in self.chains.iter_mut().zip(&mut self.filtered).zip(&window.columns) {
            filtered.extend(chain.apply(column));
            let excess = filtered.len().saturating_sub(length);
            filtered.drain(..excess);
        }
        if self.filtered[0].len() < length {
            return None;
        }
        Some(self.evaluate(window.end()))
    }

    fn evaluate(&mut self, end: usize) -> EmgTick {
        let (low, high) = self.band;
        let significance = self.config.significance;
        let mut tick = EmgTick {
            band_power_db: Vec::with_capacity(self.filtered.len()),
            ratios: Vec::with_capacity(self.filtered.len()),
            recalibrated: Vec::with_capacity(self.filtered.len()),
            event: None,
        };

        for (channel, (data, baseline)) in self.filtered.iter().zip(self.baselines.iter_mut()).enumerate() {
            let power = self.extractor.band_power(data, low, high);
            let ratio = baseline.observe(power);
            let masked = if max_abs(data) > self.config.amplitude_floor {
                ratio
            } else {
                0.0
            };
            let recalibrated = baseline.calibrate(ratio, significance, self.config.decay_ticks);
            if recalibrated {
                debug!(channel, reference = ?baseline.reference, "EMG reference recalibrated");
            }

            tick.band_power_db.push(10.0 * power.max(MIN_BAND_POWER).log10());
            tick.ratios.push(masked);
            tick.recalibrated.push(recalibrated);
        }

        let peak_ratio = tick.ratios.iter().copied().fold(0.0, f64::max);
        if peak_ratio >= significance {
            debug!(peak_ratio, index = end, "EMG event");
            tick.event = Some(EmgEvent {
                sample_index: end,
                time: end as f64 / self.fs,
                peak_ratio,
            });
        }
        tick
    }
}

impl std::fmt::Debug for EmgDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmgDetector")
            .field("channels", &self.config.channels)
            .field("band", &self.band)
            .field("references", &self.references())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    const FS: f64 = 125.0;

    fn config() -> EmgConfig {
        EmgConfig {
            channels: vec![0],
            ..EmgConfig::default()
        }
    }

    /// Deterministic white noise with a per-second amplitude
    fn noise(amplitudes: &[f64]) -> Vec<f64> {
        let mut state: u64 = 7;
        let mut out = Vec::with_capacity(amplitudes.len() * 125);
        for &amp in amplitudes {
            for _ in 0..125 {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
                out.push(amp * (2.0 * unit - 1.0));
            }
        }
        out
    }

    fn run(detector: &mut EmgDetector, signal: &[f64]) -> Vec<EmgTick> {
        signal
            .chunks(125)
            .enumerate()
            .filter_map(|(i, chunk)| {
                detector.process(&Window {
                    modality: Modality::Eeg,
                    start: i * 125,
                    columns: vec![chunk.to_vec()],
                })
            })
            .collect()
    }

    #[test]
    fn test_single_spike_fires_once() {
        let mut emg = EmgDetector::new(config(), FS).unwrap();
        let signal = noise(&[20.0, 20.0, 20.0, 20.0, 20.0, 100.0, 20.0, 20.0]);
        let ticks = run(&mut emg, &signal);

        let fired: Vec<usize> = ticks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.event.is_some())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(fired, vec![5]);
        let ratio = ticks[5].event.unwrap().peak_ratio;
        assert!(ratio > 3.5 && ratio < 6.5, "ratio {}", ratio);
    }

    #[test]
    fn test_sustained_activity_recalibrates() {
        let mut emg = EmgDetector::new(config(), FS).unwrap();
        let mut amplitudes = vec![20.0; 4];
        amplitudes.extend([100.0; 8]);
        let ticks = run(&mut emg, &noise(&amplitudes));

        let fired: Vec<bool> = ticks.iter().map(|t| t.event.is_some()).collect();
        // the first four high ticks fire, then the reference catches up
        assert_eq!(&fired[4..8], &[true, true, true, true]);
        assert!(fired[8..].iter().all(|f| !f));
        assert!(ticks[7].recalibrated[0]);
        assert!(ticks[9].ratios[0] < 1.5);
    }

    #[test]
    fn test_quiet_window_is_masked() {
        let mut emg = EmgDetector::new(config(), FS).unwrap();
        let ticks = run(&mut emg, &noise(&[0.5, 0.5, 2.5]));
        // a 5x jump below the amplitude floor never fires
        assert!(ticks.iter().all(|t| t.event.is_none()));
        assert_eq!(ticks[2].ratios[0], 0.0);
    }

    #[test]
    fn test_band_is_clipped_below_nyquist() {
        let emg = EmgDetector::new(EmgConfig::default(), FS).unwrap();
        assert_eq!(emg.band(), (10.0, 56.25));
    }

    #[test]
    fn test_baseline_rules() {
        let mut baseline = Baseline::new(2, 3);
        assert_eq!(baseline.observe(4.0), 1.0);
        assert!(baseline.calibrate(1.0, 3.0, 3));
        assert_eq!(baseline.observe(20.0), 5.0);
        assert!(!baseline.calibrate(5.0, 3.0, 3));
        assert_eq!(baseline.decay, 2);

        let mut dead = Baseline::new(2, 0);
        dead.reference = Some(0.0);
        assert_eq!(dead.observe(3.0), 0.0);
    }

    #[test]
    fn test_tick_reads_store() {
        use earable_core::{HostTimestamp, SampleBatch, StoreLayout};

        let store = TimeSeriesStore::new(StoreLayout::earable(60.0)).unwrap();
        let mut emg = EmgDetector::new(config(), FS).unwrap();
        assert_eq!(emg.tick(&store).unwrap(), TickOutcome::InsufficientHistory);

        let signal = noise(&[20.0]);
        let values: Vec<f64> = signal.iter().flat_map(|&v| [v, 0.0, 0.0, 0.0, 0.0, 0.0]).collect();
        store
            .append(&SampleBatch {
                modality: Modality::Eeg,
                channels: 6,
                values,
                host_timestamp: HostTimestamp::from_secs_f64(0.0),
                device_timestamp: None,
            })
            .unwrap();

        let tick = emg.tick(&store).unwrap().processed().unwrap();
        assert_eq!(tick.ratios, vec![1.0]);
        assert_eq!(emg.tick(&store).unwrap(), TickOutcome::NotDue);
    }
}
