//! Blink detection on the vertical OTE_L/OTE_R pair
//!
//! New samples are filtered once and appended to a bounded history. A burst
//! of variance in the latest sub-window proposes a candidate region around
//! it; the region is searched for peaks only after the history has grown past
//! its end.

use crate::config::BlinkConfig;
use crate::pipeline::FilterChain;
use crate::processor::{Cadence, TickOutcome};
use crate::quality::QualitySnapshot;
use crate::stats::{argmax, mean_of_pair, pearson, peak_prominence, runs_where, std_dev};
use earable_core::{EarableResult, Modality, TimeSeriesStore, Window};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::Range;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlinkEvent {
    /// EEG index of the peak
    pub sample_index: usize,
    /// Mean-channel amplitude at the peak (µV)
    pub amplitude: f64,
    /// Stream time of the peak (s)
    pub time: f64,
}

pub struct BlinkDetector {
    config: BlinkConfig,
    fs: f64,
    channels: [usize; 2],
    chains: [FilterChain; 2],
    cadence: Cadence,
    history: [Vec<f64>; 2],
    /// Store index of `history[_][0]`
    offset: usize,
    /// Store index of the next sample to filter
    next: Option<usize>,
    /// Pending regions in store indices
    candidates: VecDeque<Range<usize>>,
    last_peak: Option<usize>,
}

impl BlinkDetector {
    /// Detector over `(left, right)` vertical EEG columns
    pub fn new(config: BlinkConfig, channels: (usize, usize), fs: f64) -> EarableResult<Self> {
        config.validate()?;
        let cadence = Cadence::new(config.window_samples(fs), config.stride_samples(fs));
        Ok(Self {
            chains: [FilterChain::blink(fs)?, FilterChain::blink(fs)?],
            config,
            fs,
            channels: [channels.0, channels.1],
            cadence,
            history: [Vec::new(), Vec::new()],
            offset: 0,
            next: None,
            candidates: VecDeque::new(),
            last_peak: None,
        })
    }

    /// Filtered history length in samples
    pub fn history_len(&self) -> usize {
        self.history[0].len()
    }

    pub fn pending_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn last_peak(&self) -> Option<usize> {
        self.last_peak
    }

    fn max_history(&self) -> usize {
        (self.config.max_history_secs * self.fs) as usize
    }

    /// Poll the store; runs when the stride elapsed and both vertical
    /// channels passed the quality gate
    pub fn tick(
        &mut self,
        store: &TimeSeriesStore,
        quality: Option<&QualitySnapshot>,
    ) -> EarableResult<TickOutcome<Vec<BlinkEvent>>> {
        let size = store.size(Modality::Eeg);
        if let Err(outcome) = self.cadence.poll(size) {
            return Ok(outcome);
        }
        if !quality.is_some_and(QualitySnapshot::vertical_ok) {
            return Ok(TickOutcome::Gated);
        }
        let start = self
            .next
            .unwrap_or_else(|| size.saturating_sub(self.max_history()))
            .max(size.saturating_sub(self.max_history()));
        let window = store.read_channels(Modality::Eeg, &self.channels, start..size)?;
        Ok(TickOutcome::Processed(self.ingest(&window)))
    }

    /// Filter the new samples in `window`, test for a candidate and resolve
    /// every candidate the history now covers
    pub fn ingest(&mut self, window: &Window) -> Vec<BlinkEvent> {
        if window.columns.len() < 2 || window.is_empty() {
            return Vec::new();
        }
        if self.next != Some(window.start) {
            if self.next.is_some() {
                warn!(
                    expected = ?self.next,
                    got = window.start,
                    "blink history discontinuous, restarting"
                );
            }
            self.restart(window.start);
        }

        for (i, column) in window.columns.iter().take(2).enumerate() {
            let input: Vec<f64> = if self.config.invert_polarity {
                column.iter().map(|v| -v).collect()
            } else {
                column.clone()
            };
            let filtered = self.chains[i].apply(&input);
            self.history[i].extend(filtered);
        }
        self.next = Some(window.end());
        self.trim();

        self.propose_candidate();
        self.resolve_candidates()
    }

    fn restart(&mut self, start: usize) {
        for chain in self.chains.iter_mut() {
            chain.reset();
        }
        for history in self.history.iter_mut() {
            history.clear();
        }
        self.offset = start;
        self.candidates.clear();
    }

    fn trim(&mut self) {
        let excess = self.history_len().saturating_sub(self.max_history());
        if excess == 0 {
            return;
        }
        for history in self.history.iter_mut() {
            history.drain(..excess);
        }
        self.offset += excess;
        let offset = self.offset;
        self.candidates.retain(|c| c.end > offset);
        for candidate in self.candidates.iter_mut() {
            candidate.start = candidate.start.max(offset);
        }
    }

    fn propose_candidate(&mut self) {
        let len = self.history_len();
        let window = self.config.window_samples(self.fs);
        if len < window {
            return;
        }
        let recent = mean_of_pair(&self.history[0][len - window..], &self.history[1][len - window..]);
        let spread = std_dev(&recent);
        if spread < self.config.std_threshold {
            return;
        }

        let mid = (len as f64 - window as f64 / 2.0) as usize;
        let ext = (self.config.search_region_secs / 2.0 * self.fs) as usize;
        let region = self.offset + mid.saturating_sub(ext)..self.offset + mid + ext;
        trace!(std = spread, ?region, "blink candidate");
        self.candidates.push_back(region);
    }

    fn resolve_candidates(&mut self) -> Vec<BlinkEvent> {
        let covered = self.offset + self.history_len();
        let mut events = Vec::new();
        while let Some(region) = self.candidates.front().cloned() {
            if region.end > covered {
                break;
            }
            self.candidates.pop_front();
            for peak in self.find_peaks(region) {
                if self.last_peak.is_some_and(|last| peak.sample_index <= last) {
                    continue;
                }
                debug!(index = peak.sample_index, amplitude = peak.amplitude, "blink detected");
                self.last_peak = Some(peak.sample_index);
                events.push(peak);
            }
        }
        events
    }

    fn find_peaks(&self, region: Range<usize>) -> Vec<BlinkEvent> {
        let local = region.start - self.offset..region.end - self.offset;
        let left = &self.history[0][local.clone()];
        let right = &self.history[1][local];
        let mean = mean_of_pair(left, right);

        if !pearson(left, right).is_some_and(|r| r >= self.config.correlation_threshold) {
            return Vec::new();
        }

        runs_where(&mean, |v| v >= self.config.min_amplitude)
            .into_iter()
            .filter_map(|run| argmax(&mean[run.clone()]).map(|i| run.start + i))
            .filter(|&peak| peak_prominence(&mean, peak) >= self.config.min_prominence)
            .filter(|&peak| {
                left[peak] <= self.config.max_amplitude && right[peak] <= self.config.max_amplitude
            })
            .map(|peak| {
                let sample_index = region.start + peak;
                BlinkEvent {
                    sample_index,
                    amplitude: mean[peak],
                    time: sample_index as f64 / self.fs,
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for BlinkDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlinkDetector")
            .field("channels", &self.channels)
            .field("offset", &self.offset)
            .field("history", &self.history_len())
            .field("candidates", &self.candidates)
            .field("last_peak", &self.last_peak)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const FS: f64 = 125.0;

    /// Raised-cosine dip of `amp` lasting `width` seconds from `start`
    fn dip(n: usize, start: f64, width: f64, amp: f64) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let t = i as f64 / FS - start;
                if (0.0..=width).contains(&t) {
                    -amp * 0.5 * (1.0 - (2.0 * PI * t / width).cos())
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn feed(detector: &mut BlinkDetector, left: &[f64], right: &[f64]) -> Vec<BlinkEvent> {
        let mut events = Vec::new();
        let mut start = 0;
        while start < left.len() {
            let end = (start + 31).min(left.len());
            let window = Window {
                modality: Modality::Eeg,
                start,
                columns: vec![left[start..end].to_vec(), right[start..end].to_vec()],
            };
            events.extend(detector.ingest(&window));
            start = end;
        }
        events
    }

    fn detector() -> BlinkDetector {
        BlinkDetector::new(BlinkConfig::default(), (1, 4), FS).unwrap()
    }

    #[test]
    fn test_single_blink_detected_once() {
        let signal = dip(500, 1.0, 0.4, 250.0);
        let mut blink = detector();
        let events = feed(&mut blink, &signal, &signal);

        assert_eq!(events.len(), 1, "{:?}", events);
        let event = events[0];
        // filter delay puts the peak shortly after the dip centre
        assert!(event.time > 1.15 && event.time < 1.45, "{:?}", event);
        assert!(event.amplitude > 100.0);
        assert_eq!(blink.pending_candidates(), 0);
    }

    #[test]
    fn test_resolution_waits_for_look_ahead() {
        let signal = dip(200, 1.0, 0.4, 250.0);
        let mut blink = detector();
        // history ends 0.2 s after the dip, short of the search region
        let events = feed(&mut blink, &signal[..155], &signal[..155]);
        assert!(events.is_empty());
        assert!(blink.pending_candidates() > 0);
    }

    #[test]
    fn test_uncorrelated_channels_rejected() {
        let left = dip(500, 1.0, 0.4, 250.0);
        let right: Vec<f64> = left.iter().map(|v| -v).collect();
        assert!(feed(&mut detector(), &left, &right).is_empty());
    }

    #[test]
    fn test_small_deflection_ignored() {
        let signal = dip(500, 1.0, 0.4, 60.0);
        let mut blink = detector();
        assert!(feed(&mut blink, &signal, &signal).is_empty());
        assert_eq!(blink.pending_candidates(), 0);
    }

    #[test]
    fn test_two_blinks_in_order() {
        let first = dip(750, 1.0, 0.4, 250.0);
        let second = dip(750, 3.5, 0.4, 250.0);
        let signal: Vec<f64> = first.iter().zip(&second).map(|(a, b)| a + b).collect();
        let events = feed(&mut detector(), &signal, &signal);
        assert_eq!(events.len(), 2, "{:?}", events);
        assert!(events[0].sample_index < events[1].sample_index);
    }

    #[test]
    fn test_discontinuity_restarts_history() {
        let mut blink = detector();
        let window = |start: usize| Window {
            modality: Modality::Eeg,
            start,
            columns: vec![vec![0.0; 31], vec![0.0; 31]],
        };
        blink.ingest(&window(0));
        blink.ingest(&window(31));
        assert_eq!(blink.history_len(), 62);
        blink.ingest(&window(500));
        assert_eq!(blink.history_len(), 31);
    }

    fn quiet_store() -> TimeSeriesStore {
        TimeSeriesStore::new(earable_core::StoreLayout::earable(60.0)).unwrap()
    }

    fn append_quiet(store: &TimeSeriesStore, rows: usize) {
        store
            .append(&earable_core::SampleBatch {
                modality: Modality::Eeg,
                channels: 6,
                values: vec![0.0; rows * 6],
                host_timestamp: earable_core::HostTimestamp::from_secs_f64(0.0),
                device_timestamp: None,
            })
            .unwrap();
    }

    fn snapshot(vertical: bool) -> QualitySnapshot {
        QualitySnapshot {
            computed_at: 0,
            left_lateral: true,
            left_vertical: vertical,
            right_lateral: true,
            right_vertical: true,
        }
    }

    #[test]
    fn test_tick_catches_up_after_gated_interval() {
        let store = quiet_store();
        let mut blink = detector();
        assert_eq!(blink.tick(&store, None).unwrap(), TickOutcome::InsufficientHistory);

        append_quiet(&store, 100);
        assert_eq!(blink.tick(&store, None).unwrap(), TickOutcome::Gated);

        append_quiet(&store, 100);
        assert_eq!(blink.tick(&store, Some(&snapshot(false))).unwrap(), TickOutcome::Gated);
        assert_eq!(blink.history_len(), 0);

        append_quiet(&store, 100);
        let outcome = blink.tick(&store, Some(&snapshot(true))).unwrap();
        assert_eq!(outcome, TickOutcome::Processed(Vec::new()));
        assert_eq!(blink.history_len(), 300);

        append_quiet(&store, 50);
        assert!(blink.tick(&store, Some(&snapshot(true))).unwrap().processed().is_some());
        assert_eq!(blink.history_len(), 350);
    }

    #[test]
    fn test_tick_backlog_clamped_to_max_history() {
        let config = BlinkConfig {
            max_history_secs: 2.0,
            ..BlinkConfig::default()
        };
        let max_rows = (2.0 * FS) as usize;
        let store = quiet_store();
        let mut blink = BlinkDetector::new(config, (1, 4), FS).unwrap();

        append_quiet(&store, 100);
        assert!(blink.tick(&store, Some(&snapshot(true))).unwrap().processed().is_some());
        assert_eq!(blink.history_len(), 100);

        append_quiet(&store, 300);
        assert_eq!(blink.tick(&store, Some(&snapshot(false))).unwrap(), TickOutcome::Gated);

        append_quiet(&store, 400);
        assert!(blink.tick(&store, Some(&snapshot(true))).unwrap().processed().is_some());
        assert_eq!(blink.history_len(), max_rows);
    }
}
