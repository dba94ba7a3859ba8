//! Lateral gaze detection on the LF5/RF6 pair
//!
//! A horizontal eye movement shows up as an opposite-polarity deflection on
//! the two lateral channels. Candidates are the segments between zero
//! crossings of the filtered left channel; accepted candidates are grouped so
//! that overlapping windows report each movement once.

use crate::config::GazeConfig;
use crate::pipeline::FilterChain;
use crate::processor::{Cadence, TickOutcome};
use crate::quality::QualitySnapshot;
use crate::stats::{argmax, demean, max_abs, pearson};
use earable_core::{EarableResult, EventKind, Modality, TimeSeriesStore, Window};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GazeDirection {
    Left,
    Right,
    Unknown,
}

impl GazeDirection {
    /// +1 left, -1 right, 0 unknown
    pub fn sign(&self) -> i8 {
        match self {
            GazeDirection::Left => 1,
            GazeDirection::Right => -1,
            GazeDirection::Unknown => 0,
        }
    }

    pub fn event_kind(&self) -> EventKind {
        match self {
            GazeDirection::Left => EventKind::LeftEyeGaze,
            GazeDirection::Right => EventKind::RightEyeGaze,
            GazeDirection::Unknown => EventKind::Generic,
        }
    }

    fn from_extremum(left: f64, right: f64) -> Self {
        if left > 0.0 && right < 0.0 {
            GazeDirection::Left
        } else if left < 0.0 && right > 0.0 {
            GazeDirection::Right
        } else {
            GazeDirection::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeEvent {
    pub direction: GazeDirection,
    /// Stream time of the opening zero crossing (s)
    pub start: f64,
    /// Stream time of the closing zero crossing (s)
    pub end: f64,
    /// EEG index of the opening zero crossing
    pub sample_index: usize,
}

/// Consecutive candidates treated as one movement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeGroup {
    pub start: f64,
    pub end: f64,
}

/// Accepted inter-crossing segment, in window indices
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    first: usize,
    last: usize,
}

impl Candidate {
    /// Samples from the opening crossing up to, not including, the closing one
    fn span(&self) -> std::ops::Range<usize> {
        self.first..self.last
    }
}

pub struct GazeDetector {
    config: GazeConfig,
    fs: f64,
    channels: [usize; 2],
    base: FilterChain,
    shaping: FilterChain,
    cadence: Cadence,
    open_group: Option<GazeGroup>,
    groupings: Vec<GazeGroup>,
    prev_end: f64,
}

impl GazeDetector {
    /// Detector over `(left, right)` lateral EEG columns
    pub fn new(config: GazeConfig, channels: (usize, usize), fs: f64) -> EarableResult<Self> {
        config.validate()?;
        let cadence = Cadence::new(config.window_samples(fs), config.stride_samples(fs));
        let prev_end = -config.min_dist_from_prev;
        Ok(Self {
            base: FilterChain::base(fs)?,
            shaping: FilterChain::gaze(fs)?,
            config,
            fs,
            channels: [channels.0, channels.1],
            cadence,
            open_group: None,
            groupings: Vec::new(),
            prev_end,
        })
    }

    /// Closed groups, oldest first
    pub fn groupings(&self) -> &[GazeGroup] {
        &self.groupings
    }

    pub fn open_group(&self) -> Option<GazeGroup> {
        self.open_group
    }

    /// Poll the store; runs only when the stride elapsed and both lateral
    /// channels passed the quality gate
    pub fn tick(
        &mut self,
        store: &TimeSeriesStore,
        quality: Option<&QualitySnapshot>,
    ) -> EarableResult<TickOutcome<Vec<GazeEvent>>> {
        if let Err(outcome) = self.cadence.poll(store.size(Modality::Eeg)) {
            return Ok(outcome);
        }
        if !quality.is_some_and(QualitySnapshot::lateral_ok) {
            return Ok(TickOutcome::Gated);
        }
        let window = store.read_latest(Modality::Eeg, &self.channels, self.cadence.window())?;
        Ok(match window {
            Some(window) => TickOutcome::Processed(self.process(&window)),
            None => TickOutcome::InsufficientHistory,
        })
    }

    /// Run detection over one two-column window
    pub fn process(&mut self, window: &Window) -> Vec<GazeEvent> {
        if window.columns.len() < 2 || window.len() < 2 {
            return Vec::new();
        }
        let window_start = window.start as f64 / self.fs;

        let base_left = self.base.apply(&demean(window.channel(0)));
        let base_right = self.base.apply(&demean(window.channel(1)));
        let left = self.shaping.apply(&base_left);
        let right = self.shaping.apply(&base_right);

        let mut events = Vec::new();
        for candidate in self.candidates(&left, &right) {
            let start = window_start + candidate.first as f64 / self.fs;
            let end = window_start + candidate.last as f64 / self.fs;

            if start - self.prev_end >= self.config.min_dist_from_prev {
                if let Some(group) = self.open_group.take() {
                    self.groupings.push(group);
                }
                let direction = direction_at_extremum(
                    &base_left[candidate.span()],
                    &base_right[candidate.span()],
                );
                let event = GazeEvent {
                    direction,
                    start,
                    end,
                    sample_index: window.start + candidate.first,
                };
                debug!(?direction, start, end, "gaze detected");
                events.push(event);
                self.open_group = Some(GazeGroup { start, end });
                self.prev_end = end;
            } else if let Some(group) = self.open_group.as_mut() {
                if end > group.end {
                    group.end = end;
                    self.prev_end = end;
                }
            }
        }
        events
    }

    fn candidates(&self, left: &[f64], right: &[f64]) -> Vec<Candidate> {
        let crossings = zero_crossings(left, self.config.soft_zero_crossing);
        crossings
            .windows(2)
            .map(|pair| Candidate {
                first: pair[0],
                last: pair[1],
            })
            .filter(|c| self.accept(c, left, right))
            .collect()
    }

    fn accept(&self, candidate: &Candidate, left: &[f64], right: &[f64]) -> bool {
        let cfg = &self.config;
        let (min_amp, max_amp) = (cfg.min_threshold_amp, cfg.max_threshold_amp);
        let in_amp = |v: f64| (min_amp..=max_amp).contains(&v);

        let duration = (candidate.last - candidate.first) as f64 / self.fs;
        if !(cfg.min_duration..=cfg.max_duration).contains(&duration) {
            return false;
        }

        let segment = candidate.span();
        let peak_left = max_abs(&left[segment.clone()]);
        let peak_right = max_abs(&right[segment]);
        let ratio = if peak_right > 0.0 { peak_left / peak_right } else { f64::INFINITY };
        let ratio_ok = (cfg.ratio_threshold..=1.0 / cfg.ratio_threshold).contains(&ratio);
        if (peak_left < min_amp || peak_right < min_amp) && !ratio_ok {
            return false;
        }

        // interior samples, crossings excluded
        if candidate.last < candidate.first + 3 {
            return false;
        }
        let inner = candidate.first + 1..candidate.last - 1;
        let (inner_left, inner_right) = (&left[inner.clone()], &right[inner]);

        let virtual_peak = inner_left
            .iter()
            .zip(inner_right)
            .map(|(l, r)| -l * r)
            .fold(f64::NEG_INFINITY, f64::max);
        if !(min_amp * min_amp..=max_amp * max_amp).contains(&virtual_peak) {
            trace!(virtual_peak, "gaze candidate rejected on virtual channel");
            return false;
        }

        if !in_amp(max_abs(inner_left)) || !in_amp(max_abs(inner_right)) {
            return false;
        }

        matches!(pearson(inner_left, inner_right), Some(r) if r <= cfg.correlation_threshold)
    }
}

impl std::fmt::Debug for GazeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GazeDetector")
            .field("channels", &self.channels)
            .field("open_group", &self.open_group)
            .field("groupings", &self.groupings.len())
            .field("prev_end", &self.prev_end)
            .finish()
    }
}

fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// Indices `i` where the sign of `data[i + 1] - offset` differs from `data[i] - offset`
fn zero_crossings(data: &[f64], offset: f64) -> Vec<usize> {
    data.windows(2)
        .enumerate()
        .filter(|(_, w)| sign(w[0] - offset) != sign(w[1] - offset))
        .map(|(i, _)| i)
        .collect()
}

/// Direction from the notch-filtered candidate, referenced to its first sample
fn direction_at_extremum(left: &[f64], right: &[f64]) -> GazeDirection {
    let (Some(&l0), Some(&r0)) = (left.first(), right.first()) else {
        return GazeDirection::Unknown;
    };
    let product: Vec<f64> = left
        .iter()
        .zip(right)
        .map(|(l, r)| -(l - l0) * (r - r0))
        .collect();
    match argmax(&product) {
        Some(i) => GazeDirection::from_extremum(left[i] - l0, right[i] - r0),
        None => GazeDirection::Unknown,
    }
}
