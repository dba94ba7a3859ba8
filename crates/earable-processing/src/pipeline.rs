//! Filter chains: ordered stages applied to one channel

use crate::error::ProcessingResult;
use crate::filters::{CausalStage, Priming, ZeroPhaseStage};
use crate::processor::WindowStage;
use serde::{Deserialize, Serialize};

/// Serialisable description of one stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageSpec {
    /// Zero-phase notch
    Notch { freq: f64, q: f64 },
    /// Zero-phase Butterworth lowpass
    Lowpass { order: usize, cutoff: f64 },
    /// Zero-phase Butterworth highpass
    Highpass { order: usize, cutoff: f64 },
    /// Causal Butterworth bandpass with a persistent delay line
    Bandpass {
        order: usize,
        low: f64,
        high: f64,
        priming: Priming,
    },
}

impl StageSpec {
    fn build(&self, fs: f64) -> ProcessingResult<Box<dyn WindowStage>> {
        Ok(match *self {
            StageSpec::Notch { freq, q } => Box::new(ZeroPhaseStage::notch(freq, q, fs)?),
            StageSpec::Lowpass { order, cutoff } => Box::new(ZeroPhaseStage::lowpass(order, cutoff, fs)?),
            StageSpec::Highpass { order, cutoff } => Box::new(ZeroPhaseStage::highpass(order, cutoff, fs)?),
            StageSpec::Bandpass {
                order,
                low,
                high,
                priming,
            } => Box::new(CausalStage::bandpass(order, low, high, fs, priming)?),
        })
    }
}

/// Stages applied in order, output of one feeding the next
pub struct FilterChain {
    name: String,
    stages: Vec<Box<dyn WindowStage>>,
}

impl FilterChain {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stages: Vec::new(),
        }
    }

    pub fn push(&mut self, stage: Box<dyn WindowStage>) {
        self.stages.push(stage);
    }

    pub fn apply(&mut self, input: &[f64]) -> Vec<f64> {
        let mut data = input.to_vec();
        for stage in self.stages.iter_mut() {
            data = stage.apply(&data);
        }
        data
    }

    pub fn reset(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.reset();
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Powerline clean-up: notches at 60/Q12, 50/Q10 and 25/Q5
    pub fn base(fs: f64) -> ProcessingResult<Self> {
        FilterChainBuilder::new("base", fs)
            .notch(60.0, 12.0)
            .notch(50.0, 10.0)
            .notch(25.0, 5.0)
            .build()
    }

    /// Quality-check window preparation: base notches, then a cold-started
    /// first-order 0.5-35 Hz bandpass
    pub fn quality(fs: f64) -> ProcessingResult<Self> {
        FilterChainBuilder::new("quality", fs)
            .notch(60.0, 12.0)
            .notch(50.0, 10.0)
            .notch(25.0, 5.0)
            .bandpass_from_zero(1, 0.5, 35.0)
            .build()
    }

    /// Gaze shaping: zero-phase 10 Hz lowpass then 0.3 Hz highpass
    pub fn gaze(fs: f64) -> ProcessingResult<Self> {
        FilterChainBuilder::new("gaze", fs)
            .lowpass(1, 10.0)
            .highpass(1, 0.3)
            .build()
    }

    /// Blink history: notches at 60/Q12 and 50/Q10, then a streaming
    /// 0.1-10 Hz bandpass
    pub fn blink(fs: f64) -> ProcessingResult<Self> {
        FilterChainBuilder::new("blink", fs)
            .notch(60.0, 12.0)
            .notch(50.0, 10.0)
            .bandpass(2, 0.1, 10.0)
            .build()
    }

    /// Muscle band, streaming
    pub fn emg(fs: f64, order: usize, low: f64, high: f64) -> ProcessingResult<Self> {
        FilterChainBuilder::new("emg", fs).bandpass(order, low, high).build()
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Builder collecting stage descriptions; coefficients are designed in `build`
#[derive(Debug, Clone)]
pub struct FilterChainBuilder {
    name: String,
    fs: f64,
    specs: Vec<StageSpec>,
}

impl FilterChainBuilder {
    pub fn new(name: &str, fs: f64) -> Self {
        Self {
            name: name.to_string(),
            fs,
            specs: Vec::new(),
        }
    }

    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn notch(self, freq: f64, q: f64) -> Self {
        self.stage(StageSpec::Notch { freq, q })
    }

    pub fn lowpass(self, order: usize, cutoff: f64) -> Self {
        self.stage(StageSpec::Lowpass { order, cutoff })
    }

    pub fn highpass(self, order: usize, cutoff: f64) -> Self {
        self.stage(StageSpec::Highpass { order, cutoff })
    }

    /// Causal bandpass primed on the first sample it sees
    pub fn bandpass(self, order: usize, low: f64, high: f64) -> Self {
        self.stage(StageSpec::Bandpass {
            order,
            low,
            high,
            priming: Priming::FirstSample,
        })
    }

    /// Causal bandpass starting from an all-zero delay line
    pub fn bandpass_from_zero(self, order: usize, low: f64, high: f64) -> Self {
        self.stage(StageSpec::Bandpass {
            order,
            low,
            high,
            priming: Priming::Zero,
        })
    }

    pub fn build(self) -> ProcessingResult<FilterChain> {
        let mut chain = FilterChain::new(&self.name);
        for spec in &self.specs {
            chain.push(spec.build(self.fs)?);
        }
        Ok(chain)
    }
}
