//! Core window stage trait and types

use serde::{Deserialize, Serialize};

/// How a stage treats the boundary between successive calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    /// Forward-backward over each window; no memory between calls
    ZeroPhase,
    /// One-directional with a delay line carried across calls
    Causal,
}

/// One filtering step applied to a single channel
///
/// A stage instance belongs to exactly one channel of one detector. Causal
/// stages treat consecutive calls as one continuous signal.
pub trait WindowStage: Send {
    /// Filter `input`, returning a buffer of the same length
    fn apply(&mut self, input: &[f64]) -> Vec<f64>;

    /// Stage name for logs
    fn name(&self) -> &str;

    fn kind(&self) -> StageKind;

    /// Forget any carried state
    fn reset(&mut self);

    /// Whether the stage holds state that depends on earlier calls
    fn is_stateful(&self) -> bool {
        self.kind() == StageKind::Causal
    }
}

/// Result of one detector tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome<T> {
    /// The required window is not full yet
    InsufficientHistory,
    /// Not enough new samples since the previous tick
    NotDue,
    /// Quality gate rejected the channels this detector reads
    Gated,
    Processed(T),
}

impl<T> TickOutcome<T> {
    pub fn processed(self) -> Option<T> {
        match self {
            TickOutcome::Processed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_processed(&self) -> bool {
        matches!(self, TickOutcome::Processed(_))
    }
}

/// Stride bookkeeping shared by the polling detectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    window: usize,
    stride: usize,
    last: Option<usize>,
}

impl Cadence {
    pub fn new(window: usize, stride: usize) -> Self {
        Self {
            window,
            stride: stride.max(1),
            last: None,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Size at which the previous tick ran
    pub fn last(&self) -> Option<usize> {
        self.last
    }

    /// Check `size` against window and stride, recording it when a tick is due
    pub fn poll<T>(&mut self, size: usize) -> Result<(), TickOutcome<T>> {
        if size < self.window {
            return Err(TickOutcome::InsufficientHistory);
        }
        if let Some(last) = self.last {
            if size < last + self.stride {
                return Err(TickOutcome::NotDue);
            }
        }
        self.last = Some(size);
        Ok(())
    }
}
