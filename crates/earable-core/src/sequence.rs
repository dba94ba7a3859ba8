//! Modulo-256 sequence integrity for EEG frames

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Verdict for one decoded batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// In order (or first ever); append
    Accepted,
    /// Forward jump; append and resynchronise past the hole
    Gap { expected: u8, observed: u8, missing: u8 },
    /// Repeated or late frame; drop
    Duplicate { expected: u8, observed: u8 },
}

impl SequenceOutcome {
    /// Whether the batch's samples belong in the store
    pub fn should_append(&self) -> bool {
        !matches!(self, SequenceOutcome::Duplicate { .. })
    }
}

/// Running counters, all monotonic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStats {
    pub accepted: u64,
    pub gaps: u64,
    pub missing_batches: u64,
    pub duplicates: u64,
}

/// Tracks the next expected sequence number of the EEG stream
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    expected: Option<u8>,
    stats: SequenceStats,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number the tracker will accept without complaint
    pub fn expected(&self) -> Option<u8> {
        self.expected
    }

    pub fn stats(&self) -> SequenceStats {
        self.stats
    }

    /// Classify `seq` and update the expectation
    ///
    /// Distances of 1..=127 ahead count as lost frames, anything else as a
    /// frame that was already seen.
    pub fn observe(&mut self, seq: u8) -> SequenceOutcome {
        let expected = match self.expected {
            None => {
                self.expected = Some(seq.wrapping_add(1));
                self.stats.accepted += 1;
                return SequenceOutcome::Accepted;
            }
            Some(expected) => expected,
        };

        let distance = seq.wrapping_sub(expected);
        match distance {
            0 => {
                self.expected = Some(seq.wrapping_add(1));
                self.stats.accepted += 1;
                SequenceOutcome::Accepted
            }
            1..=127 => {
                warn!(expected, observed = seq, missing = distance, "EEG sequence gap");
                self.expected = Some(seq.wrapping_add(1));
                self.stats.accepted += 1;
                self.stats.gaps += 1;
                self.stats.missing_batches += distance as u64;
                SequenceOutcome::Gap {
                    expected,
                    observed: seq,
                    missing: distance,
                }
            }
            _ => {
                warn!(expected, observed = seq, "duplicate EEG sequence dropped");
                self.stats.duplicates += 1;
                SequenceOutcome::Duplicate {
                    expected,
                    observed: seq,
                }
            }
        }
    }

    /// Forget the expectation, e.g. after a reconnect
    pub fn reset(&mut self) {
        self.expected = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(seqs: &[u8]) -> (SequenceTracker, Vec<SequenceOutcome>) {
        let mut tracker = SequenceTracker::new();
        let outcomes = seqs.iter().map(|&s| tracker.observe(s)).collect();
        (tracker, outcomes)
    }

    #[test]
    fn test_single_gap_is_reported_once() {
        let (tracker, outcomes) = run(&[5, 6, 7, 9, 10]);
        let gaps: Vec<_> = outcomes
            .iter()
            .filter(|o| matches!(o, SequenceOutcome::Gap { .. }))
            .collect();
        assert_eq!(gaps.len(), 1);
        assert_eq!(
            outcomes[3],
            SequenceOutcome::Gap { expected: 8, observed: 9, missing: 1 }
        );
        assert_eq!(outcomes[4], SequenceOutcome::Accepted);
        assert!(outcomes.iter().all(|o| o.should_append()));
        assert_eq!(tracker.stats().missing_batches, 1);
        assert_eq!(tracker.expected(), Some(11));
    }

    #[test]
    fn test_duplicate_is_dropped_without_moving_expectation() {
        let (tracker, outcomes) = run(&[5, 6, 6, 7]);
        assert_eq!(
            outcomes[2],
            SequenceOutcome::Duplicate { expected: 7, observed: 6 }
        );
        assert!(!outcomes[2].should_append());
        assert_eq!(outcomes[3], SequenceOutcome::Accepted);
        let stats = tracker.stats();
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.gaps, 0);
    }

    #[test]
    fn test_wraparound_is_in_order() {
        let (tracker, outcomes) = run(&[254, 255, 0, 1]);
        assert!(outcomes.iter().all(|o| *o == SequenceOutcome::Accepted));
        assert_eq!(tracker.expected(), Some(2));
    }

    #[test]
    fn test_gap_across_wrap() {
        let (_, outcomes) = run(&[254, 2]);
        assert_eq!(
            outcomes[1],
            SequenceOutcome::Gap { expected: 255, observed: 2, missing: 3 }
        );
    }

    #[test]
    fn test_reset_accepts_anything() {
        let (mut tracker, _) = run(&[10, 11]);
        tracker.reset();
        assert_eq!(tracker.observe(99), SequenceOutcome::Accepted);
        assert_eq!(tracker.expected(), Some(100));
    }
}
