//! Gesture waveforms injected into the simulated earable signals

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// EEG column layout of the simulated device
pub const LEFT_LATERAL: usize = 0;
pub const LEFT_VERTICAL: usize = 1;
pub const RIGHT_LATERAL: usize = 3;
pub const RIGHT_VERTICAL: usize = 4;

/// Gestures the simulator knows how to draw
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GesturePattern {
    /// Raised-cosine dip on both vertical channels
    Blink { amplitude: f64, duration: f64 },
    /// Half-sine deflection, positive on the left lateral channel
    LeftGaze { amplitude: f64, duration: f64 },
    /// Half-sine deflection, positive on the right lateral channel
    RightGaze { amplitude: f64, duration: f64 },
    /// Broadband muscle burst on every EEG channel
    JawClench { amplitude: f64, duration: f64 },
    /// Accelerometer swing on all three axes
    HeadMovement { amplitude: f64, duration: f64 },
}

impl GesturePattern {
    pub fn duration(&self) -> f64 {
        match *self {
            GesturePattern::Blink { duration, .. }
            | GesturePattern::LeftGaze { duration, .. }
            | GesturePattern::RightGaze { duration, .. }
            | GesturePattern::JawClench { duration, .. }
            | GesturePattern::HeadMovement { duration, .. } => duration,
        }
    }

    /// Deterministic EEG offset for `channel` at `t` seconds into the gesture
    ///
    /// The muscle burst is noise-like and drawn by the simulator; its
    /// envelope comes from [`GesturePattern::burst_envelope`].
    pub fn eeg_offset(&self, t: f64, channel: usize) -> f64 {
        if !(0.0..=self.duration()).contains(&t) {
            return 0.0;
        }
        match *self {
            GesturePattern::Blink { amplitude, duration } => match channel {
                LEFT_VERTICAL | RIGHT_VERTICAL => -amplitude * 0.5 * (1.0 - (2.0 * PI * t / duration).cos()),
                _ => 0.0,
            },
            GesturePattern::LeftGaze { amplitude, duration } => {
                half_sine(t, duration, amplitude) * lateral_sign(channel)
            }
            GesturePattern::RightGaze { amplitude, duration } => {
                -half_sine(t, duration, amplitude) * lateral_sign(channel)
            }
            GesturePattern::JawClench { .. } | GesturePattern::HeadMovement { .. } => 0.0,
        }
    }

    /// Amplitude of the muscle burst at `t`, zero for other gestures
    pub fn burst_envelope(&self, t: f64) -> f64 {
        match *self {
            GesturePattern::JawClench { amplitude, duration } if (0.0..=duration).contains(&t) => {
                // short ramps at both ends
                let ramp = 0.05f64.min(duration / 4.0);
                let edge = (t / ramp).min((duration - t) / ramp).min(1.0);
                amplitude * edge
            }
            _ => 0.0,
        }
    }

    /// Acceleration offset (raw IMU units) at `t`
    pub fn imu_offset(&self, t: f64) -> [f64; 3] {
        match *self {
            GesturePattern::HeadMovement { amplitude, duration } if (0.0..=duration).contains(&t) => {
                let swing = amplitude * (2.0 * PI * t / duration).sin();
                [swing, 0.5 * swing, -0.25 * swing]
            }
            _ => [0.0; 3],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            GesturePattern::Blink { .. } => "Blink",
            GesturePattern::LeftGaze { .. } => "Left gaze",
            GesturePattern::RightGaze { .. } => "Right gaze",
            GesturePattern::JawClench { .. } => "Jaw clench",
            GesturePattern::HeadMovement { .. } => "Head movement",
        }
    }

    /// Typical gestures, sized to trigger the default detectors
    pub fn presets() -> Vec<(&'static str, GesturePattern)> {
        vec![
            ("blink", GesturePattern::Blink { amplitude: 250.0, duration: 0.4 }),
            ("left_gaze", GesturePattern::LeftGaze { amplitude: 80.0, duration: 0.5 }),
            ("right_gaze", GesturePattern::RightGaze { amplitude: 80.0, duration: 0.5 }),
            ("jaw_clench", GesturePattern::JawClench { amplitude: 120.0, duration: 0.8 }),
            ("head_movement", GesturePattern::HeadMovement { amplitude: 128.0, duration: 1.0 }),
        ]
    }

    pub fn preset(name: &str) -> Option<GesturePattern> {
        Self::presets()
            .into_iter()
            .find(|(preset, _)| *preset == name)
            .map(|(_, pattern)| pattern)
    }
}

fn half_sine(t: f64, duration: f64, amplitude: f64) -> f64 {
    amplitude * (PI * t / duration).sin()
}

fn lateral_sign(channel: usize) -> f64 {
    match channel {
        LEFT_LATERAL => 1.0,
        RIGHT_LATERAL => -1.0,
        _ => 0.0,
    }
}

/// Gesture placed on the simulation clock
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledGesture {
    /// Simulation time the gesture starts (s)
    pub at: f64,
    pub pattern: GesturePattern,
}

impl ScheduledGesture {
    pub fn new(at: f64, pattern: GesturePattern) -> Self {
        Self { at, pattern }
    }

    pub fn end(&self) -> f64 {
        self.at + self.pattern.duration()
    }

    pub fn is_active(&self, time: f64) -> bool {
        time >= self.at && time <= self.end()
    }
}
