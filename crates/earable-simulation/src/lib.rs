//! Earable-Simulation: synthetic earable device and frame stream
//!
//! Produces encoded EEG/IMU/PPG notification frames with scheduled gestures
//! and a lossy link, for exercising the pipeline without hardware.

pub mod earable_simulator;
pub mod real_time_stream;
pub mod signal_patterns;

pub use earable_simulator::*;
pub use real_time_stream::*;
pub use signal_patterns::*;
