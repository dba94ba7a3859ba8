//! Synthetic earable producing encoded EEG/IMU/PPG notification frames

use crate::signal_patterns::{GesturePattern, ScheduledGesture};
use earable_core::codec::{EEG_SAMPLES_PER_FRAME, IMU_SAMPLES_PER_FRAME, PPG_SHORT_SAMPLES};
use earable_core::{
    encode_eeg_frame, encode_imu_frame, encode_ppg_frame, EarableError, EarableResult, HostTimestamp,
    Modality, RawFrame,
};
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::trace;

const I24_LIMIT: f64 = 8_388_607.0;
const PPG_LIMIT: f64 = 524_287.0;
/// One g in raw accelerometer units
const IMU_GRAVITY: f64 = 256.0;

/// Configuration for the simulated device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub eeg_channels: usize,
    pub eeg_rate: f64,
    pub imu_rate: f64,
    pub ppg_rate: f64,
    /// Gaussian background noise (µV)
    pub noise_std: f64,
    /// Alpha rhythm amplitude at 10 Hz (µV)
    pub alpha_amplitude: f64,
    /// Mains interference frequency and amplitude
    pub powerline: Option<(f64, f64)>,
    /// Heart rate driving the PPG waveform (beats per minute)
    pub heart_rate_bpm: f64,
    /// Probability a frame never reaches the host
    pub drop_probability: f64,
    /// Probability a frame is delivered twice
    pub duplicate_probability: f64,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
    pub gestures: Vec<ScheduledGesture>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            eeg_channels: 6,
            eeg_rate: 125.0,
            imu_rate: 50.0,
            ppg_rate: 25.0,
            noise_std: 4.0,
            alpha_amplitude: 5.0,
            powerline: Some((50.0, 10.0)),
            heart_rate_bpm: 66.0,
            drop_probability: 0.0,
            duplicate_probability: 0.0,
            seed: None,
            gestures: Vec::new(),
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> EarableResult<()> {
        if self.eeg_channels == 0 || self.eeg_channels > u8::MAX as usize {
            return Err(EarableError::config("simulated EEG channel count must be 1..=255"));
        }
        if !(self.eeg_rate > 0.0 && self.imu_rate > 0.0 && self.ppg_rate > 0.0) {
            return Err(EarableError::config("simulated sampling rates must be positive"));
        }
        for p in [self.drop_probability, self.duplicate_probability] {
            if !(0.0..=1.0).contains(&p) {
                return Err(EarableError::config(format!("probability {} outside [0, 1]", p)));
            }
        }
        Ok(())
    }
}

/// Counters for what the simulated link did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationStats {
    pub frames_emitted: u64,
    pub frames_dropped: u64,
    pub frames_duplicated: u64,
    pub eeg_samples: u64,
}

/// Per-modality sample clock
#[derive(Debug, Clone, Copy, Default)]
struct SampleClock {
    next: u64,
}

impl SampleClock {
    fn time(&self, rate: f64) -> f64 {
        self.next as f64 / rate
    }
}

pub struct EarableSimulator {
    config: SimulatorConfig,
    rng: rand::rngs::StdRng,
    noise: Normal<f64>,
    host_origin: HostTimestamp,
    sequence: u8,
    eeg: SampleClock,
    imu: SampleClock,
    ppg: SampleClock,
    time: f64,
    stats: SimulationStats,
}

impl EarableSimulator {
    pub fn new(config: SimulatorConfig) -> EarableResult<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_entropy(),
        };
        let noise = Normal::new(0.0, config.noise_std)
            .map_err(|e| EarableError::config(format!("noise distribution: {}", e)))?;

        Ok(Self {
            config,
            rng,
            noise,
            host_origin: HostTimestamp::now(),
            sequence: 0,
            eeg: SampleClock::default(),
            imu: SampleClock::default(),
            ppg: SampleClock::default(),
            time: 0.0,
            stats: SimulationStats::default(),
        })
    }

    /// Pin host timestamps to `origin + simulation time`
    pub fn with_host_origin(mut self, origin: HostTimestamp) -> Self {
        self.host_origin = origin;
        self
    }

    /// Re-anchor host timestamps so the current simulation time maps to `now`
    pub fn rebase_host_clock(&mut self, now: HostTimestamp) {
        self.host_origin = now.offset(-self.time);
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn stats(&self) -> SimulationStats {
        self.stats
    }

    /// Simulation time generated so far (s)
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Add a gesture `delay` seconds after the current simulation time
    pub fn schedule(&mut self, delay: f64, pattern: GesturePattern) {
        self.config.gestures.push(ScheduledGesture::new(self.time + delay, pattern));
    }

    pub fn set_link_quality(&mut self, drop_probability: f64, duplicate_probability: f64) {
        self.config.drop_probability = drop_probability.clamp(0.0, 1.0);
        self.config.duplicate_probability = duplicate_probability.clamp(0.0, 1.0);
    }

    /// Restart clocks and sequence numbers; scheduled gestures are kept
    pub fn reset_time(&mut self) {
        self.sequence = 0;
        self.eeg = SampleClock::default();
        self.imu = SampleClock::default();
        self.ppg = SampleClock::default();
        self.time = 0.0;
    }

    /// Frames for every whole packet completed within the next `duration`
    /// seconds, ordered by host timestamp
    pub fn generate(&mut self, duration: f64) -> EarableResult<Vec<RawFrame>> {
        let until = self.time + duration;
        let mut frames = Vec::new();

        while self.packet_end(self.eeg, EEG_SAMPLES_PER_FRAME, self.config.eeg_rate) <= until {
            let frame = self.eeg_frame()?;
            self.deliver(frame, &mut frames);
        }
        while self.packet_end(self.imu, IMU_SAMPLES_PER_FRAME, self.config.imu_rate) <= until {
            let frame = self.imu_frame()?;
            self.deliver(frame, &mut frames);
        }
        while self.packet_end(self.ppg, PPG_SHORT_SAMPLES, self.config.ppg_rate) <= until {
            let frame = self.ppg_frame()?;
            self.deliver(frame, &mut frames);
        }

        self.time = until;
        self.config.gestures.retain(|g| g.end() >= until);
        frames.sort_by(|a, b| a.host_timestamp.as_secs_f64().total_cmp(&b.host_timestamp.as_secs_f64()));
        Ok(frames)
    }

    fn packet_end(&self, clock: SampleClock, samples: usize, rate: f64) -> f64 {
        (clock.next + samples as u64) as f64 / rate
    }

    fn deliver(&mut self, frame: RawFrame, frames: &mut Vec<RawFrame>) {
        if self.rng.gen::<f64>() < self.config.drop_probability {
            self.stats.frames_dropped += 1;
            trace!(modality = %frame.modality, "simulated frame dropped");
            return;
        }
        if self.rng.gen::<f64>() < self.config.duplicate_probability {
            self.stats.frames_duplicated += 1;
            self.stats.frames_emitted += 1;
            frames.push(frame.clone());
        }
        self.stats.frames_emitted += 1;
        frames.push(frame);
    }

    fn host_time(&self, sim_time: f64) -> HostTimestamp {
        self.host_origin.offset(sim_time)
    }

    fn device_ticks(sim_time: f64) -> u32 {
        // millisecond device clock, wrapping like the hardware counter
        ((sim_time * 1000.0) as u64 & u32::MAX as u64) as u32
    }

    fn eeg_frame(&mut self) -> EarableResult<RawFrame> {
        let rate = self.config.eeg_rate;
        let start = self.eeg.time(rate);
        let mut rows = Vec::with_capacity(EEG_SAMPLES_PER_FRAME);
        for _ in 0..EEG_SAMPLES_PER_FRAME {
            let t = self.eeg.time(rate);
            let row: Vec<i32> = (0..self.config.eeg_channels)
                .map(|ch| {
                    let value = self.eeg_sample(t, ch);
                    value.round().clamp(-I24_LIMIT, I24_LIMIT) as i32
                })
                .collect();
            rows.push(row);
            self.eeg.next += 1;
        }
        self.stats.eeg_samples += EEG_SAMPLES_PER_FRAME as u64;

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        let bytes = encode_eeg_frame(sequence, Self::device_ticks(start), &rows).map_err(|source| {
            EarableError::MalformedFrame {
                modality: Modality::Eeg,
                source,
            }
        })?;
        let arrival = self.eeg.time(rate);
        Ok(RawFrame::new(Modality::Eeg, bytes, self.host_time(arrival)))
    }

    fn eeg_sample(&mut self, t: f64, channel: usize) -> f64 {
        let mut value = self.noise.sample(&mut self.rng);
        value += self.config.alpha_amplitude * (2.0 * PI * 10.0 * t + channel as f64).sin();
        if let Some((freq, amplitude)) = self.config.powerline {
            value += amplitude * (2.0 * PI * freq * t).sin();
        }
        for gesture in &self.config.gestures {
            let local = t - gesture.at;
            value += gesture.pattern.eeg_offset(local, channel);
            let envelope = gesture.pattern.burst_envelope(local);
            if envelope > 0.0 {
                value += envelope * self.rng.gen_range(-1.0..1.0);
            }
        }
        value
    }

    fn imu_frame(&mut self) -> EarableResult<RawFrame> {
        let rate = self.config.imu_rate;
        let start = self.imu.time(rate);
        let mut samples = Vec::with_capacity(IMU_SAMPLES_PER_FRAME);
        for _ in 0..IMU_SAMPLES_PER_FRAME {
            let t = self.imu.time(rate);
            let mut axes = [0.0, 0.0, IMU_GRAVITY];
            for gesture in &self.config.gestures {
                let offset = gesture.pattern.imu_offset(t - gesture.at);
                for (axis, delta) in axes.iter_mut().zip(offset) {
                    *axis += delta;
                }
            }
            let jitter = self.rng.gen_range(-2.0..2.0);
            samples.push(axes.map(|a| (a + jitter).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16));
            self.imu.next += 1;
        }
        let bytes = encode_imu_frame(Self::device_ticks(start), &samples).map_err(|source| {
            EarableError::MalformedFrame {
                modality: Modality::Imu,
                source,
            }
        })?;
        Ok(RawFrame::new(Modality::Imu, bytes, self.host_time(self.imu.time(rate))))
    }

    fn ppg_frame(&mut self) -> EarableResult<RawFrame> {
        let rate = self.config.ppg_rate;
        let start = self.ppg.time(rate);
        let beat = self.config.heart_rate_bpm / 60.0;
        let mut rows = Vec::with_capacity(PPG_SHORT_SAMPLES);
        for _ in 0..PPG_SHORT_SAMPLES {
            let t = self.ppg.time(rate);
            let pulse = (2.0 * PI * beat * t).sin();
            let row = [(200_000.0, 4_000.0), (260_000.0, 6_000.0), (150_000.0, 3_000.0)].map(|(dc, ac)| {
                (dc + ac * pulse + self.rng.gen_range(-200.0..200.0)).clamp(0.0, PPG_LIMIT) as u32
            });
            rows.push(row);
            self.ppg.next += 1;
        }
        let bytes = encode_ppg_frame(Self::device_ticks(start), &rows).map_err(|source| {
            EarableError::MalformedFrame {
                modality: Modality::Ppg,
                source,
            }
        })?;
        Ok(RawFrame::new(Modality::Ppg, bytes, self.host_time(self.ppg.time(rate))))
    }
}

impl std::fmt::Debug for EarableSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EarableSimulator")
            .field("time", &self.time)
            .field("sequence", &self.sequence)
            .field("stats", &self.stats)
            .finish()
    }
}
