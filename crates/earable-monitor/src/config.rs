//! Monitor configuration loaded from JSON

use earable_core::{EarableError, EarableResult, Modality, StoreLayout, StreamLayout};
use earable_processing::AnalysisConfig;
use earable_simulation::{SimulatorConfig, StreamConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sampling layout of the connected device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub eeg_rate: f64,
    pub eeg_channels: usize,
    pub imu_rate: f64,
    pub imu_channels: usize,
    pub ppg_rate: f64,
    pub ppg_channels: usize,
    /// Recording length the store reserves up front (s)
    pub initial_duration_secs: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            eeg_rate: 125.0,
            eeg_channels: 6,
            imu_rate: 50.0,
            imu_channels: 3,
            ppg_rate: 25.0,
            ppg_channels: 3,
            initial_duration_secs: 3600.0,
        }
    }
}

impl AcquisitionConfig {
    pub fn store_layout(&self) -> StoreLayout {
        let secs = self.initial_duration_secs;
        StoreLayout {
            eeg: StreamLayout::new(Modality::Eeg, self.eeg_channels, self.eeg_rate, secs),
            imu: StreamLayout::new(Modality::Imu, self.imu_channels, self.imu_rate, secs),
            ppg: StreamLayout::new(Modality::Ppg, self.ppg_channels, self.ppg_rate, secs),
        }
    }
}

/// Task cadence and persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub eog_poll_ms: u64,
    pub emg_poll_ms: u64,
    pub persist_interval_secs: f64,
    /// Recording directory; persistence is off when unset
    pub output_dir: Option<PathBuf>,
    /// Detection events buffered per subscriber
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            eog_poll_ms: 5,
            emg_poll_ms: 50,
            persist_interval_secs: 15.0,
            output_dir: Some(PathBuf::from("recordings")),
            event_capacity: 256,
        }
    }
}

impl RuntimeConfig {
    pub fn eog_poll(&self) -> Duration {
        Duration::from_millis(self.eog_poll_ms)
    }

    pub fn emg_poll(&self) -> Duration {
        Duration::from_millis(self.emg_poll_ms)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs_f64(self.persist_interval_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub acquisition: AcquisitionConfig,
    pub analysis: AnalysisConfig,
    pub runtime: RuntimeConfig,
}

impl MonitorConfig {
    pub fn from_json(text: &str) -> EarableResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| EarableError::config(format!("config parse: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> EarableResult<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Named preset; `default` matches `MonitorConfig::default()`
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            // short store, no files; for demos and tests
            "ephemeral" => Some(Self {
                acquisition: AcquisitionConfig {
                    initial_duration_secs: 60.0,
                    ..AcquisitionConfig::default()
                },
                runtime: RuntimeConfig {
                    output_dir: None,
                    ..RuntimeConfig::default()
                },
                ..Self::default()
            }),
            _ => None,
        }
    }

    pub fn validate(&self) -> EarableResult<()> {
        let acq = &self.acquisition;
        if !(acq.initial_duration_secs > 0.0) {
            return Err(EarableError::config("initial store duration must be positive"));
        }
        for (modality, rate, channels) in [
            (Modality::Eeg, acq.eeg_rate, acq.eeg_channels),
            (Modality::Imu, acq.imu_rate, acq.imu_channels),
            (Modality::Ppg, acq.ppg_rate, acq.ppg_channels),
        ] {
            if !(rate > 0.0) || channels == 0 {
                return Err(EarableError::config(format!(
                    "{} needs a positive rate and at least one channel",
                    modality
                )));
            }
        }
        self.analysis.validate(acq.eeg_rate, acq.eeg_channels)?;

        let rt = &self.runtime;
        if rt.eog_poll_ms == 0 || rt.emg_poll_ms == 0 {
            return Err(EarableError::config("analysis poll intervals must be at least 1 ms"));
        }
        if !(rt.persist_interval_secs > 0.0) {
            return Err(EarableError::config("persist interval must be positive"));
        }
        if rt.event_capacity == 0 {
            return Err(EarableError::config("event capacity must be positive"));
        }
        Ok(())
    }

    /// Simulated device matching the acquisition layout
    pub fn simulator_stream(&self, seed: Option<u64>) -> StreamConfig {
        StreamConfig {
            simulator: SimulatorConfig {
                eeg_channels: self.acquisition.eeg_channels,
                eeg_rate: self.acquisition.eeg_rate,
                imu_rate: self.acquisition.imu_rate,
                ppg_rate: self.acquisition.ppg_rate,
                seed,
                ..SimulatorConfig::default()
            },
            ..StreamConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        let layout = config.acquisition.store_layout();
        assert_eq!(layout.eeg.initial_capacity, 450_000);
        assert_eq!(config.runtime.eog_poll(), Duration::from_millis(5));
        assert_eq!(config.runtime.persist_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = MonitorConfig::from_json(
            r#"{ "runtime": { "output_dir": null, "emg_poll_ms": 20 }, "analysis": { "blink": { "std_threshold": 40.0 } } }"#,
        )
        .unwrap();
        assert_eq!(config.runtime.output_dir, None);
        assert_eq!(config.runtime.emg_poll_ms, 20);
        assert_eq!(config.runtime.eog_poll_ms, 5);
        assert_eq!(config.analysis.blink.std_threshold, 40.0);
        assert_eq!(config.acquisition.eeg_channels, 6);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(MonitorConfig::from_json(r#"{ "runtime": { "eog_poll_ms": 0 } }"#).is_err());
        assert!(MonitorConfig::from_json(r#"{ "acquisition": { "eeg_channels": 2 } }"#).is_err());
        assert!(MonitorConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_presets() {
        assert_eq!(MonitorConfig::preset("default"), Some(MonitorConfig::default()));
        let ephemeral = MonitorConfig::preset("ephemeral").unwrap();
        assert!(ephemeral.runtime.output_dir.is_none());
        assert!(ephemeral.validate().is_ok());
        assert!(MonitorConfig::preset("nope").is_none());
    }
}
