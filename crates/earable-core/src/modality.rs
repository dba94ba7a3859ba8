//! Modalities, raw frames and decoded packets

use crate::timestamp::HostTimestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sensor stream carried by one GATT characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    Eeg,
    Imu,
    Ppg,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Eeg, Modality::Imu, Modality::Ppg];

    /// Short lowercase name, used for file names and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Eeg => "eeg",
            Modality::Imu => "imu",
            Modality::Ppg => "ppg",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Eeg => write!(f, "EEG"),
            Modality::Imu => write!(f, "IMU"),
            Modality::Ppg => write!(f, "PPG"),
        }
    }
}

/// One notification payload as handed over by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub modality: Modality,
    pub bytes: Vec<u8>,
    pub host_timestamp: HostTimestamp,
}

impl RawFrame {
    pub fn new(modality: Modality, bytes: Vec<u8>, host_timestamp: HostTimestamp) -> Self {
        Self {
            modality,
            bytes,
            host_timestamp,
        }
    }
}

/// Decoded EEG frame: 9 samples per channel plus sequence/clock header
#[derive(Debug, Clone, PartialEq)]
pub struct EegPacket {
    /// Wrapping 0..=255 counter
    pub sequence: u8,
    /// Device clock ticks
    pub device_timestamp: u32,
    /// `samples[i][ch]`, one row per time step
    pub samples: Vec<Vec<i32>>,
}

impl EegPacket {
    pub fn channel_count(&self) -> usize {
        self.samples.first().map(Vec::len).unwrap_or(0)
    }

    /// Convert into a store batch
    pub fn to_batch(&self, host_timestamp: HostTimestamp) -> SampleBatch {
        let channels = self.channel_count();
        let values = self
            .samples
            .iter()
            .flat_map(|row| row.iter().map(|&v| v as f64))
            .collect();
        SampleBatch {
            modality: Modality::Eeg,
            channels,
            values,
            host_timestamp,
            device_timestamp: Some(self.device_timestamp),
        }
    }
}

/// Decoded IMU frame, accelerometer axes already scaled
#[derive(Debug, Clone, PartialEq)]
pub struct ImuPacket {
    pub device_timestamp: u32,
    pub samples: Vec<[f64; 3]>,
}

impl ImuPacket {
    pub fn to_batch(&self, host_timestamp: HostTimestamp) -> SampleBatch {
        SampleBatch {
            modality: Modality::Imu,
            channels: 3,
            values: self.samples.iter().flat_map(|s| s.iter().copied()).collect(),
            host_timestamp,
            device_timestamp: Some(self.device_timestamp),
        }
    }
}

/// Decoded PPG frame routed into its three optical sub-streams
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PpgPacket {
    pub device_timestamp: u32,
    pub green: Vec<u32>,
    pub ir: Vec<u32>,
    pub red: Vec<u32>,
    /// Words whose channel tag matched none of the sub-streams
    pub untagged: usize,
}

impl PpgPacket {
    /// Rows that have a value in every sub-stream
    pub fn complete_rows(&self) -> usize {
        self.green.len().min(self.ir.len()).min(self.red.len())
    }

    /// Samples that cannot be placed in a complete row, plus untagged words
    pub fn unmatched_samples(&self) -> usize {
        let rows = self.complete_rows();
        (self.green.len() - rows) + (self.ir.len() - rows) + (self.red.len() - rows) + self.untagged
    }

    /// Convert into a store batch of `[green, ir, red]` rows
    pub fn to_batch(&self, host_timestamp: HostTimestamp) -> SampleBatch {
        let rows = self.complete_rows();
        let mut values = Vec::with_capacity(rows * 3);
        for i in 0..rows {
            values.push(self.green[i] as f64);
            values.push(self.ir[i] as f64);
            values.push(self.red[i] as f64);
        }
        SampleBatch {
            modality: Modality::Ppg,
            channels: 3,
            values,
            host_timestamp,
            device_timestamp: Some(self.device_timestamp),
        }
    }
}

/// Interleaved rows ready to be appended to the store as one unit
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    pub modality: Modality,
    pub channels: usize,
    /// `[row0_ch0, row0_ch1, ..., row1_ch0, ...]`
    pub values: Vec<f64>,
    pub host_timestamp: HostTimestamp,
    pub device_timestamp: Option<u32>,
}

impl SampleBatch {
    pub fn rows(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.values.len() / self.channels
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eeg_packet_to_batch_is_row_major() {
        let packet = EegPacket {
            sequence: 3,
            device_timestamp: 1000,
            samples: vec![vec![1, 2], vec![3, 4]],
        };
        let batch = packet.to_batch(HostTimestamp::from_secs_f64(1.0));
        assert_eq!(batch.channels, 2);
        assert_eq!(batch.rows(), 2);
        assert_eq!(batch.values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_ppg_rows_are_zipped() {
        let packet = PpgPacket {
            device_timestamp: 0,
            green: vec![1, 2, 3],
            ir: vec![10, 20],
            red: vec![100, 200],
            untagged: 1,
        };
        assert_eq!(packet.complete_rows(), 2);
        assert_eq!(packet.unmatched_samples(), 2);
        let batch = packet.to_batch(HostTimestamp::default());
        assert_eq!(batch.values, vec![1.0, 10.0, 100.0, 2.0, 20.0, 200.0]);
    }
}
