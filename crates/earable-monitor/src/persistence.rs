//! Recording directory sink: raw sample files plus a JSON manifest
//!
//! Samples go to `<modality>.dat` as little-endian `f64` rows. Each flush
//! writes at the byte offset of its first row, so a flush that is retried
//! after a failure rewrites the same region instead of duplicating it.

use chrono::{DateTime, Utc};
use earable_core::{EarableError, EarableResult, EventMarker, HostTimestamp, Modality, RecordingSink, SampleStream};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "recording.json";

/// Per-stream entry of `recording.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamManifest {
    pub file: String,
    pub channels: usize,
    pub sample_rate: f64,
    pub size: usize,
    pub capacity: usize,
    pub growths: u32,
    pub host_timestamps: Vec<HostTimestamp>,
    pub device_timestamps: Vec<Option<u32>>,
    pub batch_sizes: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingManifest {
    pub recording_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub streams: BTreeMap<String, StreamManifest>,
    pub events: Vec<EventMarker>,
    /// Configuration the recording was made with
    pub config: serde_json::Value,
}

impl RecordingManifest {
    pub fn load(dir: &Path) -> EarableResult<Self> {
        let text = fs::read_to_string(dir.join(MANIFEST_FILE))?;
        serde_json::from_str(&text).map_err(|e| EarableError::config(format!("manifest parse: {}", e)))
    }
}

/// Writes flushed store contents below one directory
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    manifest: RecordingManifest,
    pending: Vec<SampleStream>,
    pending_events: Option<Vec<EventMarker>>,
    commits: u64,
}

impl DirectorySink {
    pub fn create(dir: impl Into<PathBuf>, config: serde_json::Value) -> EarableResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let now = Utc::now();
        info!(dir = %dir.display(), "recording directory ready");
        Ok(Self {
            dir,
            manifest: RecordingManifest {
                recording_id: None,
                created_at: now,
                updated_at: now,
                streams: BTreeMap::new(),
                events: Vec::new(),
                config,
            },
            pending: Vec::new(),
            pending_events: None,
            commits: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn manifest(&self) -> &RecordingManifest {
        &self.manifest
    }

    fn write_samples(&self, stream: &SampleStream) -> EarableResult<()> {
        let path = self.dir.join(data_file(stream.layout.modality));
        let mut file = OpenOptions::new().create(true).write(true).truncate(false).open(path)?;
        let offset = (stream.start_row * stream.layout.channels * std::mem::size_of::<f64>()) as u64;
        file.seek(SeekFrom::Start(offset))?;

        let mut bytes = Vec::with_capacity(stream.values.len() * std::mem::size_of::<f64>());
        for value in &stream.values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        file.write_all(&bytes)?;
        file.sync_data()?;
        Ok(())
    }
}

impl RecordingSink for DirectorySink {
    fn write_stream(&mut self, stream: &SampleStream) -> EarableResult<()> {
        self.pending.push(stream.clone());
        Ok(())
    }

    fn write_events(&mut self, events: &[EventMarker]) -> EarableResult<()> {
        self.pending_events = Some(events.to_vec());
        Ok(())
    }

    fn commit(&mut self, recording_id: Uuid) -> EarableResult<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut manifest = self.manifest.clone();
        manifest.recording_id = Some(recording_id);
        manifest.updated_at = Utc::now();
        if let Some(events) = self.pending_events.take() {
            manifest.events = events;
        }

        for stream in &pending {
            self.write_samples(stream)?;
            let entry = manifest
                .streams
                .entry(stream.layout.modality.as_str().to_string())
                .or_default();
            entry.file = data_file(stream.layout.modality);
            entry.channels = stream.layout.channels;
            entry.sample_rate = stream.layout.sample_rate;
            entry.size = stream.size;
            entry.capacity = stream.capacity;
            entry.growths = stream.growths;
            entry.host_timestamps.extend_from_slice(&stream.host_timestamps);
            entry.device_timestamps.extend_from_slice(&stream.device_timestamps);
            entry.batch_sizes.extend_from_slice(&stream.batch_sizes);
        }

        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| EarableError::Persistence(std::io::Error::other(e)))?;
        let tmp = self.dir.join(format!("{}.tmp", MANIFEST_FILE));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.dir.join(MANIFEST_FILE))?;

        self.manifest = manifest;
        self.commits += 1;
        debug!(commits = self.commits, "recording committed");
        Ok(())
    }
}

pub fn data_file(modality: Modality) -> String {
    format!("{}.dat", modality.as_str())
}

/// Read a sample file back as interleaved values
pub fn read_samples(dir: &Path, modality: Modality) -> EarableResult<Vec<f64>> {
    let bytes = fs::read(dir.join(data_file(modality)))?;
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            f64::from_le_bytes(word)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use earable_core::{EventKind, SampleBatch, StoreLayout, TimeSeriesStore};

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("earable-sink-{}", Uuid::new_v4()))
    }

    fn eeg_batch(rows: usize, value: f64, at: f64) -> SampleBatch {
        SampleBatch {
            modality: Modality::Eeg,
            channels: 6,
            values: vec![value; rows * 6],
            host_timestamp: HostTimestamp::from_secs_f64(at),
            device_timestamp: Some((at * 1000.0) as u32),
        }
    }

    #[test]
    fn test_flushes_append_to_sample_files() {
        let dir = scratch_dir();
        let store = TimeSeriesStore::new(StoreLayout::earable(10.0)).unwrap();
        let mut sink = DirectorySink::create(&dir, serde_json::json!({ "note": "test" })).unwrap();

        store.append(&eeg_batch(9, 1.0, 0.0)).unwrap();
        store.push_event(EventMarker::new(HostTimestamp::from_secs_f64(0.05), EventKind::Blink).at_sample(4));
        store.flush(&mut sink).unwrap();
        store.append(&eeg_batch(9, 2.0, 1.0)).unwrap();
        store.flush(&mut sink).unwrap();

        let samples = read_samples(&dir, Modality::Eeg).unwrap();
        assert_eq!(samples.len(), 18 * 6);
        assert_eq!(samples[0], 1.0);
        assert_eq!(samples[17 * 6], 2.0);

        let manifest = RecordingManifest::load(&dir).unwrap();
        assert_eq!(manifest.recording_id, Some(store.recording_id()));
        let eeg = &manifest.streams["eeg"];
        assert_eq!(eeg.size, 18);
        assert_eq!(eeg.batch_sizes, vec![9, 9]);
        assert_eq!(eeg.device_timestamps, vec![Some(0), Some(1000)]);
        assert_eq!(manifest.events.len(), 1);
        assert_eq!(manifest.events[0].kind, EventKind::Blink);
        assert_eq!(manifest.config["note"], "test");
        assert_eq!(sink.commits(), 2);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_rewrite_at_same_offset_is_idempotent() {
        let dir = scratch_dir();
        let store = TimeSeriesStore::new(StoreLayout::earable(10.0)).unwrap();
        store.append(&eeg_batch(9, 3.0, 0.0)).unwrap();

        let stream = store.snapshot(Modality::Eeg);
        let sink = DirectorySink::create(&dir, serde_json::Value::Null).unwrap();
        sink.write_samples(&stream).unwrap();
        sink.write_samples(&stream).unwrap();
        assert_eq!(read_samples(&dir, Modality::Eeg).unwrap().len(), 9 * 6);

        fs::remove_dir_all(&dir).unwrap();
    }
}
