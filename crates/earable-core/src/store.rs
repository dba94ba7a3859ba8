//! Growable per-modality time-series store
//!
//! Each modality lives behind its own reader-writer lock. A batch is copied in
//! under a single write guard, so a reader either sees all of it or none of
//! it, and capacity growth can never move data out from under a read.

use crate::error::{EarableError, EarableResult};
use crate::events::EventMarker;
use crate::modality::{Modality, SampleBatch};
use crate::timestamp::HostTimestamp;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;
use uuid::Uuid;

/// Shape of one modality stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamLayout {
    pub modality: Modality,
    pub channels: usize,
    pub sample_rate: f64,
    /// Rows reserved before the first growth
    pub initial_capacity: usize,
}

impl StreamLayout {
    /// Layout sized for `initial_duration_secs` of recording
    pub fn new(modality: Modality, channels: usize, sample_rate: f64, initial_duration_secs: f64) -> Self {
        let initial_capacity = (sample_rate * initial_duration_secs).ceil().max(1.0) as usize;
        Self {
            modality,
            channels,
            sample_rate,
            initial_capacity,
        }
    }

    pub fn with_capacity(mut self, rows: usize) -> Self {
        self.initial_capacity = rows.max(1);
        self
    }

    fn validate(&self) -> EarableResult<()> {
        if self.channels == 0 {
            return Err(EarableError::config(format!("{} stream needs at least one channel", self.modality)));
        }
        if self.sample_rate.is_nan() || self.sample_rate <= 0.0 {
            return Err(EarableError::config(format!("{} sample rate must be positive", self.modality)));
        }
        Ok(())
    }
}

/// Layout of every stream in a recording
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoreLayout {
    pub eeg: StreamLayout,
    pub imu: StreamLayout,
    pub ppg: StreamLayout,
}

impl StoreLayout {
    /// Standard earable layout with room for `initial_duration_secs`
    pub fn earable(initial_duration_secs: f64) -> Self {
        Self {
            eeg: StreamLayout::new(Modality::Eeg, 6, 125.0, initial_duration_secs),
            imu: StreamLayout::new(Modality::Imu, 3, 50.0, initial_duration_secs),
            ppg: StreamLayout::new(Modality::Ppg, 3, 25.0, initial_duration_secs),
        }
    }

    pub fn stream(&self, modality: Modality) -> &StreamLayout {
        match modality {
            Modality::Eeg => &self.eeg,
            Modality::Imu => &self.imu,
            Modality::Ppg => &self.ppg,
        }
    }
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self::earable(3600.0)
    }
}

/// Copied slice of a stream, one column per requested channel
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub modality: Modality,
    /// Index of the first row
    pub start: usize,
    pub columns: Vec<Vec<f64>>,
}

impl Window {
    pub fn len(&self) -> usize {
        self.columns.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One past the last row
    pub fn end(&self) -> usize {
        self.start + self.len()
    }

    pub fn channel(&self, column: usize) -> &[f64] {
        &self.columns[column]
    }
}

/// Rows and batch metadata of one stream, as handed to a sink
#[derive(Debug, Clone, PartialEq)]
pub struct SampleStream {
    pub layout: StreamLayout,
    /// First row contained in `values`
    pub start_row: usize,
    /// Logical size of the stream when the copy was taken
    pub size: usize,
    pub capacity: usize,
    pub growths: u32,
    /// Interleaved rows `start_row..size`
    pub values: Vec<f64>,
    /// Batch metadata for the batches that produced `values`
    pub host_timestamps: Vec<HostTimestamp>,
    pub device_timestamps: Vec<Option<u32>>,
    pub batch_sizes: Vec<usize>,
}

/// Destination of explicit flushes
pub trait RecordingSink {
    /// Receive the rows appended since the previous successful flush
    fn write_stream(&mut self, stream: &SampleStream) -> EarableResult<()>;

    /// Receive the complete marker list
    fn write_events(&mut self, events: &[EventMarker]) -> EarableResult<()>;

    /// Called once every stream and the marker list have been written
    fn commit(&mut self, recording_id: Uuid) -> EarableResult<()>;
}

#[derive(Debug)]
struct StreamBuffer {
    layout: StreamLayout,
    values: Vec<f64>,
    size: usize,
    capacity: usize,
    growths: u32,
    host_timestamps: Vec<HostTimestamp>,
    device_timestamps: Vec<Option<u32>>,
    batch_sizes: Vec<usize>,
    flushed_rows: usize,
    flushed_batches: usize,
}

impl StreamBuffer {
    fn new(layout: StreamLayout) -> Self {
        Self {
            layout,
            values: Vec::with_capacity(layout.initial_capacity * layout.channels),
            size: 0,
            capacity: layout.initial_capacity,
            growths: 0,
            host_timestamps: Vec::new(),
            device_timestamps: Vec::new(),
            batch_sizes: Vec::new(),
            flushed_rows: 0,
            flushed_batches: 0,
        }
    }

    fn grow(&mut self) {
        self.capacity *= 2;
        self.growths += 1;
        let wanted = self.capacity * self.layout.channels;
        self.values.reserve(wanted.saturating_sub(self.values.len()));
        debug!(
            modality = %self.layout.modality,
            size = self.size,
            capacity = self.capacity,
            "store capacity doubled"
        );
    }

    fn append(&mut self, batch: &SampleBatch) -> usize {
        let rows = batch.rows();
        while self.size + rows > self.capacity {
            self.grow();
        }
        self.values.extend_from_slice(&batch.values);
        self.size += rows;
        self.host_timestamps.push(batch.host_timestamp);
        self.device_timestamps.push(batch.device_timestamp);
        self.batch_sizes.push(rows);

        if self.size * 5 > self.capacity * 4 {
            self.grow();
        }
        self.size
    }

    fn column(&self, channel: usize, range: Range<usize>) -> Vec<f64> {
        let channels = self.layout.channels;
        range.map(|row| self.values[row * channels + channel]).collect()
    }

    fn stream_from(&self, start_row: usize, first_batch: usize) -> SampleStream {
        let channels = self.layout.channels;
        SampleStream {
            layout: self.layout,
            start_row,
            size: self.size,
            capacity: self.capacity,
            growths: self.growths,
            values: self.values[start_row * channels..self.size * channels].to_vec(),
            host_timestamps: self.host_timestamps[first_batch..].to_vec(),
            device_timestamps: self.device_timestamps[first_batch..].to_vec(),
            batch_sizes: self.batch_sizes[first_batch..].to_vec(),
        }
    }
}

/// Shared store: one writer per modality, any number of readers
#[derive(Debug)]
pub struct TimeSeriesStore {
    recording_id: Uuid,
    layout: StoreLayout,
    eeg: RwLock<StreamBuffer>,
    imu: RwLock<StreamBuffer>,
    ppg: RwLock<StreamBuffer>,
    events: RwLock<Vec<EventMarker>>,
}

impl TimeSeriesStore {
    pub fn new(layout: StoreLayout) -> EarableResult<Self> {
        for modality in Modality::ALL {
            let stream = layout.stream(modality);
            if stream.modality != modality {
                return Err(EarableError::config(format!(
                    "{} layout registered under {}",
                    stream.modality, modality
                )));
            }
            stream.validate()?;
        }
        Ok(Self {
            recording_id: Uuid::new_v4(),
            layout,
            eeg: RwLock::new(StreamBuffer::new(layout.eeg)),
            imu: RwLock::new(StreamBuffer::new(layout.imu)),
            ppg: RwLock::new(StreamBuffer::new(layout.ppg)),
            events: RwLock::new(Vec::new()),
        })
    }

    pub fn recording_id(&self) -> Uuid {
        self.recording_id
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn stream(&self, modality: Modality) -> &RwLock<StreamBuffer> {
        match modality {
            Modality::Eeg => &self.eeg,
            Modality::Imu => &self.imu,
            Modality::Ppg => &self.ppg,
        }
    }

    /// Append a whole batch atomically, returning the new logical size
    pub fn append(&self, batch: &SampleBatch) -> EarableResult<usize> {
        let expected = self.layout.stream(batch.modality).channels;
        if batch.channels != expected || batch.values.len() % expected != 0 {
            return Err(EarableError::ChannelMismatch {
                modality: batch.modality,
                expected,
                actual: batch.channels,
            });
        }
        Ok(self.stream(batch.modality).write().append(batch))
    }

    /// Logical number of rows
    pub fn size(&self, modality: Modality) -> usize {
        self.stream(modality).read().size
    }

    /// Logical capacity in rows
    pub fn capacity(&self, modality: Modality) -> usize {
        self.stream(modality).read().capacity
    }

    /// Number of capacity doublings so far
    pub fn growth_count(&self, modality: Modality) -> u32 {
        self.stream(modality).read().growths
    }

    /// Copy every channel of `range`
    pub fn read(&self, modality: Modality, range: Range<usize>) -> EarableResult<Window> {
        let channels: Vec<usize> = (0..self.layout.stream(modality).channels).collect();
        self.read_channels(modality, &channels, range)
    }

    /// Copy selected channels of `range` under one read guard
    pub fn read_channels(
        &self,
        modality: Modality,
        channels: &[usize],
        range: Range<usize>,
    ) -> EarableResult<Window> {
        let buffer = self.stream(modality).read();
        if range.start > range.end || range.end > buffer.size {
            return Err(EarableError::RangeOutOfBounds {
                modality,
                start: range.start,
                end: range.end,
                size: buffer.size,
            });
        }
        self.check_channels(modality, channels)?;
        Ok(Window {
            modality,
            start: range.start,
            columns: channels
                .iter()
                .map(|&ch| buffer.column(ch, range.clone()))
                .collect(),
        })
    }

    /// Copy the most recent `rows` rows of selected channels
    ///
    /// Returns `None` while the stream is still shorter than `rows`.
    pub fn read_latest(
        &self,
        modality: Modality,
        channels: &[usize],
        rows: usize,
    ) -> EarableResult<Option<Window>> {
        self.check_channels(modality, channels)?;
        let buffer = self.stream(modality).read();
        if buffer.size < rows {
            return Ok(None);
        }
        let range = buffer.size - rows..buffer.size;
        Ok(Some(Window {
            modality,
            start: range.start,
            columns: channels
                .iter()
                .map(|&ch| buffer.column(ch, range.clone()))
                .collect(),
        }))
    }

    fn check_channels(&self, modality: Modality, channels: &[usize]) -> EarableResult<()> {
        let available = self.layout.stream(modality).channels;
        match channels.iter().find(|&&ch| ch >= available) {
            Some(&ch) => Err(EarableError::config(format!(
                "{} has {} channels, channel {} requested",
                modality, available, ch
            ))),
            None => Ok(()),
        }
    }

    /// Full consistent copy of one stream
    pub fn snapshot(&self, modality: Modality) -> SampleStream {
        self.stream(modality).read().stream_from(0, 0)
    }

    pub fn push_event(&self, marker: EventMarker) {
        self.events.write().push(marker);
    }

    pub fn events(&self) -> Vec<EventMarker> {
        self.events.read().clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    /// Hand everything appended since the last flush to `sink`
    ///
    /// Flush offsets only advance once the sink has committed, so a failed
    /// flush is retried in full next time. Offsets take the absolute
    /// position copied and never move backwards.
    pub fn flush(&self, sink: &mut dyn RecordingSink) -> EarableResult<()> {
        let mut pending = Vec::with_capacity(Modality::ALL.len());
        for modality in Modality::ALL {
            let (stream, batches) = {
                let buffer = self.stream(modality).read();
                (
                    buffer.stream_from(buffer.flushed_rows, buffer.flushed_batches),
                    buffer.batch_sizes.len(),
                )
            };
            sink.write_stream(&stream)?;
            pending.push((modality, stream.size, batches));
        }
        sink.write_events(&self.events())?;
        sink.commit(self.recording_id)?;

        for (modality, rows, batches) in pending {
            let mut buffer = self.stream(modality).write();
            buffer.flushed_rows = buffer.flushed_rows.max(rows);
            buffer.flushed_batches = buffer.flushed_batches.max(batches);
        }
        debug!(recording = %self.recording_id, "store flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    fn small_store(capacity: usize) -> TimeSeriesStore {
        let mut layout = StoreLayout::earable(1.0);
        layout.eeg = StreamLayout::new(Modality::Eeg, 2, 10.0, 1.0).with_capacity(capacity);
        TimeSeriesStore::new(layout).unwrap()
    }

    fn eeg_batch(values: Vec<f64>) -> SampleBatch {
        SampleBatch {
            modality: Modality::Eeg,
            channels: 2,
            values,
            host_timestamp: HostTimestamp::from_secs_f64(1.0),
            device_timestamp: Some(7),
        }
    }

    #[derive(Default)]
    struct MemorySink {
        streams: Vec<SampleStream>,
        events: usize,
        commits: usize,
        fail_commit: bool,
    }

    impl RecordingSink for MemorySink {
        fn write_stream(&mut self, stream: &SampleStream) -> EarableResult<()> {
            self.streams.push(stream.clone());
            Ok(())
        }

        fn write_events(&mut self, events: &[EventMarker]) -> EarableResult<()> {
            self.events = events.len();
            Ok(())
        }

        fn commit(&mut self, _recording_id: Uuid) -> EarableResult<()> {
            if self.fail_commit {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
            }
            self.commits += 1;
            Ok(())
        }
    }

    #[test]
    fn test_default_capacity_is_one_hour() {
        let store = TimeSeriesStore::new(StoreLayout::default()).unwrap();
        assert_eq!(store.capacity(Modality::Eeg), 125 * 3600);
        assert_eq!(store.capacity(Modality::Ppg), 25 * 3600);
    }

    #[test]
    fn test_single_doubling_past_eighty_percent() {
        let store = small_store(10);
        for i in 0..8 {
            store.append(&eeg_batch(vec![i as f64, -(i as f64)])).unwrap();
        }
        assert_eq!(store.capacity(Modality::Eeg), 10);

        store.append(&eeg_batch(vec![8.0, -8.0])).unwrap();
        assert_eq!(store.capacity(Modality::Eeg), 20);
        assert_eq!(store.growth_count(Modality::Eeg), 1);

        let window = store.read(Modality::Eeg, 0..9).unwrap();
        assert_eq!(window.channel(0), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(window.channel(1)[4], -4.0);
    }

    #[test]
    fn test_large_batch_grows_until_it_fits() {
        let store = small_store(4);
        let size = store.append(&eeg_batch(vec![1.0; 2 * 9])).unwrap();
        assert_eq!(size, 9);
        // 4 -> 8 -> 16 to fit, then 9 > 12.8 is false
        assert_eq!(store.capacity(Modality::Eeg), 16);
    }

    #[test]
    fn test_channel_mismatch_is_rejected() {
        let store = small_store(10);
        let mut batch = eeg_batch(vec![1.0, 2.0, 3.0]);
        batch.channels = 3;
        assert!(matches!(
            store.append(&batch),
            Err(EarableError::ChannelMismatch { expected: 2, actual: 3, .. })
        ));
        assert_eq!(store.size(Modality::Eeg), 0);
    }

    #[test]
    fn test_read_latest_and_bounds() {
        let store = small_store(10);
        assert_eq!(store.read_latest(Modality::Eeg, &[0], 1).unwrap(), None);
        store.append(&eeg_batch(vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0])).unwrap();

        let window = store.read_latest(Modality::Eeg, &[1, 0], 2).unwrap().unwrap();
        assert_eq!(window.start, 1);
        assert_eq!(window.end(), 3);
        assert_eq!(window.channel(0), &[20.0, 30.0]);
        assert_eq!(window.channel(1), &[2.0, 3.0]);

        assert!(store.read(Modality::Eeg, 2..5).is_err());
        assert!(store.read_latest(Modality::Eeg, &[2], 1).is_err());
    }

    #[test]
    fn test_flush_is_incremental() {
        let store = small_store(10);
        store.append(&eeg_batch(vec![1.0, 2.0])).unwrap();
        store.push_event(EventMarker::new(HostTimestamp::from_secs_f64(1.0), EventKind::Blink));

        let mut sink = MemorySink::default();
        store.flush(&mut sink).unwrap();
        assert_eq!(sink.commits, 1);
        assert_eq!(sink.events, 1);
        assert_eq!(sink.streams[0].values, vec![1.0, 2.0]);

        store.append(&eeg_batch(vec![3.0, 4.0])).unwrap();
        store.flush(&mut sink).unwrap();
        let second = &sink.streams[3];
        assert_eq!(second.start_row, 1);
        assert_eq!(second.values, vec![3.0, 4.0]);
        assert_eq!(second.batch_sizes, vec![1]);
    }

    #[test]
    fn test_failed_flush_is_retried() {
        let store = small_store(10);
        store.append(&eeg_batch(vec![1.0, 2.0])).unwrap();

        let mut sink = MemorySink {
            fail_commit: true,
            ..Default::default()
        };
        assert!(store.flush(&mut sink).is_err());

        sink.fail_commit = false;
        sink.streams.clear();
        store.flush(&mut sink).unwrap();
        assert_eq!(sink.streams[0].start_row, 0);
        assert_eq!(sink.streams[0].values, vec![1.0, 2.0]);
    }

    /// Sink that runs a second flush from inside its first commit
    struct NestedFlushSink<'a> {
        store: &'a TimeSeriesStore,
        inner: MemorySink,
        nested: bool,
    }

    impl RecordingSink for NestedFlushSink<'_> {
        fn write_stream(&mut self, stream: &SampleStream) -> EarableResult<()> {
            self.inner.write_stream(stream)
        }

        fn write_events(&mut self, events: &[EventMarker]) -> EarableResult<()> {
            self.inner.write_events(events)
        }

        fn commit(&mut self, recording_id: Uuid) -> EarableResult<()> {
            if !self.nested {
                self.nested = true;
                self.store.flush(&mut MemorySink::default())?;
            }
            self.inner.commit(recording_id)
        }
    }

    #[test]
    fn test_overlapping_flushes_keep_offsets_in_range() {
        let store = small_store(10);
        store.append(&eeg_batch(vec![1.0, 2.0])).unwrap();

        let mut nested = NestedFlushSink {
            store: &store,
            inner: MemorySink::default(),
            nested: false,
        };
        store.flush(&mut nested).unwrap();
        assert!(nested.nested);

        store.append(&eeg_batch(vec![3.0, 4.0])).unwrap();
        let mut sink = MemorySink::default();
        store.flush(&mut sink).unwrap();
        let eeg = &sink.streams[0];
        assert_eq!(eeg.start_row, 1);
        assert_eq!(eeg.values, vec![3.0, 4.0]);
        assert_eq!(eeg.batch_sizes, vec![1]);

        sink.streams.clear();
        store.flush(&mut sink).unwrap();
        assert!(sink.streams[0].values.is_empty());
        assert!(sink.streams[0].batch_sizes.is_empty());
    }

    #[test]
    fn test_concurrent_readers_see_whole_batches() {
        use std::sync::Arc;

        let store = Arc::new(small_store(4));
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..500 {
                    let v = i as f64;
                    store.append(&eeg_batch(vec![v, v, v, v, v, v])).unwrap();
                }
            })
        };
        for _ in 0..200 {
            let size = store.size(Modality::Eeg);
            assert_eq!(size % 3, 0);
            let window = store.read(Modality::Eeg, 0..size).unwrap();
            assert_eq!(window.len(), size);
        }
        writer.join().unwrap();
        assert_eq!(store.size(Modality::Eeg), 1500);
    }
}
