//! Throughput of the ingestion hot path
//!
//! One EEG frame arrives every 72 ms at 125 Hz; decoding plus appending has
//! to stay far below that.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use earable_core::{
    decode_eeg, decode_imu, decode_ppg, encode_eeg_frame, encode_imu_frame, encode_ppg_frame,
    HostTimestamp, Modality, SequenceTracker, StoreLayout, TimeSeriesStore,
};

fn eeg_frame(sequence: u8, channels: usize) -> Vec<u8> {
    let rows: Vec<Vec<i32>> = (0..9)
        .map(|i| (0..channels).map(|ch| (i * 1000 + ch as i32 * 37) - 4000).collect())
        .collect();
    encode_eeg_frame(sequence, 1234, &rows).unwrap()
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for &channels in &[2usize, 6, 8] {
        let bytes = eeg_frame(1, channels);
        group.bench_with_input(BenchmarkId::new("eeg", channels), &bytes, |b, bytes| {
            b.iter(|| black_box(decode_eeg(black_box(bytes), channels)))
        });
    }

    let imu = encode_imu_frame(0, &[[12, -40, 256]; 25]).unwrap();
    group.bench_function("imu", |b| b.iter(|| black_box(decode_imu(black_box(&imu)))));

    let ppg = encode_ppg_frame(0, &[[1000, 2000, 3000]; 13]).unwrap();
    group.bench_function("ppg", |b| b.iter(|| black_box(decode_ppg(black_box(&ppg)))));

    group.finish();
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    let frames: Vec<Vec<u8>> = (0..=255u8).map(|seq| eeg_frame(seq, 6)).collect();

    group.bench_function("decode_track_append_256_frames", |b| {
        b.iter(|| {
            // small initial capacity so growth is part of the measurement
            let store = TimeSeriesStore::new(StoreLayout::earable(1.0)).unwrap();
            let mut tracker = SequenceTracker::new();
            for bytes in &frames {
                let packet = decode_eeg(bytes, 6).unwrap();
                if tracker.observe(packet.sequence).should_append() {
                    let batch = packet.to_batch(HostTimestamp::default());
                    store.append(&batch).unwrap();
                }
            }
            black_box(store.size(Modality::Eeg))
        })
    });

    let store = TimeSeriesStore::new(StoreLayout::default()).unwrap();
    for bytes in &frames {
        let batch = decode_eeg(bytes, 6).unwrap().to_batch(HostTimestamp::default());
        store.append(&batch).unwrap();
    }
    group.bench_function("read_latest_3s_two_channels", |b| {
        b.iter(|| black_box(store.read_latest(Modality::Eeg, &[0, 3], 375).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_ingest);
criterion_main!(benches);
