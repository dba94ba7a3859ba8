//! Binary layouts of the three notification characteristics
//!
//! All multi-byte fields are big-endian. Decoders are pure functions of the
//! payload; encoders exist so simulated devices and tests can produce exact
//! frames.

use crate::error::{EarableError, EarableResult, FrameError};
use crate::modality::{EegPacket, ImuPacket, Modality, PpgPacket, RawFrame};

/// Samples per channel carried by one EEG frame
pub const EEG_SAMPLES_PER_FRAME: usize = 9;
/// Header bytes before the first EEG sample values
pub const EEG_HEADER_LEN: usize = 6;

/// Samples carried by one IMU frame
pub const IMU_SAMPLES_PER_FRAME: usize = 25;
/// Raw accelerometer count to m/s²
pub const IMU_ACCEL_SCALE: f64 = 9.8 / 256.0;
/// Size of an IMU frame
pub const IMU_FRAME_LEN: usize = 4 + IMU_SAMPLES_PER_FRAME * 6;

/// A PPG payload of exactly this size carries one extra sample
pub const PPG_LONG_FRAME_LEN: usize = 121;
pub const PPG_LONG_SAMPLES: usize = 13;
pub const PPG_SHORT_SAMPLES: usize = 12;
/// Bytes per PPG sample: three tagged 24-bit words
const PPG_SAMPLE_LEN: usize = 9;
const PPG_TAG_SHIFT: u32 = 19;
const PPG_VALUE_MASK: u32 = (1 << PPG_TAG_SHIFT) - 1;

const PPG_TAG_GREEN: u32 = 1;
const PPG_TAG_IR: u32 = 2;
const PPG_TAG_RED: u32 = 3;

const I24_MIN: i32 = -(1 << 23);
const I24_MAX: i32 = (1 << 23) - 1;

/// Total byte length of an EEG frame for `n_channels`
pub const fn eeg_frame_len(n_channels: usize) -> usize {
    EEG_HEADER_LEN + 3 * n_channels + (EEG_SAMPLES_PER_FRAME - 1) * eeg_stride(n_channels)
}

/// Distance between the status bytes of consecutive trailing samples
pub const fn eeg_stride(n_channels: usize) -> usize {
    1 + 3 * n_channels
}

#[inline]
fn read_i24(bytes: &[u8], at: usize) -> i32 {
    let raw = ((bytes[at] as i32) << 16) | ((bytes[at + 1] as i32) << 8) | bytes[at + 2] as i32;
    (raw << 8) >> 8
}

#[inline]
fn read_u24(bytes: &[u8], at: usize) -> u32 {
    ((bytes[at] as u32) << 16) | ((bytes[at + 1] as u32) << 8) | bytes[at + 2] as u32
}

#[inline]
fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[inline]
fn push_24(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes()[1..]);
}

fn require_len(bytes: &[u8], needed: usize) -> Result<(), FrameError> {
    if bytes.len() < needed {
        Err(FrameError::Truncated {
            needed,
            actual: bytes.len(),
        })
    } else {
        Ok(())
    }
}

// ============================================================================
// Decoders
// ============================================================================

/// Decode one EEG notification for a device configured with `n_channels`
pub fn decode_eeg(bytes: &[u8], n_channels: usize) -> Result<EegPacket, FrameError> {
    require_len(bytes, EEG_HEADER_LEN)?;

    let declared = bytes[1] as usize;
    if declared != n_channels {
        return Err(FrameError::ChannelCountMismatch {
            declared,
            expected: n_channels,
        });
    }
    require_len(bytes, eeg_frame_len(n_channels))?;

    let sequence = bytes[0];
    let device_timestamp = read_u32(bytes, 2);
    let stride = eeg_stride(n_channels);

    let mut samples = Vec::with_capacity(EEG_SAMPLES_PER_FRAME);
    samples.push(
        (0..n_channels)
            .map(|ch| read_i24(bytes, EEG_HEADER_LEN + 3 * ch))
            .collect::<Vec<_>>(),
    );

    for i in 1..EEG_SAMPLES_PER_FRAME {
        // skip the status byte
        let base = EEG_HEADER_LEN + 3 * n_channels + stride * (i - 1) + 1;
        samples.push((0..n_channels).map(|ch| read_i24(bytes, base + 3 * ch)).collect());
    }

    Ok(EegPacket {
        sequence,
        device_timestamp,
        samples,
    })
}

/// Decode one IMU notification, scaling raw counts to m/s²
pub fn decode_imu(bytes: &[u8]) -> Result<ImuPacket, FrameError> {
    require_len(bytes, IMU_FRAME_LEN)?;

    let device_timestamp = read_u32(bytes, 0);
    let samples = (0..IMU_SAMPLES_PER_FRAME)
        .map(|i| {
            let base = 4 + i * 6;
            let mut axes = [0.0; 3];
            for (axis, value) in axes.iter_mut().enumerate() {
                let at = base + axis * 2;
                *value = i16::from_be_bytes([bytes[at], bytes[at + 1]]) as f64 * IMU_ACCEL_SCALE;
            }
            axes
        })
        .collect();

    Ok(ImuPacket {
        device_timestamp,
        samples,
    })
}

/// Decode one PPG notification into its green/IR/red sub-streams
pub fn decode_ppg(bytes: &[u8]) -> Result<PpgPacket, FrameError> {
    let sample_count = if bytes.len() == PPG_LONG_FRAME_LEN {
        PPG_LONG_SAMPLES
    } else {
        PPG_SHORT_SAMPLES
    };
    require_len(bytes, 4 + sample_count * PPG_SAMPLE_LEN)?;

    let mut packet = PpgPacket {
        device_timestamp: read_u32(bytes, 0),
        ..Default::default()
    };

    for i in 0..sample_count * 3 {
        let word = read_u24(bytes, 4 + i * 3);
        let value = word & PPG_VALUE_MASK;
        match word >> PPG_TAG_SHIFT {
            PPG_TAG_GREEN => packet.green.push(value),
            PPG_TAG_IR => packet.ir.push(value),
            PPG_TAG_RED => packet.red.push(value),
            _ => packet.untagged += 1,
        }
    }

    Ok(packet)
}

/// Decoded payload of any modality
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Eeg(EegPacket),
    Imu(ImuPacket),
    Ppg(PpgPacket),
}

/// Dispatch a raw frame to its modality decoder
pub fn decode_frame(frame: &RawFrame, eeg_channels: usize) -> EarableResult<DecodedFrame> {
    let decoded = match frame.modality {
        Modality::Eeg => decode_eeg(&frame.bytes, eeg_channels).map(DecodedFrame::Eeg),
        Modality::Imu => decode_imu(&frame.bytes).map(DecodedFrame::Imu),
        Modality::Ppg => decode_ppg(&frame.bytes).map(DecodedFrame::Ppg),
    };
    decoded.map_err(|source| EarableError::MalformedFrame {
        modality: frame.modality,
        source,
    })
}

// ============================================================================
// Encoders
// ============================================================================

/// Build an EEG frame from 9 rows of `n` signed 24-bit values
pub fn encode_eeg_frame(
    sequence: u8,
    device_timestamp: u32,
    samples: &[Vec<i32>],
) -> Result<Vec<u8>, FrameError> {
    if samples.len() != EEG_SAMPLES_PER_FRAME {
        return Err(FrameError::InvalidLayout {
            reason: "EEG frame needs exactly 9 samples",
        });
    }
    let n_channels = samples[0].len();
    if n_channels == 0 || n_channels > u8::MAX as usize {
        return Err(FrameError::InvalidLayout {
            reason: "EEG channel count must be 1..=255",
        });
    }
    if samples.iter().any(|row| row.len() != n_channels) {
        return Err(FrameError::InvalidLayout {
            reason: "EEG rows differ in channel count",
        });
    }
    if samples.iter().flatten().any(|v| !(I24_MIN..=I24_MAX).contains(v)) {
        return Err(FrameError::InvalidLayout {
            reason: "EEG value outside signed 24-bit range",
        });
    }

    let mut out = Vec::with_capacity(eeg_frame_len(n_channels));
    out.push(sequence);
    out.push(n_channels as u8);
    out.extend_from_slice(&device_timestamp.to_be_bytes());
    for (i, row) in samples.iter().enumerate() {
        if i > 0 {
            // status byte
            out.push(0);
        }
        for &value in row {
            push_24(&mut out, value as u32);
        }
    }
    Ok(out)
}

/// Build an IMU frame from 25 raw (unscaled) accelerometer samples
pub fn encode_imu_frame(device_timestamp: u32, samples: &[[i16; 3]]) -> Result<Vec<u8>, FrameError> {
    if samples.len() != IMU_SAMPLES_PER_FRAME {
        return Err(FrameError::InvalidLayout {
            reason: "IMU frame needs exactly 25 samples",
        });
    }
    let mut out = Vec::with_capacity(IMU_FRAME_LEN);
    out.extend_from_slice(&device_timestamp.to_be_bytes());
    for sample in samples {
        for axis in sample {
            out.extend_from_slice(&axis.to_be_bytes());
        }
    }
    Ok(out)
}

/// Build a PPG frame from 12 or 13 `[green, ir, red]` rows of 19-bit values
pub fn encode_ppg_frame(device_timestamp: u32, rows: &[[u32; 3]]) -> Result<Vec<u8>, FrameError> {
    if rows.len() != PPG_SHORT_SAMPLES && rows.len() != PPG_LONG_SAMPLES {
        return Err(FrameError::InvalidLayout {
            reason: "PPG frame needs 12 or 13 samples",
        });
    }
    if rows.iter().flatten().any(|&v| v > PPG_VALUE_MASK) {
        return Err(FrameError::InvalidLayout {
            reason: "PPG value wider than 19 bits",
        });
    }
    let mut out = Vec::with_capacity(4 + rows.len() * PPG_SAMPLE_LEN);
    out.extend_from_slice(&device_timestamp.to_be_bytes());
    for row in rows {
        push_24(&mut out, (PPG_TAG_GREEN << PPG_TAG_SHIFT) ^ row[0]);
        push_24(&mut out, (PPG_TAG_IR << PPG_TAG_SHIFT) ^ row[1]);
        push_24(&mut out, (PPG_TAG_RED << PPG_TAG_SHIFT) ^ row[2]);
    }
    Ok(out)
}
