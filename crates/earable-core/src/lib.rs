//! Earable-Core: acquisition data model for the wearable biosignal stream
//!
//! Frame codec, sequence tracking and the shared time-series store that every
//! analysis task reads from.

pub mod codec;
pub mod error;
pub mod events;
pub mod modality;
pub mod sequence;
pub mod store;
pub mod timestamp;

pub use codec::{
    decode_eeg, decode_frame, decode_imu, decode_ppg, encode_eeg_frame, encode_imu_frame,
    encode_ppg_frame, DecodedFrame,
};
pub use error::{EarableError, EarableResult, FrameError};
pub use events::{EventKind, EventMarker};
pub use modality::{EegPacket, ImuPacket, Modality, PpgPacket, RawFrame, SampleBatch};
pub use sequence::{SequenceOutcome, SequenceStats, SequenceTracker};
pub use store::{RecordingSink, SampleStream, StoreLayout, StreamLayout, TimeSeriesStore, Window};
pub use timestamp::HostTimestamp;
