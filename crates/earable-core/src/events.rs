//! Discrete event markers stored alongside the sample streams

use crate::timestamp::HostTimestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a marker; numeric ids match the recording format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Generic,
    LeftEyeGaze,
    RightEyeGaze,
    Blink,
    JawClench,
    Movement,
}

impl EventKind {
    pub fn id(&self) -> i32 {
        match self {
            EventKind::Generic => -1,
            EventKind::LeftEyeGaze => 0,
            EventKind::RightEyeGaze => 1,
            EventKind::Blink => 2,
            EventKind::JawClench => 3,
            EventKind::Movement => 4,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            -1 => Some(EventKind::Generic),
            0 => Some(EventKind::LeftEyeGaze),
            1 => Some(EventKind::RightEyeGaze),
            2 => Some(EventKind::Blink),
            3 => Some(EventKind::JawClench),
            4 => Some(EventKind::Movement),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Generic => "generic",
            EventKind::LeftEyeGaze => "left_eye_gaze",
            EventKind::RightEyeGaze => "right_eye_gaze",
            EventKind::Blink => "blink",
            EventKind::JawClench => "jaw_clench",
            EventKind::Movement => "movement",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One marker; `sample_index` is the EEG index the detector pinned it to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMarker {
    pub timestamp: HostTimestamp,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_index: Option<usize>,
}

impl EventMarker {
    pub fn new(timestamp: HostTimestamp, kind: EventKind) -> Self {
        Self {
            timestamp,
            kind,
            sample_index: None,
        }
    }

    pub fn at_sample(mut self, index: usize) -> Self {
        self.sample_index = Some(index);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_round_trip() {
        for kind in [
            EventKind::Generic,
            EventKind::LeftEyeGaze,
            EventKind::RightEyeGaze,
            EventKind::Blink,
            EventKind::JawClench,
            EventKind::Movement,
        ] {
            assert_eq!(EventKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(EventKind::from_id(9), None);
    }

    #[test]
    fn test_marker_builder() {
        let marker = EventMarker::new(HostTimestamp::from_secs_f64(3.0), EventKind::Blink).at_sample(250);
        assert_eq!(marker.sample_index, Some(250));
        assert_eq!(marker.kind.to_string(), "blink");
    }
}
