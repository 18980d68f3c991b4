//! Perception adapter
//!
//! Maps the raw result shape of a holistic face/hand landmark detector into
//! [`FrameObservation`]s, and parses timestamped frame records (NDJSON or a
//! JSON array) for replay and streaming input.

use crate::error::MonitorError;
use crate::types::{FrameObservation, HandLandmarks, LandmarkPoint, Visibility};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Face mesh index of the inner upper lip, used as the mouth point
pub const MOUTH_LANDMARK_INDEX: usize = 13;

/// Raw detector output for one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HolisticFrame {
    /// Explicit mouth point; takes precedence over the face mesh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouth: Option<LandmarkPoint>,
    /// Full face mesh
    #[serde(
        default,
        alias = "faceLandmarks",
        alias = "face_landmarks",
        skip_serializing_if = "Option::is_none"
    )]
    pub face: Option<Vec<LandmarkPoint>>,
    #[serde(
        default,
        alias = "leftHandLandmarks",
        alias = "left_hand_landmarks",
        skip_serializing_if = "Option::is_none"
    )]
    pub left_hand: Option<HandLandmarks>,
    #[serde(
        default,
        alias = "rightHandLandmarks",
        alias = "right_hand_landmarks",
        skip_serializing_if = "Option::is_none"
    )]
    pub right_hand: Option<HandLandmarks>,
}

impl HolisticFrame {
    /// Reduce to the landmarks the classifier consults.
    ///
    /// A face mesh too short to contain the mouth index counts as no mouth.
    pub fn to_observation(&self) -> FrameObservation {
        let mouth = self.mouth.or_else(|| {
            self.face
                .as_ref()
                .and_then(|face| face.get(MOUTH_LANDMARK_INDEX).copied())
        });

        FrameObservation {
            mouth,
            left_hand: self.left_hand.clone(),
            right_hand: self.right_hand.clone(),
        }
    }

    /// Check that every present coordinate is finite
    pub fn validate(&self) -> Result<(), FrameValidationError> {
        if let Some(mouth) = &self.mouth {
            check_point("mouth", 0, mouth)?;
        }
        if let Some(face) = &self.face {
            for (i, p) in face.iter().enumerate() {
                check_point("face", i, p)?;
            }
        }
        for (name, hand) in [("left_hand", &self.left_hand), ("right_hand", &self.right_hand)] {
            if let Some(hand) = hand {
                for (i, p) in hand.0.iter().enumerate() {
                    check_point(name, i, p)?;
                }
            }
        }
        Ok(())
    }
}

fn check_point(set: &str, index: usize, point: &LandmarkPoint) -> Result<(), FrameValidationError> {
    if point.is_finite() {
        Ok(())
    } else {
        Err(FrameValidationError::NonFiniteCoordinate {
            set: set.to_string(),
            index,
        })
    }
}

/// A detector frame stamped with its capture time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub frame: HolisticFrame,
    /// Visibility of the monitoring surface from this frame on, when it changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

impl FrameRecord {
    pub fn observation(&self) -> FrameObservation {
        self.frame.to_observation()
    }
}

/// Frame record validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameValidationError {
    #[error("Non-finite coordinate in {set}[{index}]")]
    NonFiniteCoordinate { set: String, index: usize },

    #[error("Frame timestamps go backwards at record {index}")]
    OutOfOrder { index: usize },
}

/// Parser for frame record streams
pub struct FrameAdapter;

impl FrameAdapter {
    /// Parse and validate newline-delimited frame records
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<FrameRecord>, MonitorError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record = Self::parse_record(trimmed).map_err(|e| {
                MonitorError::InvalidFrame(format!("line {}: {}", line_num + 1, e))
            })?;
            records.push(record);
        }
        Self::check_order(&records)?;
        Ok(records)
    }

    /// Parse and validate a JSON array of frame records
    pub fn parse_array(json: &str) -> Result<Vec<FrameRecord>, MonitorError> {
        let records: Vec<FrameRecord> = serde_json::from_str(json)?;
        for (idx, record) in records.iter().enumerate() {
            record
                .frame
                .validate()
                .map_err(|e| MonitorError::InvalidFrame(format!("record {idx}: {e}")))?;
        }
        Self::check_order(&records)?;
        Ok(records)
    }

    /// Parse and validate a single record
    pub fn parse_record(json: &str) -> Result<FrameRecord, MonitorError> {
        let record: FrameRecord = serde_json::from_str(json)?;
        record
            .frame
            .validate()
            .map_err(|e| MonitorError::InvalidFrame(e.to_string()))?;
        Ok(record)
    }

    fn check_order(records: &[FrameRecord]) -> Result<(), MonitorError> {
        for (idx, pair) in records.windows(2).enumerate() {
            if pair[1].timestamp < pair[0].timestamp {
                return Err(MonitorError::InvalidFrame(
                    FrameValidationError::OutOfOrder { index: idx + 1 }.to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_mesh_with_mouth(x: f64, y: f64) -> Vec<LandmarkPoint> {
        let mut face = vec![LandmarkPoint::new(0.0, 0.0); 468];
        face[MOUTH_LANDMARK_INDEX] = LandmarkPoint::new(x, y);
        face
    }

    #[test]
    fn test_mouth_taken_from_face_mesh() {
        let frame = HolisticFrame {
            face: Some(face_mesh_with_mouth(0.4, 0.7)),
            ..Default::default()
        };
        assert_eq!(frame.to_observation().mouth, Some(LandmarkPoint::new(0.4, 0.7)));
    }

    #[test]
    fn test_explicit_mouth_wins() {
        let frame = HolisticFrame {
            mouth: Some(LandmarkPoint::new(0.1, 0.2)),
            face: Some(face_mesh_with_mouth(0.4, 0.7)),
            ..Default::default()
        };
        assert_eq!(frame.to_observation().mouth, Some(LandmarkPoint::new(0.1, 0.2)));
    }

    #[test]
    fn test_short_face_mesh_has_no_mouth() {
        let frame = HolisticFrame {
            face: Some(vec![LandmarkPoint::new(0.5, 0.5); 5]),
            ..Default::default()
        };
        assert!(frame.to_observation().mouth.is_none());
    }

    #[test]
    fn test_parse_ndjson_accepts_detector_field_names() {
        let input = r#"
{"timestamp":"2024-01-15T14:00:00Z","faceLandmarks":[],"rightHandLandmarks":[{"x":0.5,"y":0.5}]}

{"timestamp":"2024-01-15T14:00:00.100Z","mouth":{"x":0.5,"y":0.5},"visibility":"hidden"}
"#;
        let records = FrameAdapter::parse_ndjson(input).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].frame.right_hand.is_some());
        assert_eq!(records[1].visibility, Some(Visibility::Hidden));
    }

    #[test]
    fn test_parse_ndjson_reports_line_number() {
        let input = "{\"timestamp\":\"2024-01-15T14:00:00Z\"}\nnot json\n";
        let err = FrameAdapter::parse_ndjson(input).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_out_of_order_rejected() {
        let input = r#"[
            {"timestamp":"2024-01-15T14:00:01Z"},
            {"timestamp":"2024-01-15T14:00:00Z"}
        ]"#;
        let err = FrameAdapter::parse_array(input).unwrap_err();
        assert!(err.to_string().contains("backwards"));
    }

    #[test]
    fn test_non_finite_rejected() {
        let frame = HolisticFrame {
            mouth: Some(LandmarkPoint::new(f64::NAN, 0.5)),
            ..Default::default()
        };
        assert_eq!(
            frame.validate(),
            Err(FrameValidationError::NonFiniteCoordinate {
                set: "mouth".to_string(),
                index: 0
            })
        );
    }
}
