//! Proximity classification
//!
//! Decides, for a single frame, whether any monitored fingertip is within the
//! configured distance of the mouth. Pure and allocation-free; runs once per
//! incoming frame on the hot path.

use crate::types::{FrameObservation, ProximityResult};

/// Stateless fingertip-to-mouth proximity classifier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityClassifier {
    distance_threshold: f64,
}

impl ProximityClassifier {
    pub fn new(distance_threshold: f64) -> Self {
        Self { distance_threshold }
    }

    pub fn distance_threshold(&self) -> f64 {
        self.distance_threshold
    }

    pub fn classify(&self, observation: &FrameObservation) -> ProximityResult {
        classify(observation, self.distance_threshold)
    }
}

/// Classify one frame.
///
/// Missing mouth or missing hands yield `hand_near_mouth = false`. A fingertip
/// counts only when its distance is strictly below `distance_threshold`.
pub fn classify(observation: &FrameObservation, distance_threshold: f64) -> ProximityResult {
    let Some(mouth) = observation.mouth.as_ref() else {
        return ProximityResult::default();
    };

    let closest_distance = observation
        .hands()
        .flat_map(|hand| hand.fingertips())
        .map(|tip| tip.distance_to(mouth))
        .filter(|d| !d.is_nan())
        .fold(None, |closest: Option<f64>, d| {
            Some(closest.map_or(d, |c| c.min(d)))
        });

    ProximityResult {
        hand_near_mouth: closest_distance.is_some_and(|d| d < distance_threshold),
        closest_distance,
    }
}
