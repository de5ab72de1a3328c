use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Process-wide configuration of the dynamic-rule detector.
///
/// Stored as a key/value map; keys this version does not recognize are
/// preserved across save/load so older and newer processes can share a
/// store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorConfig {
    /// Master switch; when off, `track_subject` is a no-op.
    pub enabled: bool,
    /// Width of the counting window, minutes.
    pub time_window_minutes: u32,
    /// How many sightings inside the window arm the time-span check.
    pub threshold_count: u32,
    /// Maximum span, in fractional minutes, of the first
    /// `threshold_count` sightings for a rule to be created.
    pub time_span_threshold_minutes: f64,
    /// Dynamic rules idle longer than this are expired by cleanup.
    pub expiration_hours: u32,
    /// Idle bound used by last-hit based reporting.
    pub last_hit_threshold_hours: u32,
    /// Keys written by other versions; preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time_window_minutes: 30,
            threshold_count: 30,
            time_span_threshold_minutes: 3.0,
            expiration_hours: 48,
            last_hit_threshold_hours: 72,
            extra: BTreeMap::new(),
        }
    }
}

impl DetectorConfig {
    /// Validate every field against its accepted range, naming the first
    /// offending field. Nothing is mutated on failure.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(5..=120).contains(&self.time_window_minutes) {
            return Err(ValidationError::new(
                "timeWindowMinutes",
                "must be an integer between 5 and 120",
            ));
        }
        if self.threshold_count < 5 {
            return Err(ValidationError::new(
                "thresholdCount",
                "must be an integer of at least 5",
            ));
        }
        if !(0.5..=30.0).contains(&self.time_span_threshold_minutes) {
            return Err(ValidationError::new(
                "timeSpanThresholdMinutes",
                "must be between 0.5 and 30",
            ));
        }
        if self.expiration_hours < 1 {
            return Err(ValidationError::new(
                "expirationHours",
                "must be an integer of at least 1",
            ));
        }
        if self.last_hit_threshold_hours < 1 {
            return Err(ValidationError::new(
                "lastHitThresholdHours",
                "must be an integer of at least 1",
            ));
        }
        Ok(())
    }
}
