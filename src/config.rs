//! Run configuration, loadable from JSON. Every field has a default, so a
//! config file only needs the values it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::pipeline::StreamOptions;
use crate::sampler::DEFAULT_FPS;
use crate::timeline::TimelineOptions;
use crate::visual::MapperConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Output frame rate
    pub fps: f64,
    pub timeline: TimelineOptions,
    pub mapper: MapperConfig,
    pub stream: StreamOptions,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            timeline: TimelineOptions::default(),
            mapper: MapperConfig::default(),
            stream: StreamOptions::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(json: &str) -> Result<Self, SyncError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SyncError::Config(format!("bad config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| SyncError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SyncError::Config(format!("JSON serialization error: {e}")))
    }

    /// Reject values no run could use.
    pub fn validate(&self) -> Result<(), SyncError> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(SyncError::Config(format!("fps must be positive, got {}", self.fps)));
        }
        if !(self.timeline.default_bpm.is_finite() && self.timeline.default_bpm > 0.0) {
            return Err(SyncError::Config(format!(
                "timeline.default_bpm must be positive, got {}",
                self.timeline.default_bpm
            )));
        }
        let markers = &self.mapper.markers;
        for (name, value) in [
            ("wink_default_sec", markers.wink_default_sec),
            ("move_sec_fast", markers.move_sec_fast),
            ("move_sec_slow", markers.move_sec_slow),
            ("tilt_move_sec", markers.tilt_move_sec),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SyncError::Config(format!(
                    "mapper.markers.{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if let Some(beats) = markers.tilt_lead_beats {
            if !(beats.is_finite() && beats >= 0.0) {
                return Err(SyncError::Config(format!(
                    "mapper.markers.tilt_lead_beats must be a non-negative number, got {beats}"
                )));
            }
        }
        let scroll = &self.mapper.scroll;
        let flying = &self.mapper.flying_lyrics;
        for (name, value) in [
            ("markers.tilt_max_deg", markers.tilt_max_deg),
            ("markers.eye_auto_threshold_deg", markers.eye_auto_threshold_deg),
            ("scroll.px_per_second", scroll.px_per_second),
            ("scroll.playhead_x", scroll.playhead_x),
            ("flying_lyrics.start_x", flying.start_x),
            ("flying_lyrics.start_y", flying.start_y),
            ("flying_lyrics.velocity_x", flying.velocity_x),
            ("flying_lyrics.velocity_y", flying.velocity_y),
            ("flying_lyrics.gravity_scale", flying.gravity_scale),
        ] {
            if !value.is_finite() {
                return Err(SyncError::Config(format!(
                    "mapper.{name} must be a finite number, got {value}"
                )));
            }
        }
        if !(flying.max_flight_sec.is_finite() && flying.max_flight_sec > 0.0) {
            return Err(SyncError::Config(format!(
                "mapper.flying_lyrics.max_flight_sec must be positive, got {}",
                flying.max_flight_sec
            )));
        }
        if self.stream.queue_depth == 0 {
            return Err(SyncError::Config("stream.queue_depth must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phoneme::PhonemeTable;
    use crate::timeline::{MeasureRange, PartFilter};
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_object_is_the_default() {
        assert_eq!(SyncConfig::from_json_str("{}").unwrap(), SyncConfig::default());
    }

    #[test]
    fn partial_config_overrides_only_given_fields() {
        let json = r#"{
            "fps": 24,
            "timeline": { "parts": { "only": ["P2"] }, "measure_range": { "start": 3, "end": 8 } },
            "mapper": {
                "phonemes": { "closed": "CLOSED", "vowels": { "A": "A", "O": "O", "U": "U", "I": "A", "E": "A", "N": "CLOSED" } },
                "markers": { "tilt_max_deg": 8.0 }
            }
        }"#;
        let config = SyncConfig::from_json_str(json).unwrap();
        assert_eq!(config.fps, 24.0);
        assert_eq!(config.timeline.parts, PartFilter::Only(vec!["P2".to_string()]));
        assert_eq!(
            config.timeline.measure_range,
            Some(MeasureRange {
                start: 3,
                end: Some(8)
            })
        );
        assert_eq!(config.timeline.default_bpm, 120.0);
        assert_eq!(config.mapper.phonemes, PhonemeTable::reduced());
        assert_eq!(config.mapper.markers.tilt_max_deg, 8.0);
        assert_eq!(config.mapper.markers.wink_default_sec, 0.15);
        assert_eq!(config.stream.queue_depth, 32);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            SyncConfig::from_json_str(r#"{"fps": 0}"#),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            SyncConfig::from_json_str(r#"{"stream": {"queue_depth": 0}}"#),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            SyncConfig::from_json_str("not json"),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn non_finite_geometry_is_rejected() {
        let mut config = SyncConfig::default();
        config.mapper.scroll.px_per_second = f64::INFINITY;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let mut config = SyncConfig::default();
        config.mapper.markers.tilt_max_deg = f64::NAN;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let mut config = SyncConfig::default();
        config.mapper.markers.eye_auto_threshold_deg = f64::NAN;
        config.mapper.scroll.playhead_x = f64::NEG_INFINITY;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let mut config = SyncConfig::default();
        config.mapper.markers.tilt_lead_beats = Some(-1.0);
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let mut config = SyncConfig::default();
        config.mapper.flying_lyrics.max_flight_sec = 0.0;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let mut config = SyncConfig::default();
        config.mapper.markers.tilt_lead_beats = Some(0.5);
        config.mapper.flying_lyrics.enabled = true;
        assert!(config.validate().is_ok());
    }
}
