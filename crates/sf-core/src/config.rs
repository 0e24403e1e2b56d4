//! Remuxer configuration.
//!
//! [`RemuxConfig`] carries the tunable policy of the remuxer: keyframe
//! gating, last-frame stretching, and the audio drift thresholds. Every
//! field defaults sensibly so a completely empty `{}` (JSON) or empty TOML
//! document is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::Error;

/// Tunable policy for the fragmented-media remuxer.
///
/// The thresholds are heuristics tuned against real streams rather than
/// physical constants, which is why each is exposed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemuxConfig {
    /// Drop video samples preceding the first keyframe after a discontinuity.
    pub force_key_frame_on_discontinuity: bool,
    /// Stretch the last video frame to meet the end of the companion audio.
    pub stretch_short_video_track: bool,
    /// Gap (seconds) between video end and audio end tolerated before stretching.
    pub max_buffer_hole: f64,
    /// Audio drift, in frame durations, that triggers a drop or silence fill.
    pub max_audio_frames_drift: u32,
    /// Loose audio contiguity tolerance in frame durations.
    pub audio_contiguity_frames: u32,
    /// Audio contiguity tolerance in milliseconds when the time offset is accurate.
    pub accurate_audio_tolerance_ms: f64,
    /// Largest gap (seconds) that is filled with silent frames.
    pub max_silent_gap_secs: f64,
    /// Emit MPEG audio as a raw `audio/mpeg` stream with no box wrapper.
    pub mpeg_audio_raw: bool,
    /// Synthesize a silent fragment for an audio track that delivered no samples.
    pub fill_empty_audio: bool,
}

impl Default for RemuxConfig {
    fn default() -> Self {
        Self {
            force_key_frame_on_discontinuity: true,
            stretch_short_video_track: false,
            max_buffer_hole: 0.1,
            max_audio_frames_drift: 1,
            audio_contiguity_frames: 20,
            accurate_audio_tolerance_ms: 9.0,
            max_silent_gap_secs: 10.0,
            mpeg_audio_raw: false,
            fill_empty_audio: false,
        }
    }
}

impl RemuxConfig {
    /// Deserialize a `RemuxConfig` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::config(format!("config parse error: {e}")))
    }

    /// Deserialize a `RemuxConfig` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::config(format!("config parse error: {e}")))
    }

    /// Read and parse a config file, choosing the format by extension
    /// (`.toml` is TOML, anything else is JSON).
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            _ => Self::from_json(&contents),
        }
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None`, the file does not exist, or it fails to parse.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match Self::from_path(path) {
            Ok(config) => config,
            Err(Error::Io { source }) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No remux config at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to load remux config {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.max_buffer_hole < 0.0 {
            warnings.push("max_buffer_hole is negative; every short video track will stretch".into());
        }
        if self.max_audio_frames_drift == 0 {
            warnings.push(
                "max_audio_frames_drift is 0; every audio jitter will drop or inject frames".into(),
            );
        }
        if self.audio_contiguity_frames == 0 {
            warnings.push("audio_contiguity_frames is 0; audio is only contiguous when flagged".into());
        }
        if self.accurate_audio_tolerance_ms < 0.0 {
            warnings.push("accurate_audio_tolerance_ms is negative".into());
        }
        if self.max_silent_gap_secs <= 0.0 {
            warnings.push("max_silent_gap_secs is not positive; silence is never injected".into());
        }

        warnings
    }
}
