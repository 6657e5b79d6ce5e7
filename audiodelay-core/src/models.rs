//! Data models for the delay-measurement engine.

use serde::{Deserialize, Serialize};

/// Measurement sample rate — low-res mono used for cross-correlation and
/// fingerprinting only.
pub const MEASURE_SR: u32 = 8000;

/// Default analysis segment length in seconds.
pub const DEFAULT_SEGMENT_SEC: f64 = 300.0;

/// Energy-window cap in seconds; the windower uses `min(30, segment_sec)`.
pub const MAX_WINDOW_SEC: f64 = 30.0;

/// Minimum cosine similarity for a fingerprint pairing to be accepted.
pub const FINGERPRINT_THRESHOLD: f32 = 0.7;

/// |start − end| below this is high confidence (ms).
pub const HIGH_CONFIDENCE_MS: f64 = 50.0;

/// |start − end| below this is medium confidence (ms).
pub const MEDIUM_CONFIDENCE_MS: f64 = 500.0;

// ---------------------------------------------------------------------------
//  Segments
// ---------------------------------------------------------------------------

/// Which part of a file a cached segment was taken from.
///
/// Part of the acquisition key: the same byte range loaded for different
/// purposes must not collide in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentTag {
    Start,
    Mid,
    End,
    Fingerprint,
}

impl SegmentTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentTag::Start => "start",
            SegmentTag::Mid => "mid",
            SegmentTag::End => "end",
            SegmentTag::Fingerprint => "fingerprint",
        }
    }
}

// ---------------------------------------------------------------------------
//  Results
// ---------------------------------------------------------------------------

/// Outcome of analyzing one (video, audio) pair.
///
/// `start_delay_ms` is present iff the start analysis succeeded;
/// `end_delay_ms` additionally requires both durations and the end analysis.
/// `error` is populated whenever either value is absent.
#[derive(Debug, Clone, Serialize)]
pub struct PairResult {
    pub video_path: String,
    pub audio_path: String,
    pub start_delay_ms: Option<f64>,
    pub end_delay_ms: Option<f64>,
    pub error: Option<String>,
}

impl PairResult {
    pub fn ok(video_path: &str, audio_path: &str, start_ms: f64, end_ms: f64) -> Self {
        Self {
            video_path: video_path.to_string(),
            audio_path: audio_path.to_string(),
            start_delay_ms: Some(start_ms),
            end_delay_ms: Some(end_ms),
            error: None,
        }
    }

    /// A failed or partial result; `start_ms` carries any delay that was
    /// already measured before the failure.
    pub fn failure(
        video_path: &str,
        audio_path: &str,
        start_ms: Option<f64>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            video_path: video_path.to_string(),
            audio_path: audio_path.to_string(),
            start_delay_ms: start_ms,
            end_delay_ms: None,
            error: Some(message.into()),
        }
    }
}

/// Categorical agreement between the start and end measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Derived from the divergence between the two measured delays.
    pub fn from_delays(start_ms: f64, end_ms: f64) -> Self {
        let diff = (start_ms - end_ms).abs();
        if diff < HIGH_CONFIDENCE_MS {
            Confidence::High
        } else if diff < MEDIUM_CONFIDENCE_MS {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
        }
    }
}

// ---------------------------------------------------------------------------
//  Requests
// ---------------------------------------------------------------------------

/// Request object received on stdin in host-driven mode.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub mode: String,

    #[serde(default)]
    pub video_folder: Option<String>,

    /// Single reference audio (movie mode).
    #[serde(default)]
    pub audio_file: Option<String>,

    /// Explicit video list; overrides the folder scan.
    #[serde(default)]
    pub video_files: Option<Vec<String>>,

    #[serde(default)]
    pub audio_folder: Option<String>,

    #[serde(default)]
    pub match_pattern: Option<String>,

    #[serde(default = "default_segment_duration")]
    pub segment_duration: f64,
}

fn default_segment_duration() -> f64 {
    DEFAULT_SEGMENT_SEC
}

/// Engine configuration — constructed once and carried by the [`Engine`].
///
/// [`Engine`]: crate::engine::Engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub segment_sec: f64,
    pub match_pattern: Option<String>,
    pub fingerprint_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            segment_sec: DEFAULT_SEGMENT_SEC,
            match_pattern: None,
            fingerprint_threshold: FINGERPRINT_THRESHOLD,
        }
    }
}

// ---------------------------------------------------------------------------
//  Errors
// ---------------------------------------------------------------------------

/// Internal failure of the enhanced analyzer. The job pool catches this and
/// retries the pair with the basic start/end analyzer.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("cross-correlation produced a non-finite delay")]
    NonFinite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_thresholds() {
        assert_eq!(Confidence::from_delays(100.0, 120.0), Confidence::High);
        assert_eq!(Confidence::from_delays(0.0, 49.9), Confidence::High);
        assert_eq!(Confidence::from_delays(0.0, 50.0), Confidence::Medium);
        assert_eq!(Confidence::from_delays(-200.0, 250.0), Confidence::Medium);
        assert_eq!(Confidence::from_delays(0.0, 500.0), Confidence::Low);
        assert_eq!(Confidence::from_delays(1000.0, -1000.0), Confidence::Low);
    }

    #[test]
    fn test_pair_result_ok() {
        let r = PairResult::ok("a.mp4", "b.wav", 250.0, 251.2);
        assert_eq!(r.start_delay_ms, Some(250.0));
        assert_eq!(r.end_delay_ms, Some(251.2));
        assert!(r.error.is_none());
    }

    #[test]
    fn test_pair_result_failure_keeps_start() {
        let r = PairResult::failure("a.mp4", "b.wav", Some(10.0), "Failed to load end segment.");
        assert_eq!(r.start_delay_ms, Some(10.0));
        assert!(r.end_delay_ms.is_none());
        assert!(r.error.as_deref().unwrap().contains("end"));
    }

    #[test]
    fn test_batch_request_defaults() {
        let req: BatchRequest =
            serde_json::from_str(r#"{"mode": "movie", "audio_file": "ref.wav"}"#).unwrap();
        assert_eq!(req.mode, "movie");
        assert_eq!(req.segment_duration, DEFAULT_SEGMENT_SEC);
        assert!(req.video_folder.is_none());
        assert!(req.video_files.is_none());
    }

    #[test]
    fn test_segment_tag_strings() {
        assert_eq!(SegmentTag::Start.as_str(), "start");
        assert_eq!(SegmentTag::Fingerprint.as_str(), "fingerprint");
    }
}
