//! AudioDelay Core — audio/video delay measurement engine.
//!
//! Measures the millisecond offset between the audio track of a video
//! container and a separately supplied reference audio track, at both the
//! start and the end of each file pair. Divergence between the two
//! measurements signals drift or mismatched content.
//!
//! This crate provides:
//! - **models**: Data structures (PairResult, Confidence, BatchRequest).
//! - **decode**: Segment acquisition via hound/symphonia + ffmpeg pipe,
//!   mono downmix, resampling.
//! - **probe**: File duration via container metadata, ffprobe, or decode.
//! - **cache**: Content-addressed on-disk cache of windowed segments.
//! - **engine**: Energy windowing, FFT cross-correlation, the start/mid/end
//!   pair-analysis protocol with duration reconciliation.
//! - **fingerprint**: MFCC + spectral-contrast fingerprints and
//!   content-based video↔audio matching.
//! - **pairing**: Filename-pattern pairing for series folders.
//! - **pool**: Parallel batch execution with progress events.
//! - **events**: Newline-delimited JSON event stream for host processes.

pub mod models;
pub mod events;
pub mod decode;
pub mod probe;
pub mod cache;
pub mod engine;
pub mod fingerprint;
pub mod pairing;
pub mod pool;

// Re-export key types for convenience.
pub use models::*;
