//! Duration oracle — playable length of a media file in seconds.
//!
//! Backends in order: container metadata via symphonia (no decode), an
//! ffprobe subprocess, and finally a full native decode counting frames.

use log::{debug, warn};
use std::path::Path;
use std::process::Command;

use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// First backend that produces a parseable duration wins; `None` when all
/// of them fail. Never fatal for the batch.
pub fn duration(path: &str) -> Option<f64> {
    if let Some(d) = container_duration(path) {
        debug!("duration (container): {:.3}s for {}", d, path);
        return Some(d);
    }

    if let Some(d) = ffprobe_duration(path) {
        debug!("duration (ffprobe): {:.3}s for {}", d, path);
        return Some(d);
    }

    if let Some(d) = decoded_duration(path) {
        debug!("duration (decode): {:.3}s for {}", d, path);
        return Some(d);
    }

    warn!("Could not get duration for {} with any method.", path);
    None
}

/// Read `n_frames` from the container metadata without decoding.
fn container_duration(path: &str) -> Option<f64> {
    let file = std::fs::File::open(path).ok()?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .ok()?;

    let track = probed.format.default_track()?;
    let sample_rate = track.codec_params.sample_rate?;
    let n_frames = track.codec_params.n_frames?;
    if sample_rate == 0 {
        return None;
    }
    Some(n_frames as f64 / sample_rate as f64)
}

/// `ffprobe -show_entries format=duration`, rejecting empty and "N/A".
fn ffprobe_duration(path: &str) -> Option<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-show_entries", "format=duration",
            "-of", "default=noprint_wrappers=1:nokey=1",
            path,
        ])
        .output()
        .ok()?;

    if !output.status.success() {
        debug!(
            "ffprobe failed for {}: {}",
            path,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let value = stdout.trim();
    if value.is_empty() || value == "N/A" {
        return None;
    }
    value.parse::<f64>().ok()
}

/// Last resort: decode the whole stream and count frames.
fn decoded_duration(path: &str) -> Option<f64> {
    let file = std::fs::File::open(path).ok()?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .ok()?;

    let mut format = probed.format;
    let track = format.default_track()?;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params.sample_rate.unwrap_or(48000);
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .ok()?;

    let mut frames: u64 = 0;
    loop {
        match format.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                match decoder.decode(&packet) {
                    Ok(buf) => frames += buf.frames() as u64,
                    Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
                    Err(_) => break,
                }
            }
            Err(_) => break,
        }
    }

    if frames == 0 {
        return None;
    }
    Some(frames as f64 / sample_rate as f64)
}
