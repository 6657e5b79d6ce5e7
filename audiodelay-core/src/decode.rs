//! Decoder gateway — acquire mono f32 segments from any media container.
//!
//! Strategy ladder:
//! 1. WAV: hound with a sample-accurate seek.
//! 2. Other pure-audio containers (and WAV failures): symphonia, decoding
//!    from the start and slicing the requested frame range.
//! 3. Video containers, or any native failure: spawn ffmpeg and read raw
//!    s16le mono PCM at the target rate from its stdout pipe.
//! 4. If ffmpeg reports a missing video stream for a video-looking
//!    extension, the container holds only audio — retry the native path.

use anyhow::{anyhow, Context, Result};
use log::debug;
use rubato::{FftFixedIn, Resampler};
use std::path::Path;
use std::process::Command;

use crate::events::EventSink;

// ---------------------------------------------------------------------------
//  File type detection
// ---------------------------------------------------------------------------

/// Extensions dispatched to the external transcoder first.
pub const TRANSCODER_EXTENSIONS: &[&str] = &[
    ".mp4", ".mkv", ".webm", ".avi", ".mov", ".eac3", ".ac3",
];

/// Extensions scanned for videos in movie (batch) mode.
pub const MOVIE_SCAN_EXTENSIONS: &[&str] = &[".mp4", ".mkv", ".webm", ".avi", ".mov"];

/// Extensions scanned on the audio side in series mode, in addition to the
/// transcoder set.
pub const SERIES_AUDIO_EXTENSIONS: &[&str] = &[
    ".wav", ".mp3", ".aac", ".flac", ".ogg", ".m4a", ".eac3", ".ac3",
];

fn dot_ext(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

pub fn is_transcoder_file(path: &str) -> bool {
    TRANSCODER_EXTENSIONS.contains(&dot_ext(path).as_str())
}

pub fn is_movie_scan_file(path: &str) -> bool {
    MOVIE_SCAN_EXTENSIONS.contains(&dot_ext(path).as_str())
}

pub fn is_series_audio_file(path: &str) -> bool {
    let ext = dot_ext(path);
    SERIES_AUDIO_EXTENSIONS.contains(&ext.as_str())
        || TRANSCODER_EXTENSIONS.contains(&ext.as_str())
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

// ---------------------------------------------------------------------------
//  Public API
// ---------------------------------------------------------------------------

/// Load a mono f32 segment at `target_sr` from `[offset, offset+duration)`
/// seconds of `path` (to end of file when `duration` is `None`).
///
/// Returns `None` on unrecoverable decode failure, after emitting a log
/// event; a missing ffmpeg binary fails this call, not the batch.
pub fn load(
    events: &EventSink,
    path: &str,
    target_sr: u32,
    duration: Option<f64>,
    offset: f64,
) -> Option<Vec<f32>> {
    if !is_transcoder_file(path) {
        match load_native_audio(path, target_sr, duration, offset) {
            Ok(samples) => return Some(samples),
            Err(e) => {
                events.log(&format!(
                    "Warning: direct decode failed for {}: {}. Trying FFmpeg.",
                    basename(path),
                    e
                ));
            }
        }
    }

    match load_via_transcoder(path, target_sr, duration, offset) {
        TranscodeOutcome::Decoded(samples) => Some(samples),
        TranscodeOutcome::NoVideoStream => {
            // Video-looking container with an audio-only payload.
            match load_native_audio(path, target_sr, duration, offset) {
                Ok(samples) => Some(samples),
                Err(e) => {
                    events.log(&format!(
                        "Error: could not decode audio-only container {}: {}",
                        basename(path),
                        e
                    ));
                    None
                }
            }
        }
        TranscodeOutcome::MissingBinary => {
            events.log("Error: FFmpeg not found. Please ensure it's in your system's PATH.");
            None
        }
        TranscodeOutcome::Failed(msg) => {
            events.log(&format!("Error: FFmpeg failed for {}: {}", basename(path), msg));
            None
        }
    }
}

// ---------------------------------------------------------------------------
//  Native decoding
// ---------------------------------------------------------------------------

fn load_native_audio(
    path: &str,
    target_sr: u32,
    duration: Option<f64>,
    offset: f64,
) -> Result<Vec<f32>> {
    if dot_ext(path) == ".wav" {
        match load_wav_segment(path, target_sr, duration, offset) {
            Ok(samples) => return Ok(samples),
            Err(e) => debug!("WAV fast path failed for {}: {}", path, e),
        }
    }
    load_symphonia_segment(path, target_sr, duration, offset)
}

/// WAV fast path: seek straight to the requested frame.
fn load_wav_segment(
    path: &str,
    target_sr: u32,
    duration: Option<f64>,
    offset: f64,
) -> Result<Vec<f32>> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("Cannot open WAV: {}", path))?;
    let spec = reader.spec();
    let native_sr = spec.sample_rate;
    let channels = spec.channels as u32;

    let start_frame = (offset * native_sr as f64).round() as u32;
    reader
        .seek(start_frame)
        .with_context(|| format!("Cannot seek to {:.3}s in {}", offset, path))?;

    let max_samples = duration
        .map(|d| (d * native_sr as f64).round() as usize * channels as usize)
        .unwrap_or(usize::MAX);

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .take(max_samples)
            .filter_map(|s| s.ok())
            .collect(),
        hound::SampleFormat::Int => {
            let max_val = (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .take(max_samples)
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / max_val)
                .collect()
        }
    };

    let mono = to_mono(&interleaved, channels);
    resample_mono(&mono, native_sr, target_sr)
}

/// Generic native path: decode from the start and keep only the frames in
/// `[offset, offset+duration)`. No container seek — robust for formats
/// where seeking is unreliable.
fn load_symphonia_segment(
    path: &str,
    target_sr: u32,
    duration: Option<f64>,
    offset: f64,
) -> Result<Vec<f32>> {
    use symphonia::core::audio::{AudioBufferRef, Signal};
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let file =
        std::fs::File::open(path).with_context(|| format!("Cannot open file: {}", path))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("Cannot probe format: {}", path))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("No audio track in {}", path))?;
    let codec_params = track.codec_params.clone();
    let native_sr = codec_params.sample_rate.unwrap_or(48000);
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .with_context(|| format!("Cannot create decoder for {}", path))?;

    let start_frame = (offset * native_sr as f64).round() as u64;
    let end_frame = duration.map(|d| start_frame + (d * native_sr as f64).round() as u64);

    let mut mono: Vec<f32> = Vec::new();
    let mut seen: u64 = 0;

    'packets: loop {
        match format.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                match decoder.decode(&packet) {
                    Ok(buf) => {
                        let ch = buf.spec().channels.count();
                        let frames = buf.frames() as u64;
                        let lo = start_frame.saturating_sub(seen).min(frames) as usize;
                        let hi = match end_frame {
                            Some(end) => end.saturating_sub(seen).min(frames) as usize,
                            None => frames as usize,
                        };

                        if lo < hi {
                            match buf {
                                AudioBufferRef::F32(ref b) => {
                                    push_mono_frames(&mut mono, ch, lo, hi, |fr, c| {
                                        b.chan(c)[fr]
                                    });
                                }
                                AudioBufferRef::S32(ref b) => {
                                    let scale = 1.0 / i32::MAX as f32;
                                    push_mono_frames(&mut mono, ch, lo, hi, |fr, c| {
                                        b.chan(c)[fr] as f32 * scale
                                    });
                                }
                                AudioBufferRef::S16(ref b) => {
                                    let scale = 1.0 / i16::MAX as f32;
                                    push_mono_frames(&mut mono, ch, lo, hi, |fr, c| {
                                        b.chan(c)[fr] as f32 * scale
                                    });
                                }
                                AudioBufferRef::U8(ref b) => {
                                    push_mono_frames(&mut mono, ch, lo, hi, |fr, c| {
                                        (b.chan(c)[fr] as f32 - 128.0) / 128.0
                                    });
                                }
                                _ => {
                                    debug!("Unsupported sample format, skipping packet");
                                }
                            }
                        }

                        seen += frames;
                        if end_frame.is_some_and(|end| seen >= end) {
                            break 'packets;
                        }
                    }
                    Err(symphonia::core::errors::Error::DecodeError(msg)) => {
                        debug!("Decode error (skipping): {}", msg);
                        continue;
                    }
                    Err(e) => return Err(anyhow!("Decode error in {}: {}", path, e)),
                }
            }
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                debug!("Format read ended: {}", e);
                break;
            }
        }
    }

    if mono.is_empty() && start_frame > 0 && seen <= start_frame {
        return Err(anyhow!(
            "Requested offset {:.1}s is past the end of {}",
            offset,
            path
        ));
    }

    resample_mono(&mono, native_sr, target_sr)
}

/// Average one frame range across channels into `out`.
fn push_mono_frames<F>(out: &mut Vec<f32>, channels: usize, lo: usize, hi: usize, sample: F)
where
    F: Fn(usize, usize) -> f32,
{
    let ch = channels.max(1);
    out.reserve(hi - lo);
    for frame in lo..hi {
        let sum: f32 = (0..ch).map(|c| sample(frame, c)).sum();
        out.push(sum / ch as f32);
    }
}

// ---------------------------------------------------------------------------
//  External transcoder
// ---------------------------------------------------------------------------

enum TranscodeOutcome {
    Decoded(Vec<f32>),
    /// The container has no video stream — its audio decodes natively.
    NoVideoStream,
    MissingBinary,
    Failed(String),
}

/// Decode through ffmpeg: optional pre-input seek, drop video, raw s16le
/// mono PCM at the target rate on stdout.
fn load_via_transcoder(
    path: &str,
    target_sr: u32,
    duration: Option<f64>,
    offset: f64,
) -> TranscodeOutcome {
    let mut cmd = Command::new("ffmpeg");
    if offset > 0.0 {
        cmd.args(["-ss", &offset.to_string()]);
    }
    cmd.args(["-i", path]);
    if let Some(d) = duration {
        cmd.args(["-t", &d.to_string()]);
    }
    cmd.args([
        "-vn",
        "-f", "s16le",
        "-acodec", "pcm_s16le",
        "-ar", &target_sr.to_string(),
        "-ac", "1",
        "-",
    ]);

    let output = match cmd.output() {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return TranscodeOutcome::MissingBinary;
        }
        Err(e) => return TranscodeOutcome::Failed(e.to_string()),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.to_lowercase().contains("video stream") && is_transcoder_file(path) {
            return TranscodeOutcome::NoVideoStream;
        }
        let tail: String = stderr
            .lines()
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n");
        return TranscodeOutcome::Failed(tail);
    }

    let samples: Vec<f32> = output
        .stdout
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();

    TranscodeOutcome::Decoded(samples)
}

// ---------------------------------------------------------------------------
//  Downmix & resampling
// ---------------------------------------------------------------------------

/// Collapse interleaved frames to mono by averaging the channels.
pub fn to_mono(samples: &[f32], channels: u32) -> Vec<f32> {
    let ch = channels.max(1) as usize;
    if ch == 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Resample mono audio with rubato's FFT resampler. The input is fed in
/// fixed-size chunks (the final one zero-padded via a reused scratch
/// buffer) and the output trimmed to the exact ratio-scaled length.
pub fn resample_mono(data: &[f32], source_sr: u32, target_sr: u32) -> Result<Vec<f32>> {
    if source_sr == target_sr || data.is_empty() {
        return Ok(data.to_vec());
    }

    const CHUNK: usize = 1024;
    let mut resampler =
        FftFixedIn::<f32>::new(source_sr as usize, target_sr as usize, CHUNK, 2, 1)
            .map_err(|e| anyhow!("Failed to create resampler: {}", e))?;

    let expected =
        (data.len() as f64 * target_sr as f64 / source_sr as f64).round() as usize;
    let mut output = Vec::with_capacity(expected + CHUNK);
    let mut scratch = vec![0.0f32; CHUNK];

    for chunk in data.chunks(CHUNK) {
        let input: &[f32] = if chunk.len() == CHUNK {
            chunk
        } else {
            scratch[..chunk.len()].copy_from_slice(chunk);
            scratch[chunk.len()..].fill(0.0);
            &scratch
        };
        let frames = resampler
            .process(&[input], None)
            .map_err(|e| anyhow!("Resampling failed: {}", e))?;
        output.extend_from_slice(&frames[0]);
    }

    output.truncate(expected);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcoder_extensions() {
        assert!(is_transcoder_file("movie.mp4"));
        assert!(is_transcoder_file("path/to/Movie.MKV"));
        assert!(is_transcoder_file("track.eac3"));
        assert!(is_transcoder_file("track.ac3"));
        assert!(!is_transcoder_file("track.wav"));
        assert!(!is_transcoder_file("track.flac"));
        assert!(!is_transcoder_file(""));
    }

    #[test]
    fn test_scan_extensions() {
        assert!(is_movie_scan_file("a.webm"));
        assert!(!is_movie_scan_file("a.ac3"));
        assert!(is_series_audio_file("a.m4a"));
        assert!(is_series_audio_file("a.mkv"));
        assert!(!is_series_audio_file("a.txt"));
    }

    #[test]
    fn test_to_mono_passthrough() {
        let samples = vec![0.5f32, -0.5, 0.3, -0.3];
        let mono = to_mono(&samples, 1);
        assert_eq!(mono.len(), 4);
        assert!((mono[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_to_mono_stereo() {
        // Interleaved stereo: [L, R, L, R, ...]
        let samples = vec![1.0f32, 0.0, 0.0, 1.0, 0.5, 0.5];
        let mono = to_mono(&samples, 2);
        assert_eq!(mono.len(), 3);
        assert!((mono[0] - 0.5).abs() < 1e-6);
        assert!((mono[1] - 0.5).abs() < 1e-6);
        assert!((mono[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_resample_mono_same_rate() {
        let data = vec![1.0f32, 2.0, 3.0, 4.0];
        let result = resample_mono(&data, 8000, 8000).unwrap();
        assert_eq!(result.len(), data.len());
    }

    #[test]
    fn test_resample_mono_halves_length() {
        let data: Vec<f32> = (0..16000).map(|i| (i as f32 * 0.01).sin()).collect();
        let result = resample_mono(&data, 16000, 8000).unwrap();
        assert_eq!(result.len(), 8000);
    }

    #[test]
    fn test_wav_segment_offset_and_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..24000 {
            let v = ((i as f32 * 0.07).sin() * 12000.0) as i16;
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();
        let path = path.to_string_lossy().to_string();

        // 1s from offset 1s at the native rate
        let seg = load_wav_segment(&path, 8000, Some(1.0), 1.0).unwrap();
        assert_eq!(seg.len(), 8000);

        // Open-ended read from 2s: exactly the last second remains
        let tail = load_wav_segment(&path, 8000, None, 2.0).unwrap();
        assert_eq!(tail.len(), 8000);

        // Duration clamped by end of file
        let clamped = load_wav_segment(&path, 8000, Some(10.0), 2.5).unwrap();
        assert_eq!(clamped.len(), 4000);
    }

    #[test]
    fn test_symphonia_segment_matches_wav_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..16000 {
            let v = ((i as f32 * 0.03).sin() * 9000.0) as i16;
            writer.write_sample(v).unwrap(); // L
            writer.write_sample(v / 2).unwrap(); // R
        }
        writer.finalize().unwrap();
        let path = path.to_string_lossy().to_string();

        let a = load_wav_segment(&path, 8000, Some(1.0), 0.5).unwrap();
        let b = load_symphonia_segment(&path, 8000, Some(1.0), 0.5).unwrap();
        assert_eq!(a.len(), 8000);
        assert_eq!(b.len(), 8000);
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-3, "paths diverged: {} vs {}", x, y);
        }
    }
}
