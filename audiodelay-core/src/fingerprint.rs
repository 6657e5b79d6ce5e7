//! Content fingerprinting — pair video files to audio files when filename
//! matching fails.
//!
//! The fingerprint is a unit-norm spectral feature vector: per-coefficient
//! mean and standard deviation of 20 MFCCs and of the spectral-contrast
//! bands, computed over the energy-windowed opening segment at 8 kHz.
//! Pairing is maximum dot product (cosine similarity) above a threshold.

use log::debug;
use ndarray::{Array1, Array2};
use rustfft::{num_complex::Complex, FftPlanner};

use crate::engine::Engine;
use crate::events::basename;
use crate::models::{SegmentTag, MEASURE_SR};

/// Number of cepstral coefficients kept.
pub const N_MFCC: usize = 20;

/// Spectral-contrast rows: 6 octave bands above 200 Hz plus the sub-band.
pub const CONTRAST_ROWS: usize = 7;

const N_FFT: usize = 1024;
const HOP: usize = 256;
const N_MELS: usize = 40;
const CONTRAST_FMIN: f64 = 200.0;
const CONTRAST_QUANTILE: f64 = 0.02;

/// Unit-norm feature vector of length `2·N_MFCC + 2·CONTRAST_ROWS`.
#[derive(Debug, Clone)]
pub struct Fingerprint(Vec<f32>);

impl Fingerprint {
    /// Cosine similarity — a plain dot product, both vectors are unit norm.
    pub fn similarity(&self, other: &Fingerprint) -> f32 {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

// ---------------------------------------------------------------------------
//  Feature extraction
// ---------------------------------------------------------------------------

/// Compute the fingerprint of a sample buffer; `None` when the buffer is
/// too short for a single frame or the feature vector has zero norm.
pub fn compute_fingerprint(y: &[f32], sr: u32) -> Option<Fingerprint> {
    if y.len() < N_FFT {
        return None;
    }

    let spec = power_spectrogram(y);
    let n_frames = spec.nrows();
    if n_frames == 0 {
        return None;
    }

    let mel_fb = mel_filterbank(sr, N_FFT, N_MELS);
    let mut mfcc = Array2::<f32>::zeros((n_frames, N_MFCC));
    let mut contrast = Array2::<f32>::zeros((n_frames, CONTRAST_ROWS));

    for (i, frame) in spec.outer_iter().enumerate() {
        let mel_energies = mel_fb.dot(&frame);
        let coeffs = dct_ii(&mel_energies.mapv(|e| (e.max(1e-10)).ln()), N_MFCC);
        for (k, &c) in coeffs.iter().enumerate() {
            mfcc[[i, k]] = c;
        }

        let bands = band_contrast(frame.as_slice().unwrap(), sr);
        for (k, &c) in bands.iter().enumerate() {
            contrast[[i, k]] = c;
        }
    }

    let mut features = Vec::with_capacity(2 * N_MFCC + 2 * CONTRAST_ROWS);
    push_column_stats(&mut features, &mfcc);
    push_column_stats(&mut features, &contrast);

    let norm: f32 = features.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    for v in &mut features {
        *v /= norm;
    }
    Some(Fingerprint(features))
}

/// Mean followed by standard deviation of every column.
fn push_column_stats(out: &mut Vec<f32>, matrix: &Array2<f32>) {
    let n = matrix.nrows() as f64;
    let mut means = Vec::with_capacity(matrix.ncols());
    for col in matrix.columns() {
        means.push(col.iter().map(|&v| v as f64).sum::<f64>() / n);
    }
    for &m in &means {
        out.push(m as f32);
    }
    for (j, col) in matrix.columns().into_iter().enumerate() {
        let var = col.iter().map(|&v| (v as f64 - means[j]).powi(2)).sum::<f64>() / n;
        out.push(var.sqrt() as f32);
    }
}

/// Hann-windowed power spectrogram, one row per frame, `N_FFT/2 + 1` bins.
fn power_spectrogram(y: &[f32]) -> Array2<f32> {
    let n_bins = N_FFT / 2 + 1;
    let n_frames = (y.len() - N_FFT) / HOP + 1;

    let hann: Vec<f32> = (0..N_FFT)
        .map(|i| {
            let x = std::f32::consts::TAU * i as f32 / N_FFT as f32;
            0.5 * (1.0 - x.cos())
        })
        .collect();

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(N_FFT);

    let mut spec = Array2::<f32>::zeros((n_frames, n_bins));
    let mut buf = vec![Complex::new(0.0f32, 0.0); N_FFT];

    for frame in 0..n_frames {
        let start = frame * HOP;
        for (i, b) in buf.iter_mut().enumerate() {
            *b = Complex::new(y[start + i] * hann[i], 0.0);
        }
        fft.process(&mut buf);
        for bin in 0..n_bins {
            spec[[frame, bin]] = buf[bin].norm_sqr();
        }
    }

    spec
}

/// Triangular mel filterbank, HTK mel scale, `(N_MELS, N_FFT/2+1)`.
fn mel_filterbank(sr: u32, n_fft: usize, n_mels: usize) -> Array2<f32> {
    fn hz_to_mel(hz: f64) -> f64 {
        2595.0 * (1.0 + hz / 700.0).log10()
    }
    fn mel_to_hz(mel: f64) -> f64 {
        700.0 * (10f64.powf(mel / 2595.0) - 1.0)
    }

    let n_bins = n_fft / 2 + 1;
    let f_max = sr as f64 / 2.0;
    let mel_max = hz_to_mel(f_max);

    // n_mels + 2 equally spaced points on the mel scale.
    let points: Vec<f64> = (0..n_mels + 2)
        .map(|i| {
            let mel = mel_max * i as f64 / (n_mels + 1) as f64;
            mel_to_hz(mel) * n_fft as f64 / sr as f64
        })
        .collect();

    let mut fb = Array2::<f32>::zeros((n_mels, n_bins));
    for m in 0..n_mels {
        let (left, center, right) = (points[m], points[m + 1], points[m + 2]);
        for bin in 0..n_bins {
            let f = bin as f64;
            let weight = if f >= left && f <= center && center > left {
                (f - left) / (center - left)
            } else if f > center && f <= right && right > center {
                (right - f) / (right - center)
            } else {
                0.0
            };
            fb[[m, bin]] = weight as f32;
        }
    }
    fb
}

/// Orthonormal DCT-II of the log-mel energies, truncated to `n_out`.
fn dct_ii(log_mel: &Array1<f32>, n_out: usize) -> Vec<f32> {
    let m = log_mel.len();
    let mut out = Vec::with_capacity(n_out);
    for k in 0..n_out {
        let mut acc = 0.0f64;
        for (i, &v) in log_mel.iter().enumerate() {
            acc += v as f64
                * (std::f64::consts::PI * k as f64 * (i as f64 + 0.5) / m as f64).cos();
        }
        let scale = if k == 0 {
            (1.0 / m as f64).sqrt()
        } else {
            (2.0 / m as f64).sqrt()
        };
        out.push((acc * scale) as f32);
    }
    out
}

/// Per-band peak/valley log contrast for one power-spectrum frame.
///
/// Bands are octave-scaled from 200 Hz; the first row is the sub-200 Hz
/// band. Peak and valley are the mean of the top and bottom 2% quantile
/// magnitudes in each band.
fn band_contrast(frame: &[f32], sr: u32) -> Vec<f32> {
    let n_bins = frame.len();
    let bin_hz = sr as f64 / 2.0 / (n_bins - 1) as f64;

    let mut edges = Vec::with_capacity(CONTRAST_ROWS + 1);
    edges.push(0.0f64);
    for i in 0..CONTRAST_ROWS {
        edges.push((CONTRAST_FMIN * 2f64.powi(i as i32)).min(sr as f64 / 2.0));
    }

    let mut out = Vec::with_capacity(CONTRAST_ROWS);
    for band in 0..CONTRAST_ROWS {
        let lo = (edges[band] / bin_hz).floor() as usize;
        let hi = ((edges[band + 1] / bin_hz).ceil() as usize).min(n_bins);
        if hi <= lo {
            out.push(0.0);
            continue;
        }

        let mut mags: Vec<f32> = frame[lo..hi].iter().map(|&p| p.sqrt()).collect();
        mags.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let k = ((CONTRAST_QUANTILE * mags.len() as f64).round() as usize).max(1);

        let valley: f32 = mags[..k].iter().sum::<f32>() / k as f32;
        let peak: f32 = mags[mags.len() - k..].iter().sum::<f32>() / k as f32;
        out.push((peak + 1e-10).ln() - (valley + 1e-10).ln());
    }
    out
}

// ---------------------------------------------------------------------------
//  Matching
// ---------------------------------------------------------------------------

/// Fingerprint a file from its energy-windowed opening segment.
pub fn fingerprint_file(engine: &Engine, path: &str) -> Option<Fingerprint> {
    let y = engine.acquire_segment(
        path,
        Some(engine.config.segment_sec),
        0.0,
        SegmentTag::Fingerprint,
    )?;
    let fp = compute_fingerprint(&y, MEASURE_SR);
    if fp.is_none() {
        debug!("No usable fingerprint for {}", path);
    }
    fp
}

/// Pair each video with the audio of maximum similarity, keeping only
/// pairings at or above the engine's threshold. Audio fingerprints are
/// built once; the same audio may win multiple videos; unmatched videos
/// are logged and omitted.
pub fn match_by_fingerprint(
    engine: &Engine,
    video_files: &[String],
    audio_files: &[String],
) -> Vec<(String, String)> {
    let audio_fps: Vec<(String, Option<Fingerprint>)> = audio_files
        .iter()
        .map(|path| (path.clone(), fingerprint_file(engine, path)))
        .collect();

    let mut pairs = Vec::new();
    for video in video_files {
        let video_fp = fingerprint_file(engine, video);

        let mut best: Option<(&str, f32)> = None;
        for (audio_path, audio_fp) in &audio_fps {
            let score = match (&video_fp, audio_fp) {
                (Some(v), Some(a)) => v.similarity(a),
                _ => 0.0,
            };
            if best.is_none_or(|(_, b)| score > b) {
                best = Some((audio_path, score));
            }
        }

        match best {
            Some((audio_path, score)) if score >= engine.config.fingerprint_threshold => {
                engine.events.log(&format!(
                    "Fingerprint match: {} -> {} ({:.2})",
                    basename(video),
                    basename(audio_path),
                    score
                ));
                pairs.push((video.clone(), audio_path.to_string()));
            }
            _ => {
                engine.events.log(&format!(
                    "Fingerprint match below threshold for {}.",
                    basename(video)
                ));
            }
        }
    }
    pairs
}
