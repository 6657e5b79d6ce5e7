//! Delay-measurement engine — energy windowing, FFT cross-correlation, and
//! the start/mid/end pair-analysis protocol.
//!
//! All measurement runs at 8 kHz mono. Per pair:
//! 1. Correlate the opening segments of both files (start delay).
//! 2. Correlate a mid-file segment for diagnostics only.
//! 3. Correlate the closing segments and reconcile the raw lag with the
//!    duration difference (end delay).
//! The divergence between start and end delay is the caller's confidence
//! signal that the pair shares one global shift.

use log::debug;
use rustfft::{num_complex::Complex, FftPlanner};
use std::sync::Arc;

use crate::cache::{AcquisitionKey, SegmentCache};
use crate::decode;
use crate::events::{basename, EventSink};
use crate::models::{
    AnalysisError, EngineConfig, PairResult, SegmentTag, MAX_WINDOW_SEC, MEASURE_SR,
};
use crate::probe;

// ---------------------------------------------------------------------------
//  Engine
// ---------------------------------------------------------------------------

/// Owns the configuration, the segment cache, and the event sink, and is
/// passed through the pipeline — no process-global state.
pub struct Engine {
    pub config: EngineConfig,
    pub cache: SegmentCache,
    pub events: Arc<EventSink>,
}

impl Engine {
    pub fn new(config: EngineConfig, cache: SegmentCache, events: Arc<EventSink>) -> Self {
        Self {
            config,
            cache,
            events,
        }
    }

    fn window_sec(&self) -> f64 {
        MAX_WINDOW_SEC.min(self.config.segment_sec)
    }

    /// Acquire a decoded, energy-windowed segment through the cache.
    ///
    /// The cache stores the windowed buffer — exactly what the estimator
    /// consumes — so repeat runs skip both decode and windowing.
    pub fn acquire_segment(
        &self,
        path: &str,
        duration: Option<f64>,
        offset: f64,
        tag: SegmentTag,
    ) -> Option<Vec<f32>> {
        let key = AcquisitionKey::new(path, MEASURE_SR, duration, offset, tag);
        if let Some(cached) = self.cache.get(&key) {
            debug!("Cache hit for {} ({})", path, tag.as_str());
            return Some(cached);
        }

        let raw = decode::load(&self.events, path, MEASURE_SR, duration, offset)?;
        let windowed = select_high_energy_window(&raw, MEASURE_SR, self.window_sec());
        self.cache.put(&key, &windowed);
        Some(windowed)
    }
}

// ---------------------------------------------------------------------------
//  Energy windowing
// ---------------------------------------------------------------------------

/// Select the `window_sec`-long sub-range with the highest short-time RMS
/// energy. Cross-correlation on loud content is far more discriminative
/// than on silence or room tone, and the bounded window caps FFT cost.
pub fn select_high_energy_window(y: &[f32], sr: u32, window_sec: f64) -> Vec<f32> {
    let window_len = ((window_sec * sr as f64) as usize).max(1);
    if y.len() <= window_len {
        return y.to_vec();
    }

    // 50 ms frames on a 25 ms hop.
    let frame = (0.05 * sr as f64) as usize;
    let hop = (0.025 * sr as f64) as usize;
    if frame == 0 || hop == 0 {
        return y[..window_len].to_vec();
    }

    let rms = short_time_rms(y, frame, hop);
    if rms.is_empty() {
        return y[..window_len].to_vec();
    }

    let hop_sec = hop as f64 / sr as f64;
    let window_frames = ((window_sec / hop_sec) as usize).max(1);

    let idx = if rms.len() < window_frames {
        argmax(&rms)
    } else {
        // Sliding sum of `window_frames` consecutive RMS values.
        let mut prefix = Vec::with_capacity(rms.len() + 1);
        prefix.push(0.0f64);
        for &v in &rms {
            prefix.push(prefix.last().unwrap() + v as f64);
        }
        let sums: Vec<f64> = (0..=rms.len() - window_frames)
            .map(|i| prefix[i + window_frames] - prefix[i])
            .collect();
        argmax(&sums)
    };

    let start = idx * hop;
    let end = (start + window_len).min(y.len());
    y[start..end].to_vec()
}

fn short_time_rms(y: &[f32], frame: usize, hop: usize) -> Vec<f32> {
    let mut rms = Vec::new();
    let mut pos = 0;
    while pos + frame <= y.len() {
        let energy: f64 = y[pos..pos + frame].iter().map(|&x| (x as f64) * (x as f64)).sum();
        rms.push((energy / frame as f64).sqrt() as f32);
        pos += hop;
    }
    rms
}

fn argmax<T: PartialOrd + Copy>(values: &[T]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

// ---------------------------------------------------------------------------
//  Cross-correlation estimator
// ---------------------------------------------------------------------------

/// Estimate the delay of `secondary` relative to `primary` in milliseconds
/// via FFT cross-correlation of the mean/std-normalized inputs.
///
/// The lag is `argmax − (len(secondary) − 1)`, so the sign follows the
/// correlation protocol: a secondary whose content occurs *earlier* than
/// the primary's produces a positive lag. Both inputs must share length
/// (the caller truncates to the common minimum); non-finite output means
/// the estimate is unusable and is treated as absent by callers.
pub fn estimate_offset_ms(primary: &[f32], secondary: &[f32], sr: u32) -> f64 {
    if primary.is_empty() || secondary.is_empty() {
        return f64::NAN;
    }

    let p = normalize(primary);
    let s = normalize(secondary);

    let corr = fft_correlate(&p, &s);
    if corr.is_empty() {
        return f64::NAN;
    }

    let peak = argmax(&corr);
    if !corr[peak].is_finite() {
        return f64::NAN;
    }

    let lag = peak as i64 - (s.len() as i64 - 1);
    lag as f64 / sr as f64 * 1000.0
}

/// Subtract the mean; divide by the standard deviation when it is above
/// 1e-8 (all-silent inputs stay un-scaled).
fn normalize(y: &[f32]) -> Vec<f32> {
    let n = y.len() as f64;
    let mean = y.iter().map(|&x| x as f64).sum::<f64>() / n;
    let var = y.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();

    if std > 1e-8 {
        y.iter().map(|&x| ((x as f64 - mean) / std) as f32).collect()
    } else {
        y.iter().map(|&x| (x as f64 - mean) as f32).collect()
    }
}

/// FFT-based cross-correlation, equivalent to
/// `fftconvolve(primary, secondary[::-1], "full")`.
fn fft_correlate(primary: &[f32], secondary: &[f32]) -> Vec<f32> {
    let n = primary.len() + secondary.len() - 1;
    let fft_len = n.next_power_of_two();

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(fft_len);
    let ifft = planner.plan_fft_inverse(fft_len);

    let mut p_c: Vec<Complex<f32>> = primary.iter().map(|&x| Complex::new(x, 0.0)).collect();
    p_c.resize(fft_len, Complex::new(0.0, 0.0));

    // Reverse the secondary: convolution with the reversal is correlation.
    let mut s_c: Vec<Complex<f32>> = secondary
        .iter()
        .rev()
        .map(|&x| Complex::new(x, 0.0))
        .collect();
    s_c.resize(fft_len, Complex::new(0.0, 0.0));

    fft.process(&mut p_c);
    fft.process(&mut s_c);

    let mut product: Vec<Complex<f32>> = p_c
        .iter()
        .zip(s_c.iter())
        .map(|(a, b)| a * b)
        .collect();

    ifft.process(&mut product);

    let norm = 1.0 / fft_len as f32;
    product.iter().take(n).map(|c| c.re * norm).collect()
}

// ---------------------------------------------------------------------------
//  Pair analysis
// ---------------------------------------------------------------------------

/// Raw tail lag conflates the true offset with the length difference:
/// `end_raw = offset − (D_p − D_s)`, so adding the duration difference
/// recovers the offset measured at the start.
pub fn reconcile_end_delay(end_raw_ms: f64, primary_duration_s: f64, secondary_duration_s: f64) -> f64 {
    end_raw_ms + (primary_duration_s - secondary_duration_s) * 1000.0
}

/// Enhanced analyzer: cached, energy-windowed segments at start, middle,
/// and end. `Err` is an internal failure — the job pool retries the pair
/// with [`analyze_pair_basic`].
pub fn analyze_pair(
    engine: &Engine,
    primary: &str,
    secondary: &str,
) -> Result<PairResult, AnalysisError> {
    let sr = MEASURE_SR as usize;
    let segment = engine.config.segment_sec;

    // --- Start ---
    let start_p = engine.acquire_segment(primary, Some(segment), 0.0, SegmentTag::Start);
    let start_s = engine.acquire_segment(secondary, Some(segment), 0.0, SegmentTag::Start);
    let (start_p, start_s) = match (start_p, start_s) {
        (Some(p), Some(s)) => (p, s),
        _ => {
            return Ok(PairResult::failure(
                primary,
                secondary,
                None,
                "Failed to load start segment.",
            ));
        }
    };

    let min_len = start_p.len().min(start_s.len());
    if min_len <= sr {
        return Ok(PairResult::failure(
            primary,
            secondary,
            None,
            "Insufficient audio at start for analysis.",
        ));
    }
    let start_delay = finite(estimate_offset_ms(
        &start_p[..min_len],
        &start_s[..min_len],
        MEASURE_SR,
    ))?;

    // --- Durations ---
    let (d_p, d_s) = match (probe::duration(primary), probe::duration(secondary)) {
        (Some(p), Some(s)) => (p, s),
        _ => {
            return Ok(PairResult::failure(
                primary,
                secondary,
                Some(start_delay),
                "Could not get duration for end analysis.",
            ));
        }
    };

    // --- Mid (diagnostic only) ---
    let mid_off_p = (d_p / 2.0 - segment / 2.0).max(0.0);
    let mid_off_s = (d_s / 2.0 - segment / 2.0).max(0.0);
    if let (Some(mid_p), Some(mid_s)) = (
        engine.acquire_segment(primary, Some(segment), mid_off_p, SegmentTag::Mid),
        engine.acquire_segment(secondary, Some(segment), mid_off_s, SegmentTag::Mid),
    ) {
        let min_len_mid = mid_p.len().min(mid_s.len());
        if min_len_mid > sr {
            let mid_delay =
                estimate_offset_ms(&mid_p[..min_len_mid], &mid_s[..min_len_mid], MEASURE_SR);
            if mid_delay.is_finite() {
                engine.events.log(&format!(
                    "Mid delay for {}: {:+.1}ms",
                    basename(primary),
                    mid_delay
                ));
            }
        }
    }

    // --- End ---
    let end_off_p = (d_p - segment).max(0.0);
    let end_off_s = (d_s - segment).max(0.0);
    let end_p = engine.acquire_segment(primary, Some(segment), end_off_p, SegmentTag::End);
    let end_s = engine.acquire_segment(secondary, Some(segment), end_off_s, SegmentTag::End);
    let (end_p, end_s) = match (end_p, end_s) {
        (Some(p), Some(s)) => (p, s),
        _ => {
            return Ok(PairResult::failure(
                primary,
                secondary,
                Some(start_delay),
                "Failed to load end segment.",
            ));
        }
    };

    let min_len_end = end_p.len().min(end_s.len());
    if min_len_end <= sr {
        return Ok(PairResult::failure(
            primary,
            secondary,
            Some(start_delay),
            "Insufficient audio at end for analysis.",
        ));
    }

    let end_raw = finite(estimate_offset_ms(
        &end_p[..min_len_end],
        &end_s[..min_len_end],
        MEASURE_SR,
    ))?;
    let end_delay = reconcile_end_delay(end_raw, d_p, d_s);

    Ok(PairResult::ok(primary, secondary, start_delay, end_delay))
}

/// Basic analyzer: start and end only, direct decoder loads — no cache,
/// no energy windowing. The fallback path when the enhanced analyzer
/// fails internally.
pub fn analyze_pair_basic(engine: &Engine, primary: &str, secondary: &str) -> PairResult {
    let sr = MEASURE_SR as usize;
    let segment = engine.config.segment_sec;
    let events = &engine.events;

    // --- Start ---
    let start_p = match decode::load(events, primary, MEASURE_SR, Some(segment), 0.0) {
        Some(y) => y,
        None => {
            return PairResult::failure(
                primary,
                secondary,
                None,
                format!("Failed to load start of primary: {}", basename(primary)),
            );
        }
    };
    let start_s = match decode::load(events, secondary, MEASURE_SR, Some(segment), 0.0) {
        Some(y) => y,
        None => {
            return PairResult::failure(
                primary,
                secondary,
                None,
                format!("Failed to load start of secondary: {}", basename(secondary)),
            );
        }
    };

    let min_len = start_p.len().min(start_s.len());
    if min_len <= sr {
        return PairResult::failure(
            primary,
            secondary,
            None,
            "Insufficient audio at start for analysis.",
        );
    }
    let start_delay = estimate_offset_ms(&start_p[..min_len], &start_s[..min_len], MEASURE_SR);
    if !start_delay.is_finite() {
        return PairResult::failure(
            primary,
            secondary,
            None,
            "Cross-correlation failed at start.",
        );
    }

    // --- Durations ---
    let (d_p, d_s) = match (probe::duration(primary), probe::duration(secondary)) {
        (Some(p), Some(s)) => (p, s),
        _ => {
            return PairResult::failure(
                primary,
                secondary,
                Some(start_delay),
                "Could not get duration for end analysis.",
            );
        }
    };

    // --- End ---
    let end_off_p = (d_p - segment).max(0.0);
    let end_off_s = (d_s - segment).max(0.0);
    let end_p = match decode::load(events, primary, MEASURE_SR, Some(segment), end_off_p) {
        Some(y) => y,
        None => {
            return PairResult::failure(
                primary,
                secondary,
                Some(start_delay),
                format!("Failed to load end of primary: {}", basename(primary)),
            );
        }
    };
    let end_s = match decode::load(events, secondary, MEASURE_SR, Some(segment), end_off_s) {
        Some(y) => y,
        None => {
            return PairResult::failure(
                primary,
                secondary,
                Some(start_delay),
                format!("Failed to load end of secondary: {}", basename(secondary)),
            );
        }
    };

    let min_len_end = end_p.len().min(end_s.len());
    if min_len_end <= sr {
        return PairResult::failure(
            primary,
            secondary,
            Some(start_delay),
            "Insufficient audio at end for analysis.",
        );
    }

    let end_raw = estimate_offset_ms(&end_p[..min_len_end], &end_s[..min_len_end], MEASURE_SR);
    if !end_raw.is_finite() {
        return PairResult::failure(
            primary,
            secondary,
            Some(start_delay),
            "Cross-correlation failed at end.",
        );
    }

    PairResult::ok(
        primary,
        secondary,
        start_delay,
        reconcile_end_delay(end_raw, d_p, d_s),
    )
}

fn finite(value: f64) -> Result<f64, AnalysisError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AnalysisError::NonFinite)
    }
}
