//! Job pool — resolve a request into file pairs and analyze them across
//! worker threads.
//!
//! One task per pair, dispatched on a rayon pool sized to the available
//! parallelism. Completion order is nondeterministic; the `done` event
//! carries the aggregate in completion order and the presentation layer
//! sorts if it wants to. There is no cancellation: completion is the only
//! terminal state.

use anyhow::bail;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::decode::{is_movie_scan_file, is_series_audio_file};
use crate::engine::{analyze_pair, analyze_pair_basic, Engine};
use crate::events::basename;
use crate::fingerprint::match_by_fingerprint;
use crate::models::{BatchRequest, PairResult};
use crate::pairing::match_file_pairs;

// ---------------------------------------------------------------------------
//  Input resolution
// ---------------------------------------------------------------------------

/// Video list for movie mode: the explicit list when given, otherwise a
/// folder scan over the video extensions.
pub fn list_movie_videos(video_folder: Option<&str>, explicit: &[String]) -> Vec<String> {
    if !explicit.is_empty() {
        return explicit.to_vec();
    }
    match video_folder {
        Some(folder) => list_files(folder, is_movie_scan_file),
        None => Vec::new(),
    }
}

/// Audio candidates for the series fingerprint fallback: pure-audio
/// extensions plus the video set (a video container can carry the
/// reference track).
pub fn list_series_audio(audio_folder: &str) -> Vec<String> {
    list_files(audio_folder, is_series_audio_file)
}

fn list_files(folder: &str, keep: fn(&str) -> bool) -> Vec<String> {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut files: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| e.path().to_string_lossy().to_string())
        .filter(|p| keep(p))
        .collect();
    files.sort();
    files
}

// ---------------------------------------------------------------------------
//  Batch execution
// ---------------------------------------------------------------------------

/// Run one host request to completion. `Err` only for an unknown mode —
/// everything else, including a batch where every pair fails, finishes
/// with a `done` event and exit status success.
pub fn run_request(engine: &Engine, request: &BatchRequest) -> anyhow::Result<Vec<PairResult>> {
    match request.mode.as_str() {
        "movie" => Ok(run_movie(engine, request)),
        "series" => Ok(run_series(engine, request)),
        other => bail!("Unknown mode: {}", other),
    }
}

fn run_movie(engine: &Engine, request: &BatchRequest) -> Vec<PairResult> {
    let audio_file = match &request.audio_file {
        Some(audio) => audio.clone(),
        None => {
            engine.events.done(&[]);
            return Vec::new();
        }
    };

    let explicit = request.video_files.clone().unwrap_or_default();
    if request.video_folder.is_none() && explicit.is_empty() {
        engine.events.done(&[]);
        return Vec::new();
    }

    let videos = list_movie_videos(request.video_folder.as_deref(), &explicit);
    if videos.is_empty() {
        engine.events.done(&[]);
        return Vec::new();
    }

    engine
        .events
        .log(&format!("Movie mode: {} video files queued.", videos.len()));
    engine
        .events
        .log(&format!("Audio file: {}", basename(&audio_file)));

    let pairs: Vec<(String, String)> = videos
        .into_iter()
        .map(|video| (video, audio_file.clone()))
        .collect();
    run_pairs(engine, &pairs)
}

fn run_series(engine: &Engine, request: &BatchRequest) -> Vec<PairResult> {
    let (video_folder, audio_folder) = match (&request.video_folder, &request.audio_folder) {
        (Some(v), Some(a)) => (v.clone(), a.clone()),
        _ => {
            engine.events.done(&[]);
            return Vec::new();
        }
    };

    let match_pattern = request
        .match_pattern
        .as_deref()
        .or(engine.config.match_pattern.as_deref());
    let mut pairs = match_file_pairs(&video_folder, &audio_folder, match_pattern);

    if pairs.is_empty() {
        engine
            .events
            .log("No matching file pairs found by name. Falling back to fingerprint matching.");
        let videos = list_movie_videos(Some(&video_folder), &[]);
        let audios = list_series_audio(&audio_folder);
        pairs = match_by_fingerprint(engine, &videos, &audios);

        if pairs.is_empty() {
            engine.events.log("No matching file pairs found.");
            engine.events.done(&[]);
            return Vec::new();
        }
    }

    engine
        .events
        .log(&format!("Series mode: matched {} file pairs.", pairs.len()));
    engine.events.log(&format!("Video folder: {}", video_folder));
    engine.events.log(&format!("Audio folder: {}", audio_folder));
    if let Some(pattern) = match_pattern {
        engine.events.log(&format!("Match pattern: {}", pattern));
    }

    run_pairs(engine, &pairs)
}

/// Analyze every pair on the worker pool, publishing per-file and overall
/// progress as tasks complete. Every submitted pair appears exactly once
/// in the returned aggregate (and in the `done` event).
pub fn run_pairs(engine: &Engine, pairs: &[(String, String)]) -> Vec<PairResult> {
    let total = pairs.len();
    let processed = AtomicUsize::new(0);
    let aggregate: Mutex<Vec<PairResult>> = Mutex::new(Vec::with_capacity(total));

    pairs.par_iter().for_each(|(primary, secondary)| {
        let events = &engine.events;
        events.file_start(primary);
        events.file_progress(primary, 0);
        let started = Instant::now();

        let result = match analyze_pair(engine, primary, secondary) {
            Ok(result) => result,
            Err(e) => {
                events.log(&format!(
                    "Enhanced analysis failed for {}: {}",
                    basename(primary),
                    e
                ));
                analyze_pair_basic(engine, primary, secondary)
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        events.file_progress(primary, 100);
        events.file_end(primary, elapsed_ms);

        let count = processed.fetch_add(1, Ordering::SeqCst) + 1;
        events.progress(count, total, primary);
        events.result(&result, elapsed_ms);

        let mut guard = match aggregate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(result);
    });

    let results = aggregate.into_inner().unwrap_or_default();
    engine.events.done(&results);
    results
}
