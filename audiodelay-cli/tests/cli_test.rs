//! CLI integration tests.
//!
//! Argument handling and exit codes run against the compiled binaries;
//! the end-to-end run uses 8 kHz WAV fixtures so no transcoder is needed.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

fn audiodelay_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_audiodelay"))
}

fn bridge_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_audiodelay-bridge"))
}

fn write_noise_wav(path: &Path, seconds: f64, seed: u64) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    for _ in 0..(seconds * 8000.0) as usize {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let v = (((state >> 33) as f64 / (1u64 << 31) as f64) - 1.0) * 0.5;
        writer.write_sample((v * 32767.0) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn test_version() {
    let output = audiodelay_bin()
        .arg("--version")
        .output()
        .expect("Failed to run audiodelay");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("audiodelay"), "got: {}", stdout);
}

#[test]
fn test_help_lists_modes_and_options() {
    let output = audiodelay_bin()
        .arg("--help")
        .output()
        .expect("Failed to run audiodelay");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--single"));
    assert!(stdout.contains("--batch"));
    assert!(stdout.contains("--series"));
    assert!(stdout.contains("--crosscorr_segment"));
    assert!(stdout.contains("--match_pattern"));
    assert!(stdout.contains("--output_csv"));
}

#[test]
fn test_mode_flag_is_required() {
    let output = audiodelay_bin()
        .args(["a.mkv", "b.wav"])
        .output()
        .expect("Failed to run audiodelay");
    assert!(!output.status.success());
}

#[test]
fn test_mode_flags_are_exclusive() {
    let output = audiodelay_bin()
        .args(["a.mkv", "b.wav", "--single", "--batch"])
        .output()
        .expect("Failed to run audiodelay");
    assert!(!output.status.success());
}

#[test]
fn test_single_mode_missing_inputs_is_fatal() {
    let output = audiodelay_bin()
        .args(["/no/such/a.mkv", "/no/such/b.wav", "--single"])
        .output()
        .expect("Failed to run audiodelay");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("must be a file"), "got: {}", stderr);
}

#[test]
fn test_batch_mode_requires_folder_primary() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.wav");
    write_noise_wav(&file, 0.1, 1);
    let file = file.to_string_lossy().to_string();
    let output = audiodelay_bin()
        .args([file.as_str(), file.as_str(), "--batch"])
        .output()
        .expect("Failed to run audiodelay");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("must be a folder"), "got: {}", stderr);
}

#[test]
fn test_single_mode_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("video.wav");
    let audio = dir.path().join("audio.wav");
    write_noise_wav(&video, 3.0, 7);
    write_noise_wav(&audio, 3.0, 7);
    let video = video.to_string_lossy().to_string();
    let audio = audio.to_string_lossy().to_string();

    let output = audiodelay_bin()
        .args([
            video.as_str(),
            audio.as_str(),
            "--single",
            "--crosscorr_segment",
            "2.0",
        ])
        .env("AUDIOSYNC_CACHE_DIR", dir.path().join("cache"))
        .output()
        .expect("Failed to run audiodelay");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("video.wav"), "got: {}", stdout);
    assert!(stdout.contains("OK"), "got: {}", stdout);
    assert!(stdout.contains("High"), "got: {}", stdout);
}

#[test]
fn test_per_pair_failure_keeps_exit_code_zero() {
    // A pair that cannot be decoded fails in the table, not the process.
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("video.wav");
    let audio = dir.path().join("audio.wav");
    std::fs::write(&video, b"not a wav file").unwrap();
    std::fs::write(&audio, b"not a wav file").unwrap();
    let video = video.to_string_lossy().to_string();
    let audio = audio.to_string_lossy().to_string();

    let output = audiodelay_bin()
        .args([video.as_str(), audio.as_str(), "--single"])
        .env("AUDIOSYNC_CACHE_DIR", dir.path().join("cache"))
        .output()
        .expect("Failed to run audiodelay");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ERROR"), "got: {}", stdout);
}

#[test]
fn test_csv_output() {
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("video.wav");
    let audio = dir.path().join("audio.wav");
    write_noise_wav(&video, 3.0, 9);
    write_noise_wav(&audio, 3.0, 9);
    let csv_path = dir.path().join("results.csv");
    let video = video.to_string_lossy().to_string();
    let audio = audio.to_string_lossy().to_string();
    let csv_arg = csv_path.to_string_lossy().to_string();

    let output = audiodelay_bin()
        .args([
            video.as_str(),
            audio.as_str(),
            "--single",
            "--crosscorr_segment",
            "2.0",
            "--output_csv",
            csv_arg.as_str(),
        ])
        .env("AUDIOSYNC_CACHE_DIR", dir.path().join("cache"))
        .output()
        .expect("Failed to run audiodelay");

    assert!(output.status.success());
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next().unwrap(),
        "Video File,Audio File,Start Delay (ms),End Delay (ms),Error"
    );
    let row = lines.next().unwrap();
    assert!(row.starts_with("video.wav,audio.wav,"), "got: {}", row);
}

// ---------------------------------------------------------------------------
//  Bridge binary
// ---------------------------------------------------------------------------

fn run_bridge(input: &str, cache_dir: &Path) -> std::process::Output {
    let mut child = bridge_bin()
        .env("AUDIOSYNC_CACHE_DIR", cache_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn bridge");
    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn test_bridge_empty_input_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_bridge("", dir.path());
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No input provided"), "got: {}", stderr);
}

#[test]
fn test_bridge_invalid_json_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_bridge("{not json", dir.path());
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid JSON input"), "got: {}", stderr);
}

#[test]
fn test_bridge_unknown_mode_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_bridge(r#"{"mode": "karaoke"}"#, dir.path());
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown mode"), "got: {}", stderr);
}

#[test]
fn test_bridge_movie_request_streams_events() {
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("clip.wav");
    let audio = dir.path().join("reference.wav");
    write_noise_wav(&video, 3.0, 13);
    write_noise_wav(&audio, 3.0, 13);

    let request = serde_json::json!({
        "mode": "movie",
        "audio_file": audio.to_string_lossy(),
        "video_files": [video.to_string_lossy()],
        "segment_duration": 2.0,
    });
    let output = run_bridge(&request.to_string(), &dir.path().join("cache"));
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).expect("valid JSON event line"))
        .collect();
    assert!(!events.is_empty());

    let done = events.last().unwrap();
    assert_eq!(done["type"], "done");
    let results = done["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["videoFile"], "clip.wav");
    assert_eq!(results[0]["audioFile"], "reference.wav");
    assert!(results[0]["startDelay"].as_f64().unwrap().abs() < 0.5);
    assert!(events.iter().any(|e| e["type"] == "result"));
    assert!(events.iter().any(|e| e["type"] == "progress"));
}
