//! AudioDelay CLI — measure the delay between video audio tracks and
//! reference audio files.
//!
//! Usage:
//!     audiodelay movie.mkv dub.ac3 --single
//!     audiodelay ./videos dub.ac3 --batch
//!     audiodelay ./videos ./audios --series --match_pattern 'E(\d+)'

use clap::{ArgGroup, Parser};
use std::path::Path;
use std::sync::Arc;

use audiodelay_core::cache::SegmentCache;
use audiodelay_core::engine::Engine;
use audiodelay_core::events::EventSink;
use audiodelay_core::models::{BatchRequest, Confidence, EngineConfig, PairResult};
use audiodelay_core::pool::run_request;

#[derive(Parser)]
#[command(
    name = "audiodelay",
    version,
    about = "AudioDelay — measure audio/video delay via FFT cross-correlation",
    long_about = "Measure the temporal offset between an audio track carried by a \
                  video container and a separately supplied reference audio track, \
                  at both the start and the end of each file. Divergence between \
                  the two measurements flags drift or mismatched content."
)]
#[command(group(
    ArgGroup::new("mode").required(true).args(["single", "batch", "series"])
))]
struct Cli {
    /// Path to the primary video file or folder.
    primary: String,

    /// Path to the secondary audio file or folder.
    secondary: String,

    /// Process a single primary file against a single secondary file.
    #[arg(long)]
    single: bool,

    /// Process a folder of primary videos against a single secondary audio file.
    #[arg(long)]
    batch: bool,

    /// Process a folder of primary videos against a folder of secondary
    /// audios, matching by name.
    #[arg(long)]
    series: bool,

    /// Segment duration in seconds for analysis.
    #[arg(long = "crosscorr_segment", default_value_t = 300.0)]
    crosscorr_segment: f64,

    /// Custom regex for matching files in series mode.
    #[arg(long = "match_pattern")]
    match_pattern: Option<String>,

    /// Save results to a CSV file.
    #[arg(long = "output_csv")]
    output_csv: Option<String>,

    /// Enable verbose output for debugging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    // SAFETY: Called before any threads are spawned, at program start.
    unsafe {
        std::env::set_var("RUST_LOG", format!("audiodelay={}", level));
    }
    env_logger::init();

    let request = build_request(&cli)?;

    let engine = Engine::new(
        EngineConfig {
            segment_sec: cli.crosscorr_segment,
            match_pattern: cli.match_pattern.clone(),
            ..Default::default()
        },
        SegmentCache::open(),
        Arc::new(EventSink::stderr_plain()),
    );

    let mut results = run_request(&engine, &request)?;

    if results.is_empty() {
        eprintln!("No file pairs to process.");
        return Ok(());
    }

    print_results_table(&mut results);

    if let Some(csv_path) = &cli.output_csv {
        save_results_csv(&results, csv_path)?;
        eprintln!("Results saved to {}", csv_path);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
//  Startup validation
// ---------------------------------------------------------------------------

/// Map the CLI surface onto a batch request, validating the inputs for the
/// selected mode. Failures here exit non-zero; per-pair failures later do
/// not.
fn build_request(cli: &Cli) -> anyhow::Result<BatchRequest> {
    let primary = Path::new(&cli.primary);
    let secondary = Path::new(&cli.secondary);

    if cli.single {
        if !primary.is_file() {
            anyhow::bail!("Primary input '{}' must be a file for single mode.", cli.primary);
        }
        if !secondary.is_file() {
            anyhow::bail!("Secondary input '{}' must be a file for single mode.", cli.secondary);
        }
        Ok(BatchRequest {
            mode: "movie".to_string(),
            video_folder: None,
            audio_file: Some(cli.secondary.clone()),
            video_files: Some(vec![cli.primary.clone()]),
            audio_folder: None,
            match_pattern: None,
            segment_duration: cli.crosscorr_segment,
        })
    } else if cli.batch {
        if !primary.is_dir() {
            anyhow::bail!("Primary input '{}' must be a folder for batch mode.", cli.primary);
        }
        if !secondary.is_file() {
            anyhow::bail!("Secondary input '{}' must be a file for batch mode.", cli.secondary);
        }
        Ok(BatchRequest {
            mode: "movie".to_string(),
            video_folder: Some(cli.primary.clone()),
            audio_file: Some(cli.secondary.clone()),
            video_files: None,
            audio_folder: None,
            match_pattern: None,
            segment_duration: cli.crosscorr_segment,
        })
    } else {
        if !primary.is_dir() || !secondary.is_dir() {
            anyhow::bail!("Both primary and secondary inputs must be folders for series mode.");
        }
        Ok(BatchRequest {
            mode: "series".to_string(),
            video_folder: Some(cli.primary.clone()),
            audio_file: None,
            video_files: None,
            audio_folder: Some(cli.secondary.clone()),
            match_pattern: cli.match_pattern.clone(),
            segment_duration: cli.crosscorr_segment,
        })
    }
}

// ---------------------------------------------------------------------------
//  Reporting
// ---------------------------------------------------------------------------

fn print_results_table(results: &mut [PairResult]) {
    results.sort_by(|a, b| a.video_path.cmp(&b.video_path));

    println!();
    println!(
        "{:<35} {:<35} {:>16} {:>14} {:^10} {}",
        "Primary File", "Secondary File", "Start Delay (ms)", "End Delay (ms)", "Confidence", "Status"
    );
    println!("{}", "-".repeat(125));

    for result in results.iter() {
        let primary = truncate(&file_name(&result.video_path), 35);
        let secondary = truncate(&file_name(&result.audio_path), 35);

        let (start, end, confidence, status) = match (&result.error, result.start_delay_ms) {
            (Some(err), _) => (
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
                format!("ERROR: {}", err),
            ),
            (None, Some(start_ms)) => {
                let end_str = match result.end_delay_ms {
                    Some(end_ms) => format!("{:+.1}", end_ms),
                    None => "N/A".to_string(),
                };
                let confidence = match result.end_delay_ms {
                    Some(end_ms) => Confidence::from_delays(start_ms, end_ms).label().to_string(),
                    None => "-".to_string(),
                };
                (format!("{:+.1}", start_ms), end_str, confidence, "OK".to_string())
            }
            (None, None) => (
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
                "Failed".to_string(),
            ),
        };

        println!(
            "{:<35} {:<35} {:>16} {:>14} {:^10} {}",
            primary, secondary, start, end, confidence, status
        );
    }
    println!();
}

fn save_results_csv(results: &[PairResult], output_csv: &str) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(output_csv)?;
    writer.write_record([
        "Video File",
        "Audio File",
        "Start Delay (ms)",
        "End Delay (ms)",
        "Error",
    ])?;

    for result in results {
        writer.write_record([
            file_name(&result.video_path),
            file_name(&result.audio_path),
            result.start_delay_ms.map(|v| v.to_string()).unwrap_or_default(),
            result.end_delay_ms.map(|v| v.to_string()).unwrap_or_default(),
            result.error.clone().unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

fn truncate(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        name.to_string()
    } else {
        let kept: String = name.chars().take(max - 1).collect();
        format!("{}…", kept)
    }
}
