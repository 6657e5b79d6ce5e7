//! Event emitter — one structured record per line, consumed by the host.
//!
//! A single writer lock serializes output so event lines are never
//! interleaved across worker threads. Every event is flushed immediately;
//! the host reads the stream incrementally while the batch runs.

use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::models::PairResult;

/// How events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFormat {
    /// One JSON object per line (host-driven bridge).
    Json,
    /// Human-readable progress lines; structural events are suppressed
    /// (terminal CLI, which renders its own table at the end).
    Plain,
}

/// Serializes progress/result/log events to a shared writer.
pub struct EventSink {
    out: Mutex<Box<dyn Write + Send>>,
    format: SinkFormat,
}

impl EventSink {
    pub fn new(out: Box<dyn Write + Send>, format: SinkFormat) -> Self {
        Self {
            out: Mutex::new(out),
            format,
        }
    }

    /// JSON events on stdout — the host-driven protocol.
    pub fn stdout_json() -> Self {
        Self::new(Box::new(std::io::stdout()), SinkFormat::Json)
    }

    /// Plain progress lines on stderr for interactive runs.
    pub fn stderr_plain() -> Self {
        Self::new(Box::new(std::io::stderr()), SinkFormat::Plain)
    }

    /// Discards everything.
    pub fn null() -> Self {
        Self::new(Box::new(std::io::sink()), SinkFormat::Json)
    }

    fn emit(&self, value: serde_json::Value) {
        let mut out = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = writeln!(out, "{}", value);
        let _ = out.flush();
    }

    fn emit_plain(&self, line: &str) {
        let mut out = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = writeln!(out, "{}", line);
        let _ = out.flush();
    }

    pub fn log(&self, message: &str) {
        match self.format {
            SinkFormat::Json => self.emit(json!({"type": "log", "message": message})),
            SinkFormat::Plain => self.emit_plain(message),
        }
    }

    pub fn file_start(&self, file: &str) {
        if self.format == SinkFormat::Json {
            self.emit(json!({"type": "file_start", "file": basename(file)}));
        }
    }

    pub fn file_progress(&self, file: &str, percent: u32) {
        if self.format == SinkFormat::Json {
            self.emit(json!({
                "type": "file_progress",
                "file": basename(file),
                "percent": percent,
            }));
        }
    }

    pub fn file_end(&self, file: &str, elapsed_ms: u64) {
        if self.format == SinkFormat::Json {
            self.emit(json!({
                "type": "file_end",
                "file": basename(file),
                "elapsed_ms": elapsed_ms,
            }));
        }
    }

    pub fn progress(&self, processed: usize, total: usize, current: &str) {
        match self.format {
            SinkFormat::Json => self.emit(json!({
                "type": "progress",
                "processed": processed,
                "total": total,
                "current": basename(current),
            })),
            SinkFormat::Plain => {
                self.emit_plain(&format!("[{}/{}] {}", processed, total, basename(current)))
            }
        }
    }

    pub fn result(&self, result: &PairResult, elapsed_ms: u64) {
        if self.format == SinkFormat::Json {
            let mut value = normalize(result);
            value["type"] = json!("result");
            value["elapsed_ms"] = json!(elapsed_ms);
            self.emit(value);
        }
    }

    pub fn done(&self, results: &[PairResult]) {
        if self.format == SinkFormat::Json {
            let normalized: Vec<serde_json::Value> = results.iter().map(normalize).collect();
            self.emit(json!({"type": "done", "results": normalized}));
        }
    }
}

/// Host-facing result shape: basenames and camelCase field names.
fn normalize(result: &PairResult) -> serde_json::Value {
    json!({
        "videoFile": basename(&result.video_path),
        "audioFile": basename(&result.audio_path),
        "startDelay": result.start_delay_ms,
        "endDelay": result.end_delay_ms,
        "error": result.error,
    })
}

pub(crate) fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}
