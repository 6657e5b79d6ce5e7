//! Host-driven bridge — one JSON request on stdin, newline-delimited JSON
//! events on stdout, fatal initialization errors on stderr.

use std::io::Read;
use std::sync::Arc;

use audiodelay_core::cache::SegmentCache;
use audiodelay_core::engine::Engine;
use audiodelay_core::events::EventSink;
use audiodelay_core::models::{BatchRequest, EngineConfig};
use audiodelay_core::pool::run_request;

fn main() {
    env_logger::init();

    let mut payload = String::new();
    if std::io::stdin().read_to_string(&mut payload).is_err() || payload.trim().is_empty() {
        eprintln!("No input provided.");
        std::process::exit(1);
    }

    let request: BatchRequest = match serde_json::from_str(&payload) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Invalid JSON input: {}", e);
            std::process::exit(1);
        }
    };

    let engine = Engine::new(
        EngineConfig {
            segment_sec: request.segment_duration,
            match_pattern: request.match_pattern.clone(),
            ..Default::default()
        },
        SegmentCache::open(),
        Arc::new(EventSink::stdout_json()),
    );

    if let Err(e) = run_request(&engine, &request) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
