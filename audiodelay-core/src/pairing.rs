//! Filename pairing — match primary and secondary folders by episode
//! numbering before falling back to content fingerprinting.
//!
//! Patterns are tried in order; the first whose key sets intersect wins.
//! When none do, files pair by the tuple of all integers in each name.

use log::{debug, warn};
use regex::Regex;
use std::collections::HashMap;

/// Match files in two folders by season/episode numbers or other patterns.
/// A custom pattern replaces the built-in list. Returns `(primary,
/// secondary)` paths sorted by primary path; missing or empty folders
/// yield an empty list.
pub fn match_file_pairs(
    primary_folder: &str,
    secondary_folder: &str,
    custom_pattern: Option<&str>,
) -> Vec<(String, String)> {
    let primary_files = match list_folder(primary_folder) {
        Some(files) if !files.is_empty() => files,
        _ => return Vec::new(),
    };
    let secondary_files = match list_folder(secondary_folder) {
        Some(files) if !files.is_empty() => files,
        _ => return Vec::new(),
    };

    let patterns: Vec<Regex> = match custom_pattern {
        Some(pattern) => match Regex::new(pattern) {
            Ok(re) => vec![re],
            Err(e) => {
                warn!("Invalid match pattern '{}': {}", pattern, e);
                default_patterns()
            }
        },
        None => default_patterns(),
    };

    let mut primary_map: HashMap<Vec<String>, String> = HashMap::new();
    let mut secondary_map: HashMap<Vec<String>, String> = HashMap::new();
    let mut matched = false;

    for pattern in &patterns {
        primary_map = key_map(&primary_files, |name| group_key(name, pattern));
        secondary_map = key_map(&secondary_files, |name| group_key(name, pattern));

        if primary_map.keys().any(|k| secondary_map.contains_key(k)) {
            debug!("Matched using pattern: {}", pattern.as_str());
            matched = true;
            break;
        }
    }

    if !matched {
        debug!("No pattern matched; falling back to integer tuples.");
        let digits = Regex::new(r"\d+").unwrap();
        primary_map = key_map(&primary_files, |name| integer_key(name, &digits));
        secondary_map = key_map(&secondary_files, |name| integer_key(name, &digits));
    }

    let mut pairs: Vec<(String, String)> = primary_map
        .into_iter()
        .filter_map(|(key, p_path)| {
            secondary_map.get(&key).map(|s_path| (p_path, s_path.clone()))
        })
        .collect();
    pairs.sort();
    pairs
}

fn default_patterns() -> Vec<Regex> {
    vec![
        Regex::new(r"[Ss](\d+)[Ee](\d+)").unwrap(),    // S01E01
        Regex::new(r"(\d+)x(\d+)").unwrap(),           // 1x01
        Regex::new(r"[._\s-](\d{1,3})[._\s-]").unwrap(), // .01.
    ]
}

/// All files in a folder as `(name, path)`, sorted by name.
fn list_folder(folder: &str) -> Option<Vec<(String, String)>> {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list folder {}: {}", folder, e);
            return None;
        }
    };

    let mut files: Vec<(String, String)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| {
            (
                e.file_name().to_string_lossy().to_string(),
                e.path().to_string_lossy().to_string(),
            )
        })
        .collect();
    files.sort();
    Some(files)
}

fn key_map<F>(files: &[(String, String)], key_fn: F) -> HashMap<Vec<String>, String>
where
    F: Fn(&str) -> Option<Vec<String>>,
{
    let mut map = HashMap::new();
    for (name, path) in files {
        if let Some(key) = key_fn(name) {
            map.insert(key, path.clone());
        }
    }
    map
}

/// Capture groups of the first match.
fn group_key(name: &str, pattern: &Regex) -> Option<Vec<String>> {
    pattern.captures(name).map(|caps| {
        caps.iter()
            .skip(1)
            .filter_map(|g| g.map(|m| m.as_str().to_string()))
            .collect()
    })
}

/// Every integer in the name, in order.
fn integer_key(name: &str, digits: &Regex) -> Option<Vec<String>> {
    let key: Vec<String> = digits.find_iter(name).map(|m| m.as_str().to_string()).collect();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn make_folder(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        dir
    }

    fn names(pairs: &[(String, String)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(p, s)| {
                (
                    Path::new(p).file_name().unwrap().to_string_lossy().to_string(),
                    Path::new(s).file_name().unwrap().to_string_lossy().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn test_season_episode_pattern() {
        let primary = make_folder(&["Show.S01E01.mkv", "Show.S01E02.mkv"]);
        let secondary = make_folder(&["dub_s01e02.ac3", "dub_s01e01.ac3"]);
        let pairs = match_file_pairs(
            &primary.path().to_string_lossy(),
            &secondary.path().to_string_lossy(),
            None,
        );
        assert_eq!(
            names(&pairs),
            vec![
                ("Show.S01E01.mkv".to_string(), "dub_s01e01.ac3".to_string()),
                ("Show.S01E02.mkv".to_string(), "dub_s01e02.ac3".to_string()),
            ]
        );
    }

    #[test]
    fn test_nxn_pattern() {
        let primary = make_folder(&["show 1x01.mp4", "show 1x02.mp4"]);
        let secondary = make_folder(&["audio 1x02.flac", "audio 1x01.flac"]);
        let pairs = match_file_pairs(
            &primary.path().to_string_lossy(),
            &secondary.path().to_string_lossy(),
            None,
        );
        assert_eq!(pairs.len(), 2);
        assert!(pairs[0].0.ends_with("1x01.mp4"));
        assert!(pairs[0].1.ends_with("1x01.flac"));
    }

    #[test]
    fn test_integer_fallback() {
        let primary = make_folder(&["episode_7_final.mkv"]);
        let secondary = make_folder(&["track7.wav"]);
        let pairs = match_file_pairs(
            &primary.path().to_string_lossy(),
            &secondary.path().to_string_lossy(),
            None,
        );
        // Separator pattern matches "_7_" on one side only; the integer
        // tuple ("7",) pairs them.
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_custom_pattern() {
        let primary = make_folder(&["ep-03-cut.mkv", "ep-04-cut.mkv"]);
        let secondary = make_folder(&["mix-03.wav", "mix-04.wav"]);
        let pairs = match_file_pairs(
            &primary.path().to_string_lossy(),
            &secondary.path().to_string_lossy(),
            Some(r"-(\d+)"),
        );
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_no_common_keys() {
        let primary = make_folder(&["a1.mkv"]);
        let secondary = make_folder(&["b2.wav"]);
        let pairs = match_file_pairs(
            &primary.path().to_string_lossy(),
            &secondary.path().to_string_lossy(),
            None,
        );
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_missing_folder() {
        let secondary = make_folder(&["b2.wav"]);
        let pairs = match_file_pairs(
            "/no/such/folder",
            &secondary.path().to_string_lossy(),
            None,
        );
        assert!(pairs.is_empty());
    }
}
