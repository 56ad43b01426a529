use std::io::{BufRead, BufReader, Read};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{ExtractedFileSet, normalize_member_path};

/// A path shape that marks a file as relevant to OS or package detection.
#[derive(Debug, Clone, Copy)]
enum MarkerPattern {
    Exact(&'static str),
    /// Anything under the prefix.
    Prefix(&'static str),
    /// `prefix` + anything + `suffix`.
    Wrapped(&'static str, &'static str),
}

impl MarkerPattern {
    fn matches(&self, path: &str) -> bool {
        match *self {
            MarkerPattern::Exact(p) => path == p,
            MarkerPattern::Prefix(p) => path.len() > p.len() && path.starts_with(p),
            MarkerPattern::Wrapped(p, s) => {
                path.len() >= p.len() + s.len() && path.starts_with(p) && path.ends_with(s)
            }
        }
    }
}

const MARKER_PATTERNS: &[MarkerPattern] = &[
    MarkerPattern::Exact("var/lib/dpkg/status"),
    MarkerPattern::Wrapped("var/lib/apt/lists/", "_Packages"),
    MarkerPattern::Exact("lib/apk/db/installed"),
    MarkerPattern::Prefix("var/lib/rpm/"),
    MarkerPattern::Exact("etc/os-release"),
    MarkerPattern::Wrapped("etc/", "-release"),
    MarkerPattern::Exact("etc/issue"),
    MarkerPattern::Exact("etc/debian_version"),
    MarkerPattern::Exact("usr/lib/os-release"),
];

/// Whether a normalized member path is one we keep.
pub fn is_marker_path(path: &str) -> bool {
    MARKER_PATTERNS.iter().any(|p| p.matches(path))
}

/// Stream one layer tar (plain or gzip) and keep only marker files.
///
/// A member that fails to read is skipped and noted in the result. A broken
/// tar stream (bad header, truncation) ends the scan of the layer, keeping
/// the markers found before it; only a stream with no readable entry at all
/// fails the layer.
pub fn extract_markers<R: Read>(reader: R, max_member_size: u64) -> Result<ExtractedFileSet> {
    let mut reader = BufReader::new(reader);
    let head = reader.fill_buf().context("Failed to read layer stream")?;
    let is_gzip = head.len() >= 2 && head[0] == 0x1f && head[1] == 0x8b;

    if is_gzip {
        filter_inner_tar(flate2::read::GzDecoder::new(reader), max_member_size)
    } else {
        filter_inner_tar(reader, max_member_size)
    }
}

fn filter_inner_tar<R: Read>(reader: R, max_member_size: u64) -> Result<ExtractedFileSet> {
    let mut archive = tar::Archive::new(reader);
    let mut files = ExtractedFileSet::new();

    let mut entries_read = 0usize;

    for entry_result in archive.entries().context("Failed to read layer tar entries")? {
        // The iterator cannot resume after a bad header or a truncated
        // stream. Keep what was already extracted unless nothing was.
        let mut entry = match entry_result {
            Ok(entry) => entry,
            Err(e) if entries_read == 0 => {
                return Err(e).context("Failed to read layer tar entry");
            }
            Err(e) => {
                warn!("Layer tar stream broken after {entries_read} entries: {e}");
                files.record_skipped(format!("<entry {entries_read}>"));
                break;
            }
        };
        entries_read += 1;

        // Directories, symlinks and hard links carry no content of their own.
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let raw_path = match entry.path() {
            Ok(p) => p.to_string_lossy().to_string(),
            Err(e) => {
                warn!("Skipping layer member with unreadable path: {e}");
                continue;
            }
        };
        let path = normalize_member_path(&raw_path);

        if !is_marker_path(path) {
            continue;
        }

        let size = entry.size();
        if size > max_member_size {
            warn!("Skipping oversized marker file: {path} ({size} bytes)");
            files.record_skipped(path);
            continue;
        }

        let mut data = Vec::new();
        match entry.read_to_end(&mut data) {
            Ok(_) => {
                debug!("Extracted {path} ({} bytes)", data.len());
                files.insert(path, data);
            }
            Err(e) => {
                warn!("Error extracting {path}: {e}");
                files.record_skipped(path);
            }
        }
    }

    Ok(files)
}
