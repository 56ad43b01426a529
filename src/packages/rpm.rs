//! RPM databases, read by staging them to disk and asking `rpm` to query them.
//!
//! The rpmdb formats (Berkeley DB, ndb, sqlite) are not parsed here. Support
//! is best-effort: a missing or failing `rpm` yields no packages rather than
//! an error.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{CommandRunner, PackageRecord};
use crate::image::ExtractedFileSet;

const RPM_DIR: &str = "var/lib/rpm/";
const DATABASE_FILES: &[&str] = &["Packages", "rpmdb.sqlite", "Packages.db"];
const QUERY_FORMAT: &str = "%{NAME}|%{VERSION}|%{ARCH}\n";

pub fn parse(
    files: &ExtractedFileSet,
    rpm_command: &str,
    runner: &dyn CommandRunner,
) -> Result<Vec<PackageRecord>> {
    if !has_database(files) {
        return Ok(Vec::new());
    }

    // Removed on drop, whichever way we leave this function.
    let staging = tempfile::Builder::new()
        .prefix("layerscan-rpmdb-")
        .tempdir()
        .context("Failed to create rpm staging directory")?;
    let dbpath = stage_database(files, staging.path())?;

    let args = vec![
        "--dbpath".to_string(),
        dbpath.to_string_lossy().into_owned(),
        "-qa".to_string(),
        "--queryformat".to_string(),
        QUERY_FORMAT.to_string(),
    ];
    let result = runner.run(rpm_command, &args);

    if let Err(e) = staging.close() {
        warn!("Failed to remove rpm staging directory: {e}");
    }

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            warn!("Failed to run '{rpm_command}': {e}. Is rpm installed?");
            return Ok(Vec::new());
        }
    };

    if !output.success {
        warn!("'{rpm_command} -qa' failed: {}", output.stderr.trim());
        return Ok(Vec::new());
    }

    Ok(parse_query_output(&output.stdout))
}

fn has_database(files: &ExtractedFileSet) -> bool {
    DATABASE_FILES
        .iter()
        .any(|name| files.contains(&format!("{RPM_DIR}{name}")))
}

/// Write every `var/lib/rpm/*` file under `root`, keeping the relative
/// layout. Returns the staged `var/lib/rpm` directory.
fn stage_database(files: &ExtractedFileSet, root: &Path) -> Result<PathBuf> {
    let dbpath = root.join(RPM_DIR);
    fs::create_dir_all(&dbpath)
        .with_context(|| format!("Failed to create {}", dbpath.display()))?;

    for (path, data) in files.with_prefix(RPM_DIR) {
        let rel = Path::new(path);
        if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            warn!("Refusing to stage rpm database file with unsafe path: {path}");
            continue;
        }

        let dest = root.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&dest, data).with_context(|| format!("Failed to write {}", dest.display()))?;
        debug!("Staged {path} ({} bytes)", data.len());
    }

    Ok(dbpath)
}

/// Parse `NAME|VERSION|ARCH` lines. `warning:` lines and lines with fewer
/// than two fields are ignored.
pub fn parse_query_output(stdout: &str) -> Vec<PackageRecord> {
    let mut packages = Vec::new();

    for line in stdout.lines() {
        if line.starts_with("warning:") {
            continue;
        }

        let parts: Vec<&str> = line.trim().split('|').collect();
        if parts.len() < 2 || parts[0].is_empty() {
            continue;
        }

        packages.push(PackageRecord {
            name: parts[0].to_string(),
            version: parts[1].to_string(),
            architecture: parts.get(2).unwrap_or(&"").to_string(),
            source: parts[0].to_string(),
            description: None,
        });
    }

    packages
}
