pub mod apk;
pub mod dpkg;
pub mod rpm;

use std::fmt;
use std::io;
use std::process::Command;

use anyhow::Result;
use serde::Serialize;

use crate::config::ScanOptions;
use crate::image::ExtractedFileSet;

/// One installed package as recorded by a package database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub architecture: String,
    /// Source package; the package name when the database has none.
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Package manager inferred from marker files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Apk,
    Rpm,
    #[default]
    Unknown,
}

/// Marker file -> manager, checked in order; first hit wins.
const MANAGER_MARKERS: &[(&str, PackageManager)] = &[
    (dpkg::STATUS_PATH, PackageManager::Apt),
    (apk::INSTALLED_PATH, PackageManager::Apk),
    ("var/lib/rpm/Packages", PackageManager::Rpm),
    ("var/lib/rpm/rpmdb.sqlite", PackageManager::Rpm),
    ("var/lib/rpm/Packages.db", PackageManager::Rpm),
];

impl PackageManager {
    /// Classify a layer by which package database it carries.
    pub fn detect(files: &ExtractedFileSet) -> Self {
        MANAGER_MARKERS
            .iter()
            .find(|(path, _)| files.contains(path))
            .map(|(_, manager)| *manager)
            .unwrap_or(PackageManager::Unknown)
    }

    pub fn is_known(self) -> bool {
        self != PackageManager::Unknown
    }

    /// Parse this manager's database out of one layer's files.
    pub fn parse(
        self,
        files: &ExtractedFileSet,
        options: &ScanOptions,
        runner: &dyn CommandRunner,
    ) -> Result<Vec<PackageRecord>> {
        match self {
            PackageManager::Apt => Ok(dpkg::parse(files, options.include_apt_lists)),
            PackageManager::Apk => Ok(apk::parse(files)),
            PackageManager::Rpm => rpm::parse(files, &options.rpm_command, runner),
            PackageManager::Unknown => Ok(Vec::new()),
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageManager::Apt => write!(f, "apt"),
            PackageManager::Apk => write!(f, "apk"),
            PackageManager::Rpm => write!(f, "rpm"),
            PackageManager::Unknown => write!(f, "unknown"),
        }
    }
}

/// Captured result of an external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external programs. The rpm parser goes through this so tests can
/// stand in for the real binary.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput>;
}

/// Spawns real processes.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Split database text into blank-line separated stanzas of lines.
/// Tolerates CRLF and runs of blank lines.
pub(crate) fn stanzas(content: &str) -> Vec<Vec<&str>> {
    let mut out = Vec::new();
    let mut current = Vec::new();

    for line in content.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeOutcome, FakeRunner};

    fn set(paths: &[&str]) -> ExtractedFileSet {
        let mut files = ExtractedFileSet::new();
        for p in paths {
            files.insert(*p, Vec::new());
        }
        files
    }

    #[test]
    fn detection_order() {
        assert_eq!(PackageManager::detect(&set(&[])), PackageManager::Unknown);
        assert_eq!(
            PackageManager::detect(&set(&["var/lib/rpm/Packages", "lib/apk/db/installed"])),
            PackageManager::Apk
        );
        assert_eq!(
            PackageManager::detect(&set(&["lib/apk/db/installed", "var/lib/dpkg/status"])),
            PackageManager::Apt
        );
        assert_eq!(
            PackageManager::detect(&set(&["var/lib/rpm/rpmdb.sqlite"])),
            PackageManager::Rpm
        );
        assert_eq!(
            PackageManager::detect(&set(&["var/lib/apt/lists/x_Packages", "etc/os-release"])),
            PackageManager::Unknown
        );
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&PackageManager::Apk).unwrap(), "\"apk\"");
        assert_eq!(serde_json::to_string(&PackageManager::Unknown).unwrap(), "\"unknown\"");
        assert_eq!(PackageManager::Rpm.to_string(), "rpm");
    }

    #[test]
    fn unknown_manager_parses_nothing() {
        let mut files = ExtractedFileSet::new();
        files.insert("var/lib/dpkg/status", b"Package: a\nVersion: 1\n".to_vec());
        let runner = FakeRunner::new(FakeOutcome::NotFound);

        let records = PackageManager::Unknown
            .parse(&files, &ScanOptions::default(), &runner)
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn stanza_splitting() {
        let text = "A: 1\r\nB: 2\r\n\r\n\n\nC: 3\n   \nD: 4";
        assert_eq!(stanzas(text), vec![vec!["A: 1", "B: 2"], vec!["C: 3"], vec!["D: 4"]]);
        assert!(stanzas("\n\n").is_empty());
    }
}
