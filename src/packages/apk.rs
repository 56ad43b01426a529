//! Alpine `lib/apk/db/installed`.

use super::{PackageRecord, stanzas};
use crate::image::ExtractedFileSet;

pub const INSTALLED_PATH: &str = "lib/apk/db/installed";

pub fn parse(files: &ExtractedFileSet) -> Vec<PackageRecord> {
    match files.get(INSTALLED_PATH) {
        Some(data) => parse_installed(&String::from_utf8_lossy(data)),
        None => Vec::new(),
    }
}

/// Each stanza is a run of `X:value` lines; we read name (`P`), version
/// (`V`), arch (`A`), description (`T`) and origin (`o`).
pub fn parse_installed(content: &str) -> Vec<PackageRecord> {
    let mut packages = Vec::new();

    for lines in stanzas(content) {
        let mut name = None;
        let mut version = None;
        let mut arch = None;
        let mut description = None;
        let mut origin = None;

        for line in lines {
            let Some((tag, value)) = line.split_at_checked(2) else {
                continue;
            };
            let value = value.trim();
            match tag {
                "P:" => name = Some(value),
                "V:" => version = Some(value),
                "A:" => arch = Some(value),
                "T:" => description = Some(value),
                "o:" => origin = Some(value),
                _ => {}
            }
        }

        if let (Some(name), Some(version)) = (name, version) {
            packages.push(PackageRecord {
                name: name.to_string(),
                version: version.to_string(),
                architecture: arch.unwrap_or_default().to_string(),
                source: origin.unwrap_or(name).to_string(),
                description: description.map(str::to_string),
            });
        }
    }

    packages
}
