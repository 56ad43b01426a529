//! Debian `status` and apt `Packages` files (deb822 stanzas).

use std::collections::HashMap;

use tracing::debug;

use super::{PackageRecord, stanzas};
use crate::image::ExtractedFileSet;

pub const STATUS_PATH: &str = "var/lib/dpkg/status";
const APT_LISTS_PREFIX: &str = "var/lib/apt/lists/";
const APT_LISTS_SUFFIX: &str = "_Packages";

/// Read the dpkg status database and, when `include_apt_lists` is set, any
/// apt `*_Packages` indexes in the layer.
pub fn parse(files: &ExtractedFileSet, include_apt_lists: bool) -> Vec<PackageRecord> {
    let mut packages = Vec::new();

    if let Some(data) = files.get(STATUS_PATH) {
        packages.extend(parse_control(&String::from_utf8_lossy(data)));
    }

    if include_apt_lists {
        for (path, data) in files.with_prefix(APT_LISTS_PREFIX) {
            if !path.ends_with(APT_LISTS_SUFFIX) {
                continue;
            }
            let found = parse_control(&String::from_utf8_lossy(data));
            debug!("{path}: {} entries", found.len());
            packages.extend(found);
        }
    }

    packages
}

/// Parse deb822 text into records. Stanzas without both `Package` and
/// `Version` are dropped.
pub fn parse_control(content: &str) -> Vec<PackageRecord> {
    stanzas(content)
        .into_iter()
        .filter_map(|lines| {
            let map = field_map(&lines);
            let name = map.get("Package")?;
            let version = map.get("Version")?;
            Some(PackageRecord {
                name: name.to_string(),
                version: version.to_string(),
                architecture: map.get("Architecture").unwrap_or(&"").to_string(),
                source: map.get("Source").unwrap_or(name).to_string(),
                description: None,
            })
        })
        .collect()
}

fn field_map<'a>(lines: &[&'a str]) -> HashMap<&'a str, &'a str> {
    let mut map = HashMap::new();
    for line in lines {
        // Folded continuation of the previous field.
        if line.starts_with([' ', '\t']) {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            map.insert(key.trim(), value.trim());
        }
    }
    map
}
