use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::image::ExtractedFileSet;
use crate::packages::PackageManager;

pub const UNKNOWN: &str = "unknown";

const OS_RELEASE_PATHS: &[&str] = &["etc/os-release", "usr/lib/os-release"];
const DEBIAN_VERSION_PATH: &str = "etc/debian_version";
const ALPINE_RELEASE_PATH: &str = "etc/alpine-release";

/// Distribution identity plus the package manager it uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OsIdentity {
    pub id: String,
    pub version_id: String,
    pub name: String,
    pub package_manager: PackageManager,
}

impl Default for OsIdentity {
    fn default() -> Self {
        Self {
            id: UNKNOWN.to_string(),
            version_id: UNKNOWN.to_string(),
            name: UNKNOWN.to_string(),
            package_manager: PackageManager::Unknown,
        }
    }
}

impl OsIdentity {
    pub fn is_known(&self) -> bool {
        self.id != UNKNOWN
    }
}

/// Fold one layer's marker files into the identity carried from earlier
/// layers.
///
/// Once a distribution id is known it never changes, even if a later layer
/// ships a different `os-release`, and the manager found with it is kept.
/// While the id is still unknown, each layer is identified from its own
/// files alone. The manager is detected whenever it is not yet known.
pub fn identify(files: &ExtractedFileSet, prior: &OsIdentity) -> OsIdentity {
    let mut identity = if prior.is_known() {
        prior.clone()
    } else {
        detect_distribution(files)
    };

    if !identity.package_manager.is_known() {
        identity.package_manager = PackageManager::detect(files);
    }

    if identity != *prior {
        debug!(
            "OS identity now {} {} ({})",
            identity.id, identity.version_id, identity.package_manager
        );
    }
    identity
}

fn detect_distribution(files: &ExtractedFileSet) -> OsIdentity {
    if let Some(data) = OS_RELEASE_PATHS.iter().find_map(|p| files.get(p)) {
        let fields = parse_os_release(&String::from_utf8_lossy(data));
        let field = |key: &str| {
            fields
                .get(key)
                .cloned()
                .unwrap_or_else(|| UNKNOWN.to_string())
        };
        return OsIdentity {
            id: field("ID"),
            version_id: field("VERSION_ID"),
            name: field("NAME"),
            package_manager: PackageManager::Unknown,
        };
    }

    let fallbacks = [(DEBIAN_VERSION_PATH, "debian"), (ALPINE_RELEASE_PATH, "alpine")];
    for (path, id) in fallbacks {
        if let Some(data) = files.get(path) {
            return OsIdentity {
                id: id.to_string(),
                version_id: String::from_utf8_lossy(data).trim().to_string(),
                ..OsIdentity::default()
            };
        }
    }

    OsIdentity::default()
}

/// `KEY=VALUE` lines with surrounding quotes stripped from values.
pub fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches(['"', '\'']);
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}
