use std::path::PathBuf;

/// Failures that abort a whole scan.
///
/// Anything that goes wrong inside a single layer is reported through
/// `anyhow` and absorbed by the reconciler; only problems with the outer
/// image archive or its manifest end up here.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Failed to open image archive {}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read image archive {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No manifest.json or index.json found in {}", .path.display())]
    ManifestMissing { path: PathBuf },

    #[error("Failed to parse {member}")]
    ManifestJson {
        member: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse OCI document {member}")]
    OciSpec {
        member: String,
        #[source]
        source: oci_spec::OciSpecError,
    },

    #[error("Empty manifest in {member}")]
    EmptyManifest { member: String },

    #[error("{member} is referenced by the manifest but missing from the archive")]
    MissingMember { member: String },
}

pub type Result<T> = std::result::Result<T, ScanError>;
