pub mod archive;
pub mod filter;

use std::collections::BTreeMap;

pub use archive::ImageArchive;

/// A layer named by the image manifest, with its position in apply order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRef {
    /// Zero-based position in the manifest's layer list.
    pub index: usize,

    /// Archive member holding the layer tar (e.g. `abc123/layer.tar` or
    /// `blobs/sha256/abc123`).
    pub name: String,
}

/// Marker files pulled out of one layer, keyed by normalized path
/// (forward slashes, no leading `/` or `./`).
#[derive(Debug, Default)]
pub struct ExtractedFileSet {
    files: BTreeMap<String, Vec<u8>>,
    skipped: Vec<String>,
}

impl ExtractedFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file; a later occurrence of the same path replaces the earlier.
    pub fn insert(&mut self, path: impl Into<String>, data: Vec<u8>) {
        self.files.insert(path.into(), data);
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Iterate files whose path starts with `prefix`, in path order.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a [u8])> + 'a {
        self.files
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Note a matching member that could not be materialized.
    pub fn record_skipped(&mut self, path: impl Into<String>) {
        self.skipped.push(path.into());
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }
}

/// Strip the `./` and `/` prefixes tar writers like to add.
pub fn normalize_member_path(path: &str) -> &str {
    let mut p = path;
    loop {
        if let Some(rest) = p.strip_prefix("./") {
            p = rest;
        } else if let Some(rest) = p.strip_prefix('/') {
            p = rest;
        } else {
            return p;
        }
    }
}
