use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Take};
use std::path::{Path, PathBuf};

use oci_spec::image::{ImageIndex, ImageManifest};
use serde::Deserialize;
use tracing::debug;

use super::{LayerRef, normalize_member_path};
use crate::error::{Result, ScanError};

const DOCKER_MANIFEST: &str = "manifest.json";
const OCI_INDEX: &str = "index.json";

// ---- Docker-format archive structs (manifest.json) ----

#[derive(Deserialize)]
struct DockerManifestEntry {
    #[serde(rename = "Layers")]
    layers: Vec<String>,
    #[serde(rename = "RepoTags", default)]
    repo_tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Docker,
    Oci,
}

/// Where a member's data lives inside the outer tar.
#[derive(Debug, Clone, Copy)]
struct MemberSpan {
    offset: u64,
    size: u64,
}

/// An image tarball (`docker save`, `podman save`, or an OCI-layout tar)
/// whose layers can be streamed one at a time in manifest order.
///
/// Opening indexes every regular member once; each layer is later read by
/// seeking straight to its data, so nothing is unpacked to disk.
pub struct ImageArchive {
    path: PathBuf,
    format: ArchiveFormat,
    members: HashMap<String, MemberSpan>,
    layers: Vec<LayerRef>,
    repo_tags: Vec<String>,
}

impl ImageArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| ScanError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let members = index_members(file).map_err(|source| ScanError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let format = if members.contains_key(DOCKER_MANIFEST) {
            ArchiveFormat::Docker
        } else if members.contains_key(OCI_INDEX) {
            ArchiveFormat::Oci
        } else {
            return Err(ScanError::ManifestMissing {
                path: path.to_path_buf(),
            });
        };

        let mut archive = Self {
            path: path.to_path_buf(),
            format,
            members,
            layers: Vec::new(),
            repo_tags: Vec::new(),
        };

        let names = match format {
            ArchiveFormat::Docker => archive.read_docker_manifest()?,
            ArchiveFormat::Oci => archive.read_oci_layout()?,
        };

        archive.layers = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| LayerRef { index, name })
            .collect();

        debug!(
            "Indexed {} ({:?}, {} layers)",
            archive.path.display(),
            archive.format,
            archive.layers.len()
        );
        Ok(archive)
    }

    /// Layers in manifest order, bottom first.
    pub fn layers(&self) -> &[LayerRef] {
        &self.layers
    }

    pub fn repo_tags(&self) -> &[String] {
        &self.repo_tags
    }

    /// Open a reader over a layer member's raw bytes.
    pub fn open_layer(&self, layer: &LayerRef) -> Result<Take<File>> {
        self.open_member(&layer.name)
    }

    fn open_member(&self, name: &str) -> Result<Take<File>> {
        let span = self
            .members
            .get(normalize_member_path(name))
            .copied()
            .ok_or_else(|| ScanError::MissingMember {
                member: name.to_string(),
            })?;

        let mut file = File::open(&self.path).map_err(|source| ScanError::Open {
            path: self.path.clone(),
            source,
        })?;
        file.seek(SeekFrom::Start(span.offset))
            .map_err(|source| ScanError::Read {
                path: self.path.clone(),
                source,
            })?;
        Ok(file.take(span.size))
    }

    fn read_member(&self, name: &str) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.open_member(name)?
            .read_to_end(&mut data)
            .map_err(|source| ScanError::Read {
                path: self.path.clone(),
                source,
            })?;
        Ok(data)
    }

    fn read_docker_manifest(&mut self) -> Result<Vec<String>> {
        let data = self.read_member(DOCKER_MANIFEST)?;
        let entries: Vec<DockerManifestEntry> =
            serde_json::from_slice(&data).map_err(|source| ScanError::ManifestJson {
                member: DOCKER_MANIFEST.to_string(),
                source,
            })?;

        let first = entries
            .into_iter()
            .next()
            .ok_or_else(|| ScanError::EmptyManifest {
                member: DOCKER_MANIFEST.to_string(),
            })?;

        self.repo_tags = first.repo_tags;
        Ok(first.layers)
    }

    fn read_oci_layout(&mut self) -> Result<Vec<String>> {
        let data = self.read_member(OCI_INDEX)?;
        let index = ImageIndex::from_reader(Cursor::new(data)).map_err(|source| {
            ScanError::OciSpec {
                member: OCI_INDEX.to_string(),
                source,
            }
        })?;

        let manifest_desc = index
            .manifests()
            .first()
            .ok_or_else(|| ScanError::EmptyManifest {
                member: OCI_INDEX.to_string(),
            })?;

        let manifest_path = blob_path(&manifest_desc.digest().to_string());
        let data = self.read_member(&manifest_path)?;
        let manifest = ImageManifest::from_reader(Cursor::new(data)).map_err(|source| {
            ScanError::OciSpec {
                member: manifest_path.clone(),
                source,
            }
        })?;

        Ok(manifest
            .layers()
            .iter()
            .map(|d| blob_path(&d.digest().to_string()))
            .collect())
    }
}

/// `sha256:abc...` -> `blobs/sha256/abc...`
fn blob_path(digest: &str) -> String {
    match digest.split_once(':') {
        Some((alg, hex)) => format!("blobs/{alg}/{hex}"),
        None => format!("blobs/{digest}"),
    }
}

/// Symlink chains longer than this are left unresolved.
const MAX_LINK_DEPTH: usize = 8;

/// One pass over the outer tar recording where each regular member's data
/// starts. Later duplicates win, matching tar extraction semantics.
///
/// `docker save` writes a layer that repeats an earlier one as a symlink
/// (`<id>/layer.tar -> ../<other>/layer.tar`), so symlinks and hard links are
/// mapped onto their target's data once the pass is done.
fn index_members(file: File) -> std::io::Result<HashMap<String, MemberSpan>> {
    let mut archive = tar::Archive::new(file);
    let mut members = HashMap::new();
    let mut links = Vec::new();

    for entry_result in archive.entries_with_seek()? {
        let entry = entry_result?;
        let kind = entry.header().entry_type();
        let entry_path = entry.path()?.to_string_lossy().to_string();
        let name = normalize_member_path(&entry_path).to_string();

        if kind.is_file() {
            members.insert(
                name,
                MemberSpan {
                    offset: entry.raw_file_position(),
                    size: entry.size(),
                },
            );
        } else if kind.is_symlink() || kind.is_hard_link() {
            let Some(target) = entry.link_name()? else {
                continue;
            };
            let target = target.to_string_lossy();
            // Hard link targets are archive paths; symlinks are relative to
            // the link's own directory.
            let resolved = if kind.is_hard_link() {
                Some(normalize_member_path(&target).to_string())
            } else {
                resolve_symlink(&name, &target)
            };
            match resolved {
                Some(resolved) => links.push((name, resolved)),
                None => debug!("Ignoring link {name} -> {target} outside the archive"),
            }
        }
    }

    for _ in 0..MAX_LINK_DEPTH {
        let mut changed = false;
        for (name, target) in &links {
            if members.contains_key(name) {
                continue;
            }
            if let Some(span) = members.get(target).copied() {
                members.insert(name.clone(), span);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    Ok(members)
}

/// Resolve a symlink target against the directory of `member`. Returns
/// `None` when the target climbs above the archive root.
fn resolve_symlink(member: &str, target: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    if !target.starts_with('/') {
        if let Some((dir, _)) = member.rsplit_once('/') {
            parts.extend(dir.split('/'));
        }
    }
    for part in target.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            part => parts.push(part),
        }
    }
    Some(parts.join("/"))
}
