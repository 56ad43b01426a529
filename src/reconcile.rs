use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ScanOptions;
use crate::error::Result;
use crate::image::{ExtractedFileSet, ImageArchive, LayerRef, filter};
use crate::os::{self, OsIdentity};
use crate::packages::{CommandRunner, PackageRecord};

/// Latest record seen for each package name.
#[derive(Debug, Default)]
pub struct PackageTable {
    records: BTreeMap<String, PackageRecord>,
}

impl PackageTable {
    /// Whole-record replacement by name; nothing is merged field by field.
    pub fn apply(&mut self, records: Vec<PackageRecord>) {
        for record in records {
            self.records.insert(record.name.clone(), record);
        }
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.records.get(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn into_records(self) -> Vec<PackageRecord> {
        self.records.into_values().collect()
    }
}

/// What one layer contributed to the scan.
#[derive(Debug, Clone, Serialize)]
pub struct LayerSummary {
    pub index: usize,
    pub name: String,
    /// Marker files extracted from the layer.
    pub files: usize,
    /// Package records the layer's database yielded.
    pub packages: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_members: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LayerSummary {
    fn new(layer: &LayerRef) -> Self {
        Self {
            index: layer.index,
            name: layer.name.clone(),
            files: 0,
            packages: 0,
            skipped_members: Vec::new(),
            error: None,
        }
    }
}

/// The installed-package view of the whole image.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repo_tags: Vec<String>,
    pub os: OsIdentity,
    pub packages: Vec<PackageRecord>,
    pub package_count: usize,
    pub layers: Vec<LayerSummary>,
}

/// Folds layers, bottom first, into one OS identity and package table.
///
/// Layers must be applied in manifest order: a later layer's record for a
/// package replaces any earlier one.
pub struct Reconciler<'a> {
    options: &'a ScanOptions,
    runner: &'a dyn CommandRunner,
    os: OsIdentity,
    table: PackageTable,
    layers: Vec<LayerSummary>,
}

impl<'a> Reconciler<'a> {
    pub fn new(options: &'a ScanOptions, runner: &'a dyn CommandRunner) -> Self {
        Self {
            options,
            runner,
            os: OsIdentity::default(),
            table: PackageTable::default(),
            layers: Vec::new(),
        }
    }

    pub fn os(&self) -> &OsIdentity {
        &self.os
    }

    pub fn table(&self) -> &PackageTable {
        &self.table
    }

    /// Identify, parse and fold one layer's marker files.
    ///
    /// If the package database cannot be read, the layer contributes nothing:
    /// neither packages nor an OS identity update.
    pub fn apply_layer(&mut self, layer: &LayerRef, files: &ExtractedFileSet) {
        let mut summary = LayerSummary::new(layer);
        summary.files = files.len();
        summary.skipped_members = files.skipped().to_vec();

        debug!(
            "Layer {} markers: {:?}",
            layer.index,
            files.paths().collect::<Vec<_>>()
        );

        let identity = os::identify(files, &self.os);
        let manager = identity.package_manager;

        match manager
            .parse(files, self.options, self.runner)
            .with_context(|| format!("Failed to read {manager} database in layer {}", layer.index))
        {
            Ok(records) => {
                info!("Detected {} packages in layer {}", records.len(), layer.index);
                summary.packages = records.len();
                self.os = identity;
                self.table.apply(records);
            }
            Err(e) => {
                warn!("{e:#}");
                summary.error = Some(format!("{e:#}"));
            }
        }

        self.layers.push(summary);
    }

    /// Record a layer whose tar stream could not be read.
    pub fn skip_layer(&mut self, layer: &LayerRef, error: &anyhow::Error) {
        warn!("Skipping layer {}: {error:#}", layer.index);
        let mut summary = LayerSummary::new(layer);
        summary.error = Some(format!("{error:#}"));
        self.layers.push(summary);
    }

    pub fn finish(self, repo_tags: Vec<String>) -> ScanResult {
        let packages = self.table.into_records();
        ScanResult {
            repo_tags,
            os: self.os,
            package_count: packages.len(),
            packages,
            layers: self.layers,
        }
    }
}

/// Optional callback invoked before each layer is read, with the layer and
/// the total layer count (for progress reporting).
pub type OnLayerScanned = Box<dyn FnMut(&LayerRef, usize)>;

/// Scan an image archive and return its installed packages.
///
/// Only problems with the outer archive or its manifest are errors; a layer
/// that cannot be read is logged and skipped.
pub fn scan_image(
    path: &Path,
    options: &ScanOptions,
    runner: &dyn CommandRunner,
    on_layer: &mut Option<OnLayerScanned>,
) -> Result<ScanResult> {
    let archive = ImageArchive::open(path)?;
    let total = archive.layers().len();
    let mut reconciler = Reconciler::new(options, runner);

    for layer in archive.layers() {
        if let Some(cb) = on_layer {
            cb(layer, total);
        }

        let reader = archive.open_layer(layer)?;
        match filter::extract_markers(reader, options.max_member_size)
            .with_context(|| format!("Failed to read layer {}", layer.name))
        {
            Ok(files) => reconciler.apply_layer(layer, &files),
            Err(e) => reconciler.skip_layer(layer, &e),
        }
    }

    info!(
        "Reconciled {} packages across {} layers (os: {})",
        reconciler.table().len(),
        total,
        reconciler.os().id
    );
    Ok(reconciler.finish(archive.repo_tags().to_vec()))
}
