//! Fixture builders shared by unit tests.

use std::cell::RefCell;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::packages::{CommandOutput, CommandRunner};

/// Builds an in-memory layer tar.
pub struct LayerBuilder {
    builder: tar::Builder<Vec<u8>>,
}

impl LayerBuilder {
    pub fn new() -> Self {
        Self {
            builder: tar::Builder::new(Vec::new()),
        }
    }

    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        self.builder.append_data(&mut header, path, data).unwrap();
        self
    }

    pub fn dir(mut self, path: &str) -> Self {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        self.builder.append_data(&mut header, path, io::empty()).unwrap();
        self
    }

    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        self.builder.append_link(&mut header, path, target).unwrap();
        self
    }

    pub fn hard_link(mut self, path: &str, target: &str) -> Self {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Link);
        header.set_size(0);
        header.set_mode(0o644);
        self.builder.append_link(&mut header, path, target).unwrap();
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.builder.into_inner().unwrap()
    }
}

/// A layer tar containing exactly these regular files, in order.
pub fn layer_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    files
        .iter()
        .fold(LayerBuilder::new(), |b, (path, data)| b.file(path, data))
        .finish()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Write an outer tar with the given members.
pub fn write_tar(path: &Path, members: &[(&str, Vec<u8>)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(file);
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, data.as_slice()).unwrap();
    }
    builder.finish().unwrap();
}

/// A `docker save` style archive with layers stored in manifest order.
pub fn docker_image(dir: &Path, layers: &[Vec<u8>]) -> PathBuf {
    let order: Vec<usize> = (0..layers.len()).collect();
    docker_image_with_order(dir, layers, &order)
}

/// Like [`docker_image`], but members are written to the archive in
/// `member_order`; the manifest still lists layer 0 first.
pub fn docker_image_with_order(dir: &Path, layers: &[Vec<u8>], member_order: &[usize]) -> PathBuf {
    let names: Vec<String> = (0..layers.len())
        .map(|i| format!("layer{i}/layer.tar"))
        .collect();
    let manifest = serde_json::json!([{
        "Config": "config.json",
        "RepoTags": ["test/image:latest"],
        "Layers": names,
    }]);

    let mut members: Vec<(&str, Vec<u8>)> = member_order
        .iter()
        .map(|&i| (names[i].as_str(), layers[i].clone()))
        .collect();
    members.push(("config.json", b"{}".to_vec()));
    members.push(("manifest.json", serde_json::to_vec(&manifest).unwrap()));

    let path = dir.join("image.tar");
    write_tar(&path, &members);
    path
}

/// An OCI-layout archive (`index.json` + `blobs/sha256/...`). Digests are
/// synthetic; nothing verifies them.
pub fn oci_image(dir: &Path, layers: &[Vec<u8>]) -> PathBuf {
    let layer_digests: Vec<String> = (0..layers.len())
        .map(|i| format!("{:064x}", i + 1))
        .collect();
    let config_digest = format!("{:064x}", 0xc0u32);
    let manifest_digest = format!("{:064x}", 0x3au32);

    let layer_descriptors: Vec<serde_json::Value> = layers
        .iter()
        .zip(&layer_digests)
        .map(|(data, digest)| {
            serde_json::json!({
                "mediaType": "application/vnd.oci.image.layer.v1.tar",
                "digest": format!("sha256:{digest}"),
                "size": data.len(),
            })
        })
        .collect();
    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": format!("sha256:{config_digest}"),
            "size": 2,
        },
        "layers": layer_descriptors,
    });
    let manifest_bytes = serde_json::to_vec(&manifest).unwrap();

    let index = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [{
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "digest": format!("sha256:{manifest_digest}"),
            "size": manifest_bytes.len(),
        }],
    });

    let blob_names: Vec<String> = layer_digests
        .iter()
        .map(|d| format!("blobs/sha256/{d}"))
        .collect();
    let manifest_name = format!("blobs/sha256/{manifest_digest}");
    let config_name = format!("blobs/sha256/{config_digest}");

    let mut members: Vec<(&str, Vec<u8>)> = vec![
        ("oci-layout", br#"{"imageLayoutVersion":"1.0.0"}"#.to_vec()),
        ("index.json", serde_json::to_vec(&index).unwrap()),
        (manifest_name.as_str(), manifest_bytes),
        (config_name.as_str(), b"{}".to_vec()),
    ];
    for (name, data) in blob_names.iter().zip(layers) {
        members.push((name.as_str(), data.clone()));
    }

    let path = dir.join("oci.tar");
    write_tar(&path, &members);
    path
}

/// What a [`FakeRunner`] should pretend happened.
pub enum FakeOutcome {
    Success(String),
    Failure(String),
    NotFound,
}

/// Stands in for the rpm binary. Records each invocation's arguments and the
/// files present under `--dbpath` at the time of the call.
pub struct FakeRunner {
    outcome: FakeOutcome,
    pub calls: RefCell<Vec<Vec<String>>>,
    pub staged: RefCell<Vec<String>>,
    pub dbpaths: RefCell<Vec<PathBuf>>,
}

impl FakeRunner {
    pub fn new(outcome: FakeOutcome) -> Self {
        Self {
            outcome,
            calls: RefCell::new(Vec::new()),
            staged: RefCell::new(Vec::new()),
            dbpaths: RefCell::new(Vec::new()),
        }
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, _program: &str, args: &[String]) -> io::Result<CommandOutput> {
        self.calls.borrow_mut().push(args.to_vec());

        if let Some(pos) = args.iter().position(|a| a == "--dbpath") {
            let dbpath = PathBuf::from(&args[pos + 1]);
            if let Ok(entries) = std::fs::read_dir(&dbpath) {
                let mut names: Vec<String> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect();
                names.sort();
                self.staged.borrow_mut().extend(names);
            }
            self.dbpaths.borrow_mut().push(dbpath);
        }

        match &self.outcome {
            FakeOutcome::Success(stdout) => Ok(CommandOutput {
                success: true,
                stdout: stdout.clone(),
                stderr: String::new(),
            }),
            FakeOutcome::Failure(stderr) => Ok(CommandOutput {
                success: false,
                stdout: String::new(),
                stderr: stderr.clone(),
            }),
            FakeOutcome::NotFound => Err(io::Error::new(io::ErrorKind::NotFound, "rpm: not found")),
        }
    }
}
