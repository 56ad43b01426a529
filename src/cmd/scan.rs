use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use crossterm::style::{self, Stylize};

use crate::config::ScanOptions;
use crate::image::LayerRef;
use crate::packages::SystemRunner;
use crate::progress::Spinner;
use crate::reconcile::{self, OnLayerScanned, ScanResult};

pub fn run(image: &Path, output: Option<&str>, options: &ScanOptions) -> Result<()> {
    let spinner = Spinner::new(format!("Reading {} ...", image.display()));

    let bar = spinner.clone_bar();
    let mut on_layer: Option<OnLayerScanned> = Some(Box::new(move |layer: &LayerRef, total: usize| {
        bar.set_message(format!("Scanning layer {}/{} ...", layer.index + 1, total));
    }));

    let result = match reconcile::scan_image(image, options, &SystemRunner, &mut on_layer) {
        Ok(result) => result,
        Err(e) => {
            spinner.fail(format!("Could not scan {}", image.display()));
            return Err(e.into());
        }
    };

    spinner.finish(format!(
        "Scanned {} layers: {} packages ({} {}, {})",
        result.layers.len(),
        result.package_count,
        result.os.id,
        result.os.version_id,
        result.os.package_manager,
    ));
    print_layer_warnings(&result);

    let json = serde_json::to_string_pretty(&result)?;
    match output {
        None | Some("-") => println!("{json}"),
        Some(dest) => {
            fs::write(dest, &json).with_context(|| format!("Failed to write JSON to {dest}"))?;
            eprintln!("{} Wrote {dest}", "✔".green());
        }
    }

    Ok(())
}

fn print_layer_warnings(result: &ScanResult) {
    let mut stderr = io::stderr();

    for layer in &result.layers {
        if let Some(error) = &layer.error {
            let _ = writeln!(
                stderr,
                "{} layer {} ({}) contributed nothing: {}",
                "!".yellow().bold(),
                layer.index,
                style::style(&layer.name).dim(),
                error
            );
        }
        for member in &layer.skipped_members {
            let _ = writeln!(
                stderr,
                "{} layer {}: skipped {}",
                "!".yellow().bold(),
                layer.index,
                style::style(member).dim()
            );
        }
    }
}
