mod cmd;
mod config;
mod error;
mod image;
mod os;
mod packages;
mod progress;
mod reconcile;

#[cfg(test)]
mod testutil;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::ScanOptions;

#[derive(Parser)]
#[command(name = "layerscan")]
#[command(about = "List the packages installed in a container image archive")]
#[command(version)]
struct Cli {
    /// Write the JSON result to a file instead of stdout ("-" for stdout)
    #[arg(short, long, global = true)]
    output: Option<String>,

    /// rpm binary used to query rpm databases
    #[arg(long, global = true, value_name = "PATH")]
    rpm: Option<String>,

    /// Skip marker files larger than this many bytes
    #[arg(long, global = true, value_name = "BYTES")]
    max_member_size: Option<u64>,

    /// Don't read apt `*_Packages` lists in Debian-family layers
    #[arg(long, global = true)]
    no_apt_lists: bool,

    /// Log per-layer progress (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to an image tar archive (shorthand for `layerscan scan <image>`)
    image: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan an image archive (`docker save`, `podman save`, or OCI layout tar)
    Scan {
        /// Path to the image tar archive
        image: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    // Resolve: `layerscan <image>` is shorthand for `layerscan scan <image>`
    let image = match cli.command {
        Some(Commands::Scan { image }) => Some(image),
        None => cli.image,
    };

    let Some(image) = image else {
        Cli::parse_from(["layerscan", "--help"]);
        return Ok(());
    };

    let options = ScanOptions::from_cli(cli.rpm, cli.max_member_size, cli.no_apt_lists);
    cmd::scan::run(&image, cli.output.as_deref(), &options)
}
