use anyhow::{Context as _, Result};
use clap::Parser;
use habitat_manifest::{ManifestConfig, ManifestRenderer};
use log::info;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML or JSON parameter file
    #[arg(short, long)]
    params: PathBuf,

    /// Template to use instead of the built-in Habitat manifest
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// Write the manifest to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override the container image
    #[arg(long)]
    image: Option<String>,

    /// Override the number of replicas
    #[arg(long)]
    count: Option<u32>,

    /// Override the ring key Secret name
    #[arg(long)]
    ring_secret_name: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    info!("Loading parameters from {:?}", cli.params);
    let mut params = ManifestConfig::load(&cli.params).context("Failed to load parameters")?;
    if let Some(image) = cli.image {
        params.image = image;
    }
    if let Some(count) = cli.count {
        params.count = count;
    }
    if let Some(ring) = cli.ring_secret_name {
        params.ring_secret_name = Some(ring);
    }

    let base_dir = cli.params.parent().unwrap_or(Path::new("."));
    let context = params
        .into_context(base_dir)
        .context("Invalid parameters")?;

    let renderer = match &cli.template {
        Some(path) => {
            info!("Using template {:?}", path);
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read template {:?}", path))?;
            ManifestRenderer::with_template(&source)
                .with_context(|| format!("Failed to compile template {:?}", path))?
        }
        None => ManifestRenderer::new().context("Failed to compile built-in template")?,
    };

    let manifest = renderer
        .render(&context)
        .with_context(|| format!("Failed to render manifest for '{}'", context.metadata_name))?;

    match cli.output {
        Some(path) => {
            std::fs::write(&path, manifest)
                .with_context(|| format!("Failed to write {:?}", path))?;
            info!("Wrote manifest to {:?}", path);
        }
        None => print!("{}", manifest),
    }

    Ok(())
}
