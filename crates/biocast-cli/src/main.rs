use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use biocast_core::index::SimilarityIndex;
use biocast_core::types::EMBEDDING_DIM;
use biocast_core::{decode_image, Catalog, Config, Pipeline, Representative};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "biocast", about = "BioCast casting recommendation CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recommend the closest catalog actors for a photo
    Match {
        /// Photo to match (.jpg, .jpeg or .png)
        image: PathBuf,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show catalog index size and display-photo coverage
    Catalog,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Match { image, json } => run_match(&config, &image, json),
        Commands::Catalog => run_catalog(&config),
    }
}

fn run_match(config: &Config, image_path: &Path, json: bool) -> Result<()> {
    let mut pipeline = Pipeline::load(config).context("failed to load models and catalog index")?;
    let catalog = Catalog::open(&config.catalog_dir).context("failed to open catalog directory")?;

    let bytes = std::fs::read(image_path).with_context(|| format!("failed to read {}", image_path.display()))?;
    let image = decode_image(&bytes).with_context(|| format!("failed to decode {}", image_path.display()))?;

    let Some(matches) = pipeline.find_best_match(&image)? else {
        if json {
            println!("{}", serde_json::json!({ "face_detected": false, "matches": [] }));
        } else {
            println!("No face detected! Try another image.");
        }
        return Ok(());
    };

    let presented = catalog.present(&matches);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "face_detected": true,
                "matches": presented,
            }))?
        );
        return Ok(());
    }

    println!("Recommended Actors:");
    for m in &presented {
        match (&m.representative, m.degraded_line()) {
            (_, Some(line)) => println!("{line}"),
            (Representative::Image(path), None) => println!("{}. {} - {}", m.rank, m.caption(), path.display()),
            (_, None) => println!("{}. {}", m.rank, m.caption()),
        }
    }
    Ok(())
}

fn run_catalog(config: &Config) -> Result<()> {
    let index = SimilarityIndex::load(&config.index_path, &config.labels_path, EMBEDDING_DIM)
        .context("failed to load catalog index")?;
    let catalog = Catalog::open(&config.catalog_dir).context("failed to open catalog directory")?;

    let (mut with_photo, mut empty, mut missing) = (0usize, 0usize, 0usize);
    for label in index.labels() {
        match catalog.representative(label) {
            Representative::Image(_) => with_photo += 1,
            Representative::NoImageAvailable => empty += 1,
            Representative::FolderNotFound => missing += 1,
        }
    }

    println!("index:        {}", config.index_path.display());
    println!("labels:       {}", config.labels_path.display());
    println!("catalog dir:  {}", catalog.root().display());
    println!("entries:      {}", index.len());
    println!("dimension:    {}", index.dim());
    println!("with photo:   {with_photo}");
    println!("empty folder: {empty}");
    println!("no folder:    {missing}");
    Ok(())
}
