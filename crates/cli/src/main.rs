use anyhow::{Context, Result};
use clap::Parser;
use cli::args::Cli;
use cli::{report, signals};
use exifcraft_core::config;
use exifcraft_core::exiftool::ExifTool;
use exifcraft_core::metadata::MetadataStore;
use exifcraft_core::{BatchOptions, Pipeline};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let source = cli.input_source()?;
    let mut cfg = config::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    if cli.recursive {
        cfg.recursive = true;
    }
    let verbose = cli.verbose || cfg.verbose;
    let dry_run = cli.dry_run || cfg.dry_run;
    if verbose {
        eprintln!("Configuration:\n{}", report::render_config(&cfg)?);
    }

    let generator = providers::build_provider(&cfg.ai_model)?;
    let exiftool = Arc::new(ExifTool::new(cli.exiftool.clone()));
    let pipeline = Pipeline::new(Arc::new(cfg), generator, exiftool.clone());
    let files = pipeline.collect_inputs(&source)?;
    info!("found {} image file(s)", files.len());

    exiftool
        .init()
        .await
        .with_context(|| format!("starting {}", exiftool.program()))?;

    let cancel = Arc::new(AtomicBool::new(false));
    let listener = signals::spawn_cancel_listener(cancel.clone(), exiftool.clone());
    let opts = BatchOptions {
        dry_run,
        cancel: Some(cancel),
        on_progress: None,
    };
    let summary = pipeline.run(&files, &opts).await;
    listener.abort();

    if let Err(e) = exiftool.shutdown().await {
        warn!(error = %e, "exiftool shutdown failed");
    }

    if cli.json {
        println!("{}", report::render_json(&summary)?);
    } else {
        print!("{}", report::render_text(&summary, verbose));
    }
    Ok(())
}
