use anyhow::{bail, Result};
use clap::Parser;
use exifcraft_core::formats::InputSource;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "exifcraft")]
#[command(version, about = "AI-powered image metadata tagger", long_about = None)]
pub struct Cli {
    /// Directory containing the images to process
    #[arg(short, long, conflicts_with = "files")]
    pub directory: Option<PathBuf>,

    /// Individual image files to process
    #[arg(short, long, num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// Path to the config file (JSON, TOML or YAML)
    #[arg(short, long, default_value = "./config.json")]
    pub config: PathBuf,

    /// Print the resolved config, per-task previews and full error chains
    #[arg(short, long)]
    pub verbose: bool,

    /// Generate and reconcile without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Descend into subdirectories of --directory
    #[arg(long)]
    pub recursive: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// exiftool executable to use
    #[arg(long, default_value = exifcraft_core::exiftool::DEFAULT_PROGRAM)]
    pub exiftool: String,
}

impl Cli {
    pub fn input_source(&self) -> Result<InputSource> {
        match (&self.directory, self.files.is_empty()) {
            (Some(dir), _) => Ok(InputSource::Directory(dir.clone())),
            (None, false) => Ok(InputSource::Files(self.files.clone())),
            (None, true) => bail!("please specify a directory (-d) or files (-f) to process"),
        }
    }
}
