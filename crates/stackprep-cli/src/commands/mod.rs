pub mod config;
pub mod diagnose;
pub mod groups;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use stackprep_core::catalog::{ForcedValues, FrameCatalog};
use stackprep_core::config::{import_parameters, Config};
use stackprep_core::frame::ImageType;
use stackprep_core::io::FileImageSource;
use tracing::info;

/// Input frames and parameters shared by every command that builds a catalog.
#[derive(Args)]
pub struct InputArgs {
    /// Frames classified from their headers and file names
    pub files: Vec<PathBuf>,

    /// Frames forced to bias
    #[arg(long, num_args = 1..)]
    pub bias: Vec<PathBuf>,

    /// Frames forced to dark
    #[arg(long, num_args = 1..)]
    pub dark: Vec<PathBuf>,

    /// Frames forced to flat
    #[arg(long, num_args = 1..)]
    pub flat: Vec<PathBuf>,

    /// Frames forced to light
    #[arg(long, num_args = 1..)]
    pub light: Vec<PathBuf>,

    /// Use the given bias/dark/flat frames as ready-made masters
    #[arg(long, value_delimiter = ',')]
    pub master: Vec<MasterArg>,

    /// Parameter file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum MasterArg {
    Bias,
    Dark,
    Flat,
}

impl From<MasterArg> for ImageType {
    fn from(arg: MasterArg) -> Self {
        match arg {
            MasterArg::Bias => ImageType::Bias,
            MasterArg::Dark => ImageType::Dark,
            MasterArg::Flat => ImageType::Flat,
        }
    }
}

impl InputArgs {
    /// Parameters from `--config`, or the defaults.
    pub fn load_config(&self) -> Result<Config> {
        let Some(ref path) = self.config else {
            return Ok(Config::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        import_parameters(&text).with_context(|| format!("Invalid parameters in {}", path.display()))
    }

    /// Ingest every input into a new catalog. Rejected files are reported on
    /// stderr.
    pub fn build_catalog(&self, config: &Config) -> FrameCatalog {
        let mut catalog = FrameCatalog::new(config.grouping, Arc::new(FileImageSource));
        for &master in &self.master {
            catalog.set_use_as_master(master.into(), true);
        }

        let forced = [
            (&self.bias, ImageType::Bias),
            (&self.dark, ImageType::Dark),
            (&self.flat, ImageType::Flat),
            (&self.light, ImageType::Light),
        ];
        for (files, image_type) in forced {
            let values = ForcedValues::image_type(image_type);
            for file in files {
                catalog.add_file(file, &values);
            }
        }
        for file in &self.files {
            catalog.add_file(file, &ForcedValues::default());
        }

        for message in catalog.take_messages() {
            eprintln!("{message}");
        }
        info!(
            groups = catalog.groups().len(),
            files = catalog.file_count(),
            "Input frames classified"
        );
        catalog
    }
}
