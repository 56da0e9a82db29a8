use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use stackprep_core::engine::passthrough::rehearsal_engines;
use stackprep_core::io::FileImageSource;

use super::InputArgs;
use crate::summary::print_diagnostics;

#[derive(Args)]
pub struct DiagnoseArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Output directory (overrides the parameter file)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Registration reference frame (overrides the parameter file)
    #[arg(long)]
    pub reference: Option<PathBuf>,
}

pub fn run(args: &DiagnoseArgs) -> Result<()> {
    let mut config = args.input.load_config()?;
    if let Some(ref output) = args.output {
        config.output_directory = output.clone();
    }
    if let Some(ref reference) = args.reference {
        config.registration.reference_image = Some(reference.clone());
    }
    let catalog = args.input.build_catalog(&config);
    let engines = rehearsal_engines(Arc::new(FileImageSource), config.light.cfa_images);

    let report = stackprep_core::diagnostics::run_diagnostics(&catalog, &config, &engines);
    print_diagnostics(&report);

    let errors = report.errors().count();
    if errors > 0 {
        bail!("{errors} error(s) found");
    }
    Ok(())
}
