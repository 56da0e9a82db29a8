use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use stackprep_core::diagnostics::run_diagnostics;
use stackprep_core::engine::passthrough::rehearsal_engines;
use stackprep_core::io::FileImageSource;
use stackprep_core::pipeline::PipelineOrchestrator;

use super::InputArgs;
use crate::progress::BarReporter;
use crate::summary::{print_diagnostics, print_run_summary};

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Output directory (overrides the parameter file)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Registration reference frame (overrides the parameter file)
    #[arg(long)]
    pub reference: Option<PathBuf>,

    /// Proceed even when diagnostics report warnings
    #[arg(short, long)]
    pub yes: bool,
}

pub fn run(args: &RunArgs) -> Result<()> {
    let mut config = args.input.load_config()?;
    if let Some(ref output) = args.output {
        config.output_directory = output.clone();
    }
    if let Some(ref reference) = args.reference {
        config.registration.reference_image = Some(reference.clone());
    }
    if !config.output_directory.as_os_str().is_empty() {
        std::fs::create_dir_all(&config.output_directory).with_context(|| {
            format!(
                "Failed to create output directory {}",
                config.output_directory.display()
            )
        })?;
    }

    let mut catalog = args.input.build_catalog(&config);
    let engines = rehearsal_engines(Arc::new(FileImageSource), config.light.cfa_images);

    let report = run_diagnostics(&catalog, &config, &engines);
    if !report.is_empty() {
        print_diagnostics(&report);
    }
    if report.has_errors() {
        bail!("{} error(s) found, nothing processed", report.errors().count());
    }
    if report.has_warnings() && !args.yes {
        bail!("Diagnostics reported warnings; pass --yes to continue");
    }

    let reporter = Arc::new(BarReporter::new()?);
    let mut orchestrator = PipelineOrchestrator::new(config, engines).with_reporter(reporter.clone());
    let summary = orchestrator.run(&mut catalog);
    reporter.finish();
    let summary = summary?;

    print!("{}", summary.log);
    print_run_summary(&summary);
    Ok(())
}
