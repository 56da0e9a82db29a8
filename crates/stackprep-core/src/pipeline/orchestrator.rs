use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::catalog::FrameCatalog;
use crate::config::{Config, FailureContainment};
use crate::engine::Engines;
use crate::error::{PrepError, Result};
use crate::frame::ImageType;
use crate::log::ProcessLog;

use super::types::{
    NoOpReporter, PipelineStage, ProducedMaster, ProgressReporter, RunState, RunSummary,
    StageOutcome,
};

/// Failure of one unit of work inside a stage.
pub(super) enum StepError {
    /// An engine step failed; the failure containment policy decides how far
    /// it reaches.
    Failed(String),
    /// The run cannot continue.
    Abort(PrepError),
}

impl From<PrepError> for StepError {
    fn from(e: PrepError) -> Self {
        Self::Abort(e)
    }
}

pub(super) type Step<T> = std::result::Result<T, StepError>;

/// Drives the bias, dark, flat and light stages over a [`FrameCatalog`].
///
/// The catalog is borrowed mutably for the duration of a stage: produced
/// masters are installed into their groups so later stages find them.
pub struct PipelineOrchestrator {
    pub(super) config: Config,
    pub(super) engines: Engines,
    pub(super) reporter: Arc<dyn ProgressReporter>,
    pub(super) log: ProcessLog,
    state: RunState,
    /// Registration reference, replaced by its processed counterpart as the
    /// light frames move through calibration, cosmetic correction and
    /// debayering.
    pub(super) reference: Option<PathBuf>,
    pub(super) masters: Vec<ProducedMaster>,
    pub(super) light_masters: Vec<PathBuf>,
}

impl PipelineOrchestrator {
    pub fn new(config: Config, engines: Engines) -> Self {
        let reference = initial_reference(&config);
        Self {
            config,
            engines,
            reporter: Arc::new(NoOpReporter),
            log: ProcessLog::new(),
            state: RunState::Idle,
            reference,
            masters: Vec::new(),
            light_masters: Vec::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn log(&self) -> &ProcessLog {
        &self.log
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Registration reference as currently tracked.
    pub fn reference(&self) -> Option<&Path> {
        self.reference.as_deref()
    }

    /// Run every stage in dependency order.
    ///
    /// Stage failures are contained according to
    /// [`Config::failure_containment`] and reported in the summary; only
    /// cancellation and fatal errors end the run with `Err`.
    pub fn run(&mut self, catalog: &mut FrameCatalog) -> Result<RunSummary> {
        self.log.clear();
        self.masters.clear();
        self.light_masters.clear();
        self.reference = initial_reference(&self.config);

        info!(
            groups = catalog.groups().len(),
            files = catalog.file_count(),
            containment = %self.config.failure_containment,
            "Starting preprocessing run"
        );

        let mut stages = Vec::with_capacity(PipelineStage::ALL.len());
        let mut halted = false;
        for stage in PipelineStage::ALL {
            if halted {
                stages.push((stage, StageOutcome::Skipped));
                continue;
            }
            self.checkpoint()?;
            self.state = RunState::Running(stage);
            let outcome = match stage {
                PipelineStage::Bias => self.do_bias(catalog)?,
                PipelineStage::Dark => self.do_dark(catalog)?,
                PipelineStage::Flat => self.do_flat(catalog)?,
                PipelineStage::Light => self.do_light(catalog)?,
            };
            info!(%stage, ?outcome, "Stage finished");
            if outcome.is_failed() && self.config.failure_containment == FailureContainment::Run {
                halted = true;
            }
            stages.push((stage, outcome));
        }
        self.state = RunState::Done;

        let log_file = if self.config.save_process_log {
            match self.save_process_log() {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, "Unable to save the process log");
                    None
                }
            }
        } else {
            None
        };

        Ok(RunSummary {
            stages,
            masters: self.masters.clone(),
            reference: self.reference.clone(),
            light_masters: self.light_masters.clone(),
            log_file,
            log: self.log.clone(),
        })
    }

    /// Integrate every bias group into a master bias.
    pub fn do_bias(&mut self, catalog: &mut FrameCatalog) -> Result<StageOutcome> {
        self.do_master_stage(catalog, PipelineStage::Bias)
    }

    /// Integrate every dark group into a master dark.
    pub fn do_dark(&mut self, catalog: &mut FrameCatalog) -> Result<StageOutcome> {
        self.do_master_stage(catalog, PipelineStage::Dark)
    }

    /// Calibrate and integrate every flat group into a master flat.
    pub fn do_flat(&mut self, catalog: &mut FrameCatalog) -> Result<StageOutcome> {
        self.do_master_stage(catalog, PipelineStage::Flat)
    }

    fn do_master_stage(
        &mut self,
        catalog: &mut FrameCatalog,
        stage: PipelineStage,
    ) -> Result<StageOutcome> {
        let image_type = stage.image_type();
        let indices: Vec<usize> = catalog
            .groups()
            .iter()
            .enumerate()
            .filter(|(_, g)| g.image_type == image_type && !g.master_frame)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return Ok(StageOutcome::Skipped);
        }

        self.reporter.begin_stage(stage, Some(indices.len()));
        let mut failures = Vec::new();
        for (done, index) in indices.into_iter().enumerate() {
            if let Err(e) = self.checkpoint() {
                self.reporter.finish_stage();
                return Err(e);
            }
            match self.master_group(catalog, index) {
                Ok(_) => {}
                Err(StepError::Abort(e)) => {
                    self.reporter.finish_stage();
                    return Err(e);
                }
                Err(StepError::Failed(reason)) => {
                    failures.push(reason);
                    if !self.continues_after_group_failure() {
                        break;
                    }
                }
            }
            self.reporter.advance(done + 1);
        }
        self.reporter.finish_stage();
        Ok(outcome_of(failures))
    }

    /// Produce the master of one calibration group and install it as the
    /// group's first item.
    fn master_group(&mut self, catalog: &mut FrameCatalog, index: usize) -> Step<PathBuf> {
        let Some(group) = catalog.groups().get(index).cloned() else {
            return Err(StepError::Abort(PrepError::Fatal(format!(
                "frame group {index} disappeared during the run"
            ))));
        };
        let image_type = group.image_type;
        self.log.add_message(group.log_header());

        let frames = if image_type == ImageType::Flat {
            match self.calibrate_group(catalog, &group) {
                Ok(calibrated) => {
                    self.log.add_success("Calibration OK", "");
                    calibrated
                }
                Err(StepError::Failed(reason)) => {
                    self.log.add_error(reason.clone());
                    self.log.new_line();
                    return Err(StepError::Failed(reason));
                }
                Err(abort) => return Err(abort),
            }
        } else {
            group.paths()
        };

        let master = match self.integrate_frames(&group, frames) {
            Ok(master) => master,
            Err(StepError::Failed(reason)) => {
                let message = format!("Error integrating {image_type} frames.");
                if image_type == ImageType::Flat {
                    self.log.add_error(message.clone());
                    self.log.new_line();
                } else {
                    self.log.add_warning(message.clone());
                }
                return Err(StepError::Failed(format!("{message} {reason}")));
            }
            Err(abort) => return Err(abort),
        };

        catalog.promote_master(index, master.clone());
        self.masters.push(ProducedMaster {
            image_type,
            path: master.clone(),
        });
        self.log
            .add_success("Integration OK", format!("master file {}", master.display()));
        self.log.add_message(group.log_footer());
        info!(%image_type, master = %master.display(), "Master frame produced");
        Ok(master)
    }

    /// Cancellation checkpoint.
    pub(super) fn checkpoint(&self) -> Result<()> {
        if self.reporter.cancel_requested() {
            info!("Run cancelled");
            return Err(PrepError::Cancelled);
        }
        Ok(())
    }

    pub(super) fn continues_after_group_failure(&self) -> bool {
        self.config.failure_containment == FailureContainment::Group
    }

    /// `relative` under the output directory, created if missing.
    pub(super) fn output_dir(&self, relative: impl AsRef<Path>) -> Step<PathBuf> {
        let dir = self.config.output_directory.join(relative);
        std::fs::create_dir_all(&dir).map_err(|e| {
            StepError::Failed(format!("Cannot create output directory {}: {e}", dir.display()))
        })?;
        Ok(dir)
    }

    /// Write the process log to `logs/<unix time>.log`.
    fn save_process_log(&self) -> Result<PathBuf> {
        let dir = self.config.output_directory.join("logs");
        std::fs::create_dir_all(&dir)?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let path = dir.join(format!("{stamp}.log"));
        std::fs::write(&path, self.log.to_string())?;
        Ok(path)
    }
}

fn initial_reference(config: &Config) -> Option<PathBuf> {
    if config.weighting.best_reference {
        None
    } else {
        config
            .registration
            .reference_image
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

pub(super) fn outcome_of(failures: Vec<String>) -> StageOutcome {
    if failures.is_empty() {
        StageOutcome::Completed
    } else {
        StageOutcome::Failed(failures)
    }
}
