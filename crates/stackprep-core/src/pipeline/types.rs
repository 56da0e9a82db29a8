use std::path::PathBuf;

use crate::frame::ImageType;
use crate::log::ProcessLog;

/// Pipeline stage, used for progress reporting and run summaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Bias,
    Dark,
    Flat,
    Light,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 4] = [Self::Bias, Self::Dark, Self::Flat, Self::Light];

    pub fn image_type(&self) -> ImageType {
        match self {
            Self::Bias => ImageType::Bias,
            Self::Dark => ImageType::Dark,
            Self::Flat => ImageType::Flat,
            Self::Light => ImageType::Light,
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bias => write!(f, "Integrating bias"),
            Self::Dark => write!(f, "Integrating darks"),
            Self::Flat => write!(f, "Processing flats"),
            Self::Light => write!(f, "Processing lights"),
        }
    }
}

/// Where the orchestrator is in the bias, dark, flat, light sequence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    Running(PipelineStage),
    Done,
}

/// Thread-safe progress reporting for the pipeline.
///
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new stage has started. `total_items` is the number of frame groups
    /// it will process, if known.
    fn begin_stage(&self, _stage: PipelineStage, _total_items: Option<usize>) {}

    /// Work items completed so far within the current stage.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}

    /// Polled between stages, groups and sub-steps. Returning `true` ends the
    /// run with [`PrepError::Cancelled`](crate::error::PrepError::Cancelled).
    fn cancel_requested(&self) -> bool {
        false
    }
}

/// No-op progress reporter.
pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// How a stage ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    /// Nothing to do, or skipped after an earlier failure.
    Skipped,
    /// One or more groups failed; the reasons in order.
    Failed(Vec<String>),
}

impl StageOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// A master frame produced by an integration.
#[derive(Clone, Debug, PartialEq)]
pub struct ProducedMaster {
    pub image_type: ImageType,
    pub path: PathBuf,
}

/// Everything a finished run produced.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub stages: Vec<(PipelineStage, StageOutcome)>,
    /// Calibration masters, in production order.
    pub masters: Vec<ProducedMaster>,
    /// Registration reference actually used, after substitution.
    pub reference: Option<PathBuf>,
    pub light_masters: Vec<PathBuf>,
    /// Written process log file, when enabled.
    pub log_file: Option<PathBuf>,
    pub log: ProcessLog,
}

impl RunSummary {
    pub fn outcome(&self, stage: PipelineStage) -> Option<&StageOutcome> {
        self.stages.iter().find(|(s, _)| *s == stage).map(|(_, o)| o)
    }
}
