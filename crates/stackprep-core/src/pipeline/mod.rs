//! Stage sequencing: bias, dark and flat masters, then light processing.

mod calibrate;
mod integrate;
mod light;
mod orchestrator;
pub mod types;

pub use integrate::{master_file_name, master_keywords};
pub use orchestrator::PipelineOrchestrator;
pub use types::{
    NoOpReporter, PipelineStage, ProducedMaster, ProgressReporter, RunState, RunSummary,
    StageOutcome,
};
