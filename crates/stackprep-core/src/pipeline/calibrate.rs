use std::path::PathBuf;

use tracing::{debug, info};

use crate::calibration::{plan_calibration, CalibrationMode, CalibrationPlan};
use crate::catalog::{FrameCatalog, FrameGroup};
use crate::engine::{CalibrationRequest, DarkOptimization, OutputSpec};
use crate::frame::ImageType;

use super::orchestrator::{PipelineOrchestrator, Step, StepError};

fn describe(path: Option<&PathBuf>) -> String {
    path.map_or_else(|| "none".to_string(), |p| p.display().to_string())
}

impl PipelineOrchestrator {
    /// Calibrate every exposure subgroup of `group`.
    ///
    /// A subgroup whose calibration fails is dropped with a warning; the step
    /// fails only when no calibrated frame is left. For light groups the
    /// tracked registration reference follows its calibrated counterpart.
    pub(super) fn calibrate_group(
        &mut self,
        catalog: &FrameCatalog,
        group: &FrameGroup,
    ) -> Step<Vec<PathBuf>> {
        let image_type = group.image_type;
        let reference = if image_type == ImageType::Light {
            self.reference.clone()
        } else {
            None
        };
        let plans = plan_calibration(
            catalog,
            group,
            self.config.calibration.flat_darks_only,
            reference.as_deref(),
        );
        let output_dir = self.output_dir(PathBuf::from("calibrated").join(image_type.name()))?;
        let output = OutputSpec::new(output_dir, "_c", &self.config.output_extension);

        let mut calibrated = Vec::new();
        for plan in plans {
            self.checkpoint()?;
            self.log_plan(&plan);

            if plan.mode == CalibrationMode::Skip {
                self.log.add_warning(format!(
                    "Calibration of {image_type} frames skipped: neither master bias nor master dark matching the exposure has been found"
                ));
                calibrated.extend(plan.frames);
                continue;
            }
            if plan.mode == CalibrationMode::BiasOnly {
                self.log.add_warning(format!(
                    "{} frames will be calibrated only with master bias: no master dark matching the exposure has been found",
                    capitalized(image_type.name())
                ));
            }

            let request = self.calibration_request(image_type, &plan, output.clone());
            let results = match self.engines.calibration.calibrate(&request) {
                Ok(results) => results,
                Err(e) => {
                    debug!(error = %e, exposure = plan.exposure, "Calibration call failed");
                    self.log.add_warning("Image Calibration failed");
                    continue;
                }
            };

            for (i, result) in results.into_iter().enumerate() {
                let Some(path) = result else { continue };
                if !path.exists() {
                    self.log.add_warning(format!(
                        "File does not exist after image calibration: {}",
                        path.display()
                    ));
                    continue;
                }
                if plan.reference_index == Some(i) {
                    self.reference = Some(path.clone());
                }
                calibrated.push(path);
            }
        }

        if calibrated.is_empty() {
            return Err(StepError::Failed(format!(
                "All calibrated {image_type} frame files have been removed or cannot be accessed."
            )));
        }
        info!(%image_type, frames = calibrated.len(), "Group calibrated");
        Ok(calibrated)
    }

    fn log_plan(&mut self, plan: &CalibrationPlan) {
        self.log.add_message("[Calibration data]");
        self.log
            .add_message(format!("  Master bias: {}", describe(plan.master_bias.as_ref())));
        self.log.add_message(format!(
            "  Master dark: {}",
            describe(plan.master_dark.as_ref().map(|d| &d.path))
        ));
        self.log
            .add_message(format!("  Master flat: {}", describe(plan.master_flat.as_ref())));
    }

    fn calibration_request(
        &self,
        image_type: ImageType,
        plan: &CalibrationPlan,
        output: OutputSpec,
    ) -> CalibrationRequest {
        let calibration = &self.config.calibration;
        let cfa = self.config.light.cfa_images;
        CalibrationRequest {
            image_type,
            frames: plan.frames.clone(),
            master_bias: plan.master_bias.clone(),
            master_dark: plan.master_dark.as_ref().map(|d| d.path.clone()),
            master_flat: plan.master_flat.clone(),
            overscan: self.config.overscan.active().cloned(),
            dark_optimization: DarkOptimization {
                enabled: calibration.optimize_darks,
                low: calibration.dark_optimization_low,
                window: calibration.dark_optimization_window,
                force_cfa: cfa,
            },
            evaluate_noise: calibration.evaluate_noise && image_type == ImageType::Light && !cfa,
            output,
        }
    }
}

fn capitalized(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
