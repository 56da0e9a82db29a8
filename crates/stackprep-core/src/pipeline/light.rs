//! Light stage: calibration, cosmetic correction and debayering of every
//! group, then reference selection, weighting, registration and
//! integration.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::catalog::{clean_filter_name, FrameCatalog, FrameGroup};
use crate::consts::MIN_REGISTERED_FRAMES;
use crate::engine::{
    BatchOutput, CosmeticRequest, DebayerRequest, OutputSpec, ProcessTemplate, RegistrationRequest,
};
use crate::error::Result;
use crate::frame::ImageType;
use crate::weighting::{
    compute_descriptors, find_registration_reference, write_weights, DescriptorRange,
    ImageDescriptor, WeightProfile,
};

use super::orchestrator::{outcome_of, PipelineOrchestrator, Step, StepError};
use super::types::{PipelineStage, StageOutcome};

/// A light group after calibration, cosmetic correction and debayering.
struct PreparedGroup {
    group: FrameGroup,
    frames: Vec<PathBuf>,
    descriptors: Vec<ImageDescriptor>,
}

impl PipelineOrchestrator {
    /// Process every light group.
    pub fn do_light(&mut self, catalog: &mut FrameCatalog) -> Result<StageOutcome> {
        let groups: Vec<FrameGroup> = catalog
            .groups()
            .iter()
            .filter(|g| g.image_type == ImageType::Light)
            .cloned()
            .collect();
        if groups.is_empty() {
            return Ok(StageOutcome::Skipped);
        }

        let steps = if self.config.light.calibrate_only {
            groups.len()
        } else {
            groups.len() * 2
        };
        self.reporter.begin_stage(PipelineStage::Light, Some(steps));
        let outcome = self.light_stage(catalog, groups);
        self.reporter.finish_stage();
        outcome
    }

    /// Runs in two batches: every group is calibrated and prepared first, then
    /// each is registered and integrated. The registration reference may be
    /// chosen from descriptors pooled over all groups, so it has to be known
    /// before the first registration.
    fn light_stage(&mut self, catalog: &FrameCatalog, groups: Vec<FrameGroup>) -> Result<StageOutcome> {
        let weighting = self.config.weighting.clone();
        let weights_before = weighting.generate_weights && !weighting.after_registration;
        let need_descriptors = weighting.best_reference || weights_before;

        let mut failures = Vec::new();
        let mut prepared = Vec::with_capacity(groups.len());
        let mut done = 0;
        for group in groups {
            self.checkpoint()?;
            self.log.add_message(group.log_header());
            match self.prepare_group(catalog, &group) {
                Ok(frames) => {
                    let descriptors = if need_descriptors {
                        compute_descriptors(&frames, &self.engines, &mut self.log)
                    } else {
                        Vec::new()
                    };
                    prepared.push(PreparedGroup {
                        group,
                        frames,
                        descriptors,
                    });
                }
                Err(StepError::Abort(e)) => return Err(e),
                Err(StepError::Failed(reason)) => {
                    failures.push(reason);
                    if !self.continues_after_group_failure() {
                        return Ok(outcome_of(failures));
                    }
                }
            }
            done += 1;
            self.reporter.advance(done);
        }

        if self.config.light.calibrate_only {
            info!(groups = prepared.len(), "Calibration only, registration skipped");
            return Ok(outcome_of(failures));
        }

        if weighting.best_reference {
            let per_group: Vec<Vec<ImageDescriptor>> =
                prepared.iter().map(|p| p.descriptors.clone()).collect();
            match find_registration_reference(&per_group) {
                Some(reference) => {
                    self.log.add_success(
                        "Best reference frame for registration",
                        reference.display().to_string(),
                    );
                    self.log.new_line();
                    self.reference = Some(reference);
                }
                None => {
                    let reason = "Unable to select a registration reference frame.".to_string();
                    self.log.add_error(reason.clone());
                    failures.push(reason);
                    return Ok(outcome_of(failures));
                }
            }
        }

        if weights_before {
            let profile = weighting.profile();
            for p in &prepared {
                self.checkpoint()?;
                self.store_weights(&p.descriptors, &profile);
            }
            self.log
                .add_success("Frame weights computed and stored successfully", "");
            self.log.new_line();
        }

        let Some(reference) = self.reference.clone() else {
            let reason = "No registration reference image has been specified.".to_string();
            self.log.add_error(reason.clone());
            failures.push(reason);
            return Ok(outcome_of(failures));
        };

        for p in prepared {
            self.checkpoint()?;
            self.log.add_message(p.group.log_header());
            let result = self.register_and_integrate(&p, &reference);
            self.log.add_message(p.group.log_footer());
            match result {
                Ok(()) => {}
                Err(StepError::Abort(e)) => return Err(e),
                Err(StepError::Failed(reason)) => {
                    failures.push(reason);
                    if !self.continues_after_group_failure() {
                        return Ok(outcome_of(failures));
                    }
                }
            }
            done += 1;
            self.reporter.advance(done);
        }
        Ok(outcome_of(failures))
    }

    /// Calibrate, cosmetically correct and debayer one light group.
    fn prepare_group(&mut self, catalog: &FrameCatalog, group: &FrameGroup) -> Step<Vec<PathBuf>> {
        let frames = match self.calibrate_group(catalog, group) {
            Ok(frames) => frames,
            Err(StepError::Failed(reason)) => {
                self.log.add_warning(reason.clone());
                return Err(StepError::Failed(reason));
            }
            Err(abort) => return Err(abort),
        };
        self.log.add_success("Calibration OK", "");

        let frames = if self.config.light.cosmetic_correction {
            self.cosmetic_correct(frames)?
        } else {
            frames
        };
        if self.config.light.cfa_images {
            self.debayer(group, frames)
        } else {
            Ok(frames)
        }
    }

    fn cosmetic_correct(&mut self, frames: Vec<PathBuf>) -> Step<Vec<PathBuf>> {
        self.checkpoint()?;
        let id = self.config.light.cosmetic_correction_template.clone();
        let template = self.engines.cosmetic.template(&id);
        match template {
            Some(ProcessTemplate::Cosmetic(_)) => {}
            Some(ProcessTemplate::Other(_)) => {
                return Err(self.fail_warning(format!(
                    "The specified icon does not transport an instance of CosmeticCorrection: {id}"
                )))
            }
            None => return Err(self.fail_warning(format!("No such process icon: {id}"))),
        }

        let dir = self.output_dir("calibrated/light/cosmetized")?;
        let request = CosmeticRequest {
            template_id: id,
            frames,
            cfa: self.config.light.cfa_images,
            output: OutputSpec::new(dir, "_cc", &self.config.output_extension),
        };
        let results = match self.engines.cosmetic.correct(&request) {
            Ok(results) => results,
            Err(e) => return Err(self.fail_warning(format!("Cosmetic correction failed: {e}"))),
        };

        let corrected = self.collect_outputs(&request.frames, results, "cosmetic correction");
        if corrected.is_empty() {
            return Err(self.fail_warning(
                "All cosmetic corrected light frame files have been removed or cannot be accessed.",
            ));
        }
        self.log.add_success("Cosmetic Correction OK", "");
        Ok(corrected)
    }

    fn debayer(&mut self, group: &FrameGroup, frames: Vec<PathBuf>) -> Step<Vec<PathBuf>> {
        self.checkpoint()?;
        let dir = self.output_dir("calibrated/light/debayered")?;
        let request = DebayerRequest {
            frames,
            pattern: self.config.light.cfa_pattern,
            method: self.config.light.debayer_method,
            evaluate_noise: self.config.calibration.evaluate_noise,
            output: OutputSpec::new(dir, "_d", &self.config.output_extension),
        };
        let results = match self.engines.debayer.debayer(&request) {
            Ok(results) => results,
            Err(e) => return Err(self.fail_warning(format!("Debayer failed: {e}"))),
        };

        let debayered = self.collect_outputs(&request.frames, results, "image demosaicing");
        if debayered.is_empty() {
            return Err(self.fail_warning(format!(
                "All demosaiced light frame files for group with BINNING = {}, FILTER = {} and EXPOSURE = {} have been removed or cannot be accessed.",
                group.binning,
                group.display_filter(),
                group.exposures_label()
            )));
        }
        self.log.add_success("Debayer OK", "");
        Ok(debayered)
    }

    fn register_and_integrate(&mut self, prepared: &PreparedGroup, reference: &Path) -> Step<()> {
        let group = &prepared.group;
        let registered = self.register(group, &prepared.frames, reference)?;

        if self.config.weighting.generate_weights && self.config.weighting.after_registration {
            self.checkpoint()?;
            let descriptors = compute_descriptors(&registered, &self.engines, &mut self.log);
            let profile = self.config.weighting.profile();
            self.store_weights(&descriptors, &profile);
            self.log
                .add_success("Frame weights computed and stored successfully", "");
        }

        if !self.config.integration.integrate {
            return Ok(());
        }
        match self.integrate_frames(group, registered) {
            Ok(master) => {
                self.log
                    .add_success("Integration OK", format!("master light: {}", master.display()));
                self.light_masters.push(master);
                Ok(())
            }
            Err(StepError::Failed(reason)) => {
                self.log.add_error("Error integrating light frames.");
                self.log.new_line();
                Err(StepError::Failed(format!("Error integrating light frames. {reason}")))
            }
            Err(abort) => Err(abort),
        }
    }

    fn register(&mut self, group: &FrameGroup, frames: &[PathBuf], reference: &Path) -> Step<Vec<PathBuf>> {
        self.checkpoint()?;
        let relative = if group.filter.is_empty() {
            PathBuf::from("registered")
        } else {
            Path::new("registered").join(clean_filter_name(&group.filter))
        };
        let dir = self.output_dir(relative)?;
        let registration = &self.config.registration;
        let request = RegistrationRequest {
            frames: frames.to_vec(),
            reference: reference.to_path_buf(),
            interpolation: registration.interpolation,
            clamping_threshold: registration.clamping_threshold,
            max_stars: (!registration.distortion_correction).then_some(registration.max_stars),
            distortion_correction: registration.distortion_correction,
            noise_reduction: registration.noise_reduction,
            use_triangle_similarity: registration.use_triangle_similarity,
            generate_drizzle_data: registration.generate_drizzle_data,
            output: OutputSpec::new(dir, "_r", &self.config.output_extension),
        };
        debug!(
            frames = frames.len(),
            reference = %reference.display(),
            "Registering light frames"
        );

        let results = match self.engines.registration.align(&request) {
            Ok(results) => results,
            Err(e) => {
                self.log.add_warning("Error registering light frames.");
                return Err(StepError::Failed(format!("Error registering light frames. {e}")));
            }
        };

        let attempted = frames.len();
        let mut registered = Vec::with_capacity(attempted);
        for path in results.into_iter().flatten() {
            if path.exists() {
                registered.push(path);
            } else {
                self.log.add_warning(format!(
                    "File does not exist after image registration: {}",
                    path.display()
                ));
            }
        }

        let failed = attempted.saturating_sub(registered.len());
        if registered.is_empty() {
            return Err(self.fail_error(
                "All registered light frame files have been removed or cannot be accessed.",
            ));
        }
        if registered.len() < MIN_REGISTERED_FRAMES {
            return Err(self.fail_error(format!(
                "Star alignment failed to register {failed} images out of {attempted}. A minimum of {MIN_REGISTERED_FRAMES} images must be successfully registered."
            )));
        }
        if failed > 0 {
            self.log
                .add_warning(format!("Failed to register {failed} images out of {attempted}"));
            self.log.add_success("Registration completed with warnings", "");
        } else {
            self.log.add_success("Registration OK", "");
        }
        info!(registered = registered.len(), attempted, "Registration complete");
        Ok(registered)
    }

    fn store_weights(&mut self, descriptors: &[ImageDescriptor], profile: &WeightProfile) {
        let Some(range) = DescriptorRange::from_descriptors(descriptors) else {
            return;
        };
        let written = write_weights(
            descriptors,
            &range,
            profile,
            self.engines.source.as_ref(),
            self.engines.sink.as_ref(),
            &mut self.log,
        );
        debug!(written, total = descriptors.len(), "Weights stored");
    }

    /// Keep the produced files that exist, in input order. The tracked
    /// reference follows its own output.
    fn collect_outputs(&mut self, inputs: &[PathBuf], results: BatchOutput, step: &str) -> Vec<PathBuf> {
        let mut out = Vec::with_capacity(inputs.len());
        for (input, result) in inputs.iter().zip(results) {
            let Some(path) = result else {
                debug!(input = %input.display(), step, "No output produced");
                continue;
            };
            if !path.exists() {
                self.log.add_warning(format!(
                    "File does not exist after {step}: {}",
                    path.display()
                ));
                continue;
            }
            if self.reference.as_deref() == Some(input.as_path()) {
                self.reference = Some(path.clone());
            }
            out.push(path);
        }
        out
    }

    fn fail_warning(&mut self, reason: impl Into<String>) -> StepError {
        let reason = reason.into();
        self.log.add_warning(reason.clone());
        StepError::Failed(reason)
    }

    fn fail_error(&mut self, reason: impl Into<String>) -> StepError {
        let reason = reason.into();
        self.log.add_error(reason.clone());
        self.log.new_line();
        StepError::Failed(reason)
    }
}
