//! Rehearsal engines.
//!
//! These engines do no pixel processing: every batch step copies its inputs
//! to the output layout the real step would produce. A full run with them
//! exercises grouping, master selection, file placement and the stage
//! sequencing against real files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use tracing::{debug, info};

use crate::consts::WEIGHT_KEYWORD;
use crate::error::{EngineError, ImageError};
use crate::frame::Image;
use crate::io::FITS_EXTENSIONS;
use crate::weighting::k_sigma_noise;

use super::{
    BatchOutput, CalibrationEngine, CalibrationRequest, CosmeticCorrectionEngine, CosmeticRequest,
    CosmeticTemplate, DebayerEngine, DebayerRequest, Engines, FormatCapabilities, ImageSink,
    ImageSource, IntegrationEngine, IntegrationRequest, IntegrationResult, NoiseEstimate,
    NoiseEstimator, OutputSpec, ProcessTemplate, RegistrationEngine, RegistrationRequest,
    StarDescriptorEngine, StarFit,
};

fn ensure_dir(engine: &'static str, dir: &Path) -> Result<(), EngineError> {
    std::fs::create_dir_all(dir).map_err(|e| EngineError::Failed {
        engine,
        reason: format!("{}: {e}", dir.display()),
    })
}

/// Copy every frame to its output path; frames that cannot be copied map to
/// `None`.
fn copy_batch(
    engine: &'static str,
    frames: &[PathBuf],
    output: &OutputSpec,
) -> Result<BatchOutput, EngineError> {
    ensure_dir(engine, &output.directory)?;
    let out = frames
        .iter()
        .map(|frame| {
            let target = output.path_for(frame);
            match std::fs::copy(frame, &target) {
                Ok(_) => Some(target),
                Err(e) => {
                    debug!(engine, frame = %frame.display(), error = %e, "Copy failed");
                    None
                }
            }
        })
        .collect();
    Ok(out)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RehearsalCalibration;

impl CalibrationEngine for RehearsalCalibration {
    fn calibrate(&self, request: &CalibrationRequest) -> Result<BatchOutput, EngineError> {
        copy_batch("ImageCalibration", &request.frames, &request.output)
    }
}

/// Cosmetic correction with a single auto-detect template under any
/// non-empty identifier.
#[derive(Clone, Copy, Debug, Default)]
pub struct RehearsalCosmetic {
    pub cfa: bool,
}

impl CosmeticCorrectionEngine for RehearsalCosmetic {
    fn template(&self, id: &str) -> Option<ProcessTemplate> {
        if id.trim().is_empty() {
            return None;
        }
        Some(ProcessTemplate::Cosmetic(CosmeticTemplate {
            cfa: self.cfa,
            use_auto_detect: true,
            ..CosmeticTemplate::default()
        }))
    }

    fn correct(&self, request: &CosmeticRequest) -> Result<BatchOutput, EngineError> {
        copy_batch("CosmeticCorrection", &request.frames, &request.output)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RehearsalDebayer;

impl DebayerEngine for RehearsalDebayer {
    fn debayer(&self, request: &DebayerRequest) -> Result<BatchOutput, EngineError> {
        copy_batch("Debayer", &request.frames, &request.output)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RehearsalRegistration;

impl RegistrationEngine for RehearsalRegistration {
    fn align(&self, request: &RegistrationRequest) -> Result<BatchOutput, EngineError> {
        if !request.reference.exists() {
            return Err(EngineError::Failed {
                engine: "StarAlignment",
                reason: format!("reference not found: {}", request.reference.display()),
            });
        }
        copy_batch("StarAlignment", &request.frames, &request.output)
    }
}

/// Integration that stores the first input frame as the master.
#[derive(Clone, Copy, Debug, Default)]
pub struct RehearsalIntegration;

impl IntegrationEngine for RehearsalIntegration {
    fn integrate(&self, request: &IntegrationRequest) -> Result<IntegrationResult, EngineError> {
        const ENGINE: &str = "ImageIntegration";
        let first = request
            .frames
            .first()
            .ok_or(EngineError::NoOutput { engine: ENGINE })?;
        if let Some(dir) = request.output_path.parent() {
            ensure_dir(ENGINE, dir)?;
        }
        std::fs::copy(first, &request.output_path).map_err(|e| EngineError::Failed {
            engine: ENGINE,
            reason: e.to_string(),
        })?;
        Ok(IntegrationResult {
            master: request.output_path.clone(),
            rejection_maps: Vec::new(),
        })
    }
}

/// Star detector that finds no stars; descriptors reduce to noise and SNR.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStars;

impl StarDescriptorEngine for NoStars {
    fn detect_stars(&self, _image: &Array2<f32>) -> Result<Vec<StarFit>, EngineError> {
        Ok(Vec::new())
    }
}

/// Noise estimator without a multiscale transform.
#[derive(Clone, Copy, Debug, Default)]
pub struct KSigmaNoise;

impl NoiseEstimator for KSigmaNoise {
    fn multiscale(&self, _image: &Array2<f32>, _layer: u32) -> Option<NoiseEstimate> {
        None
    }

    fn k_sigma(&self, image: &Array2<f32>) -> NoiseEstimate {
        k_sigma_noise(image)
    }
}

/// Sink that accepts XISF and FITS output and records weights in the log
/// instead of rewriting files.
#[derive(Clone, Copy, Debug, Default)]
pub struct RehearsalSink;

impl ImageSink for RehearsalSink {
    fn capabilities(&self, extension: &str) -> Option<FormatCapabilities> {
        let extension = extension.to_lowercase();
        if extension == ".xisf" {
            Some(FormatCapabilities {
                name: "XISF".to_string(),
                can_store_float: true,
                can_store_keywords: true,
                can_store_properties: true,
                is_deprecated: false,
            })
        } else if FITS_EXTENSIONS.contains(&extension.as_str()) {
            Some(FormatCapabilities {
                name: "FITS".to_string(),
                can_store_float: true,
                can_store_keywords: true,
                can_store_properties: false,
                is_deprecated: false,
            })
        } else {
            None
        }
    }

    fn write(&self, path: &Path, image: &Image) -> Result<(), ImageError> {
        if !path.exists() {
            return Err(ImageError::NotFound(path.to_path_buf()));
        }
        if let Some(weight) = image.metadata.keyword(WEIGHT_KEYWORD) {
            info!(path = %path.display(), weight = %weight.value, "Rehearsal weight");
        }
        Ok(())
    }
}

/// Rehearsal engine set over `source`.
pub fn rehearsal_engines(source: Arc<dyn ImageSource>, cfa: bool) -> Engines {
    Engines {
        source,
        sink: Arc::new(RehearsalSink),
        calibration: Arc::new(RehearsalCalibration),
        cosmetic: Arc::new(RehearsalCosmetic { cfa }),
        debayer: Arc::new(RehearsalDebayer),
        registration: Arc::new(RehearsalRegistration),
        integration: Arc::new(RehearsalIntegration),
        stars: Arc::new(NoStars),
        noise: Arc::new(KSigmaNoise),
    }
}
