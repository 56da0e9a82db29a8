use std::path::PathBuf;

use tracing::{debug, info};

use crate::catalog::{clean_filter_name, FrameGroup};
use crate::consts::{LIGHT_RANGE_HIGH, LIGHT_RANGE_LOW, MIN_INTEGRATION_FRAMES, WEIGHT_KEYWORD};
use crate::engine::{
    IntegrationRequest, LargeScaleRejection, Normalization, RejectionNormalization,
    RejectionParams, WeightMode, WeightScale,
};
use crate::frame::{ImageType, Keyword};
use crate::rejection::RejectionMethod;

use super::orchestrator::{PipelineOrchestrator, Step, StepError};

/// File name of an integrated master:
/// `<type>[-FILTER_<filter>]-BINNING_<n>[-EXPTIME_<seconds>]<extension>`.
pub fn master_file_name(
    image_type: ImageType,
    filter: &str,
    binning: u32,
    exposure: f64,
    extension: &str,
) -> String {
    let mut name = image_type.name().to_string();
    if !filter.is_empty() {
        name.push_str(&format!("-FILTER_{}", clean_filter_name(filter)));
    }
    name.push_str(&format!("-BINNING_{binning}"));
    if exposure > 0.0 {
        name.push_str(&format!("-EXPTIME_{exposure}"));
    }
    name.push_str(extension);
    name
}

/// Header keywords prepended to an integrated master.
pub fn master_keywords(image_type: ImageType, filter: &str, binning: u32, exposure: f64) -> Vec<Keyword> {
    let mut keywords = vec![
        Keyword::new("COMMENT", "", "StackPrep image preprocessing pipeline"),
        Keyword::new(
            "COMMENT",
            "",
            format!("Master frame generated with stackprep v{}", env!("CARGO_PKG_VERSION")),
        ),
        Keyword::new("IMAGETYP", image_type.master_keyword_value(), "Type of image"),
    ];
    if !filter.is_empty() {
        keywords.push(Keyword::new("FILTER", filter, "Filter used when taking image"));
    }
    keywords.push(Keyword::new(
        "XBINNING",
        binning.to_string(),
        "Binning factor, horizontal axis",
    ));
    keywords.push(Keyword::new(
        "YBINNING",
        binning.to_string(),
        "Binning factor, vertical axis",
    ));
    if exposure > 0.0 {
        keywords.push(Keyword::new(
            "EXPTIME",
            format!("{exposure:.2}"),
            "Exposure time in seconds",
        ));
    }
    keywords
}

/// Normalization, rejection normalization and weight scale of a frame type.
fn normalization_for(image_type: ImageType) -> (Normalization, RejectionNormalization, WeightScale) {
    match image_type {
        ImageType::Light => (
            Normalization::AdditiveWithScaling,
            RejectionNormalization::Scale,
            WeightScale::Ikss,
        ),
        ImageType::Flat => (
            Normalization::Multiplicative,
            RejectionNormalization::EqualizeFluxes,
            WeightScale::Ikss,
        ),
        _ => (Normalization::None, RejectionNormalization::None, WeightScale::Mad),
    }
}

impl PipelineOrchestrator {
    /// Integrate `frames` into the master of `group`. Returns the master path.
    pub(super) fn integrate_frames(&mut self, group: &FrameGroup, frames: Vec<PathBuf>) -> Step<PathBuf> {
        self.checkpoint()?;
        let image_type = group.image_type;
        if frames.len() < MIN_INTEGRATION_FRAMES {
            self.log.add_warning("Cannot integrate less than three frames.");
            return Err(StepError::Failed(format!(
                "{} frames available, {MIN_INTEGRATION_FRAMES} required",
                frames.len()
            )));
        }

        let settings = self.config.integration.for_type(image_type);
        let rejection = settings.rejection.resolve(frames.len());
        if settings.rejection == RejectionMethod::Auto {
            self.log
                .add_message(format!("Rejection method auto-selected: {rejection}"));
        }
        let rejection_params = RejectionParams {
            min_max_low: settings.min_max_low,
            min_max_high: settings.min_max_high,
            percentile_low: settings.percentile_low,
            percentile_high: settings.percentile_high,
            sigma_low: settings.sigma_low,
            sigma_high: settings.sigma_high,
            linear_fit_low: settings.linear_fit_low,
            linear_fit_high: settings.linear_fit_high,
        };
        let (normalization, rejection_normalization, weight_scale) = normalization_for(image_type);

        let integration = &self.config.integration;
        let is_light = image_type == ImageType::Light;
        let weight_mode = match (is_light, self.config.weighting.generate_weights) {
            (true, true) => WeightMode::Keyword(WEIGHT_KEYWORD.to_string()),
            (true, false) => WeightMode::NoiseEvaluation,
            _ => WeightMode::DontCare,
        };
        let large_scale_rejection = (image_type == ImageType::Flat
            && integration.flats_large_scale_rejection)
            .then_some(LargeScaleRejection {
                protected_layers: integration.flats_large_scale_layers,
                growth: integration.flats_large_scale_growth,
            });

        let master_dir = self.output_dir("master")?;
        let output_path = master_dir.join(master_file_name(
            image_type,
            &group.filter,
            group.binning,
            group.exposure,
            &self.config.output_extension,
        ));

        let request = IntegrationRequest {
            image_type,
            frames,
            combination: settings.combination,
            rejection,
            rejection_params,
            normalization,
            rejection_normalization,
            weight_scale,
            weight_mode,
            large_scale_rejection,
            range_clip: is_light.then_some((LIGHT_RANGE_LOW, LIGHT_RANGE_HIGH)),
            evaluate_noise: is_light && self.config.calibration.evaluate_noise,
            generate_rejection_maps: integration.generate_rejection_maps,
            keywords: master_keywords(image_type, &group.filter, group.binning, group.exposure),
            output_path,
        };
        debug!(
            %image_type,
            frames = request.frames.len(),
            %rejection,
            output = %request.output_path.display(),
            "Integrating"
        );

        let result = self
            .engines
            .integration
            .integrate(&request)
            .map_err(|e| StepError::Failed(e.to_string()))?;
        if !result.master.exists() {
            return Err(StepError::Failed(format!(
                "Integrated master not found: {}",
                result.master.display()
            )));
        }
        info!(
            %image_type,
            master = %result.master.display(),
            rejection_maps = result.rejection_maps.len(),
            "Integration complete"
        );
        Ok(result.master)
    }
}
