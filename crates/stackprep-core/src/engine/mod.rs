//! Interfaces of the external engines driven by the pipeline.
//!
//! Every engine call is synchronous and atomic. Engines that process a list
//! of frames return one entry per input, in input order: `Some(path)` for a
//! produced file, `None` for a frame the engine could not process. A call
//! that fails as a whole returns an [`EngineError`].

pub mod passthrough;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::{CfaPattern, Combination, DebayerMethod, PixelInterpolation};
use crate::error::{EngineError, ImageError};
use crate::frame::{Image, ImageMetadata, ImageType, Keyword};
use crate::overscan::Overscan;
use crate::rejection::RejectionMethod;

/// Per-input output paths of a batch engine call.
pub type BatchOutput = Vec<Option<PathBuf>>;

/// Reads images and their header metadata.
pub trait ImageSource: Send + Sync {
    fn open(&self, path: &Path) -> Result<Image, ImageError>;

    /// Header-only read. The default decodes the whole image.
    fn metadata(&self, path: &Path) -> Result<ImageMetadata, ImageError> {
        Ok(self.open(path)?.metadata)
    }
}

/// What an output file format can store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatCapabilities {
    pub name: String,
    pub can_store_float: bool,
    pub can_store_keywords: bool,
    pub can_store_properties: bool,
    pub is_deprecated: bool,
}

/// Writes images back to disk.
pub trait ImageSink: Send + Sync {
    /// Capabilities of the format registered for `extension` (with leading
    /// dot), or `None` when no format can write it.
    fn capabilities(&self, extension: &str) -> Option<FormatCapabilities>;

    fn write(&self, path: &Path, image: &Image) -> Result<(), ImageError>;
}

/// Common output placement of batch engines.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputSpec {
    pub directory: PathBuf,
    pub postfix: String,
    pub extension: String,
}

impl OutputSpec {
    pub fn new(directory: impl Into<PathBuf>, postfix: &str, extension: &str) -> Self {
        Self {
            directory: directory.into(),
            postfix: postfix.to_string(),
            extension: extension.to_string(),
        }
    }

    /// Output path for an input frame: `<dir>/<stem><postfix><extension>`.
    pub fn path_for(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.directory
            .join(format!("{stem}{}{}", self.postfix, self.extension))
    }
}

/// Dark scaling parameters forwarded to calibration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DarkOptimization {
    pub enabled: bool,
    pub low: f64,
    pub window: u32,
    /// Treat darks as CFA data.
    pub force_cfa: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationRequest {
    pub image_type: ImageType,
    pub frames: Vec<PathBuf>,
    pub master_bias: Option<PathBuf>,
    pub master_dark: Option<PathBuf>,
    pub master_flat: Option<PathBuf>,
    pub overscan: Option<Overscan>,
    pub dark_optimization: DarkOptimization,
    pub evaluate_noise: bool,
    pub output: OutputSpec,
}

pub trait CalibrationEngine: Send + Sync {
    fn calibrate(&self, request: &CalibrationRequest) -> Result<BatchOutput, EngineError>;
}

/// Settings carried by a cosmetic correction template.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosmeticTemplate {
    pub cfa: bool,
    pub use_master_dark: bool,
    pub use_auto_detect: bool,
    pub use_defect_list: bool,
}

impl CosmeticTemplate {
    /// At least one correction mode is active.
    pub fn has_correction(&self) -> bool {
        self.use_master_dark || self.use_auto_detect || self.use_defect_list
    }
}

/// A stored process template looked up by identifier.
#[derive(Clone, Debug, PartialEq)]
pub enum ProcessTemplate {
    Cosmetic(CosmeticTemplate),
    /// A template of some other process, named by its kind.
    Other(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CosmeticRequest {
    pub template_id: String,
    pub frames: Vec<PathBuf>,
    pub cfa: bool,
    pub output: OutputSpec,
}

pub trait CosmeticCorrectionEngine: Send + Sync {
    fn template(&self, id: &str) -> Option<ProcessTemplate>;

    fn correct(&self, request: &CosmeticRequest) -> Result<BatchOutput, EngineError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct DebayerRequest {
    pub frames: Vec<PathBuf>,
    pub pattern: CfaPattern,
    pub method: DebayerMethod,
    pub evaluate_noise: bool,
    pub output: OutputSpec,
}

pub trait DebayerEngine: Send + Sync {
    fn debayer(&self, request: &DebayerRequest) -> Result<BatchOutput, EngineError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationRequest {
    pub frames: Vec<PathBuf>,
    pub reference: PathBuf,
    pub interpolation: PixelInterpolation,
    pub clamping_threshold: f64,
    /// Star limit; `None` when distortion correction is enabled.
    pub max_stars: Option<u32>,
    pub distortion_correction: bool,
    pub noise_reduction: u32,
    pub use_triangle_similarity: bool,
    pub generate_drizzle_data: bool,
    pub output: OutputSpec,
}

pub trait RegistrationEngine: Send + Sync {
    fn align(&self, request: &RegistrationRequest) -> Result<BatchOutput, EngineError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Normalization {
    None,
    AdditiveWithScaling,
    Multiplicative,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionNormalization {
    None,
    Scale,
    EqualizeFluxes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WeightScale {
    Mad,
    Ikss,
}

/// Source of per-frame integration weights.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WeightMode {
    DontCare,
    NoiseEvaluation,
    /// Read each frame's weight from the named keyword.
    Keyword(String),
}

/// Clipping bounds of every rejection algorithm.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RejectionParams {
    pub min_max_low: u32,
    pub min_max_high: u32,
    pub percentile_low: f64,
    pub percentile_high: f64,
    pub sigma_low: f64,
    pub sigma_high: f64,
    pub linear_fit_low: f64,
    pub linear_fit_high: f64,
}

/// High large-scale rejection applied to flat integrations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LargeScaleRejection {
    pub protected_layers: u32,
    pub growth: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IntegrationRequest {
    pub image_type: ImageType,
    pub frames: Vec<PathBuf>,
    pub combination: Combination,
    /// Always a concrete algorithm; `Auto` is resolved by the caller.
    pub rejection: RejectionMethod,
    pub rejection_params: RejectionParams,
    pub normalization: Normalization,
    pub rejection_normalization: RejectionNormalization,
    pub weight_scale: WeightScale,
    pub weight_mode: WeightMode,
    pub large_scale_rejection: Option<LargeScaleRejection>,
    /// Range clipping bounds (low, high), when enabled.
    pub range_clip: Option<(f64, f64)>,
    pub evaluate_noise: bool,
    pub generate_rejection_maps: bool,
    /// Keywords prepended to the integrated image header.
    pub keywords: Vec<Keyword>,
    pub output_path: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IntegrationResult {
    pub master: PathBuf,
    pub rejection_maps: Vec<PathBuf>,
}

pub trait IntegrationEngine: Send + Sync {
    fn integrate(&self, request: &IntegrationRequest) -> Result<IntegrationResult, EngineError>;
}

/// One fitted star profile.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StarFit {
    pub x: f64,
    pub y: f64,
    pub sx: f64,
    pub sy: f64,
    pub theta: f64,
    /// Fit residual (mean absolute deviation).
    pub residual: f64,
}

pub trait StarDescriptorEngine: Send + Sync {
    /// Detect and fit the stars of a grayscale image.
    fn detect_stars(&self, image: &Array2<f32>) -> Result<Vec<StarFit>, EngineError>;
}

/// A noise estimate and the fraction of pixels supporting it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseEstimate {
    pub sigma: f64,
    pub support_fraction: f64,
}

pub trait NoiseEstimator: Send + Sync {
    /// Multiresolution estimate at a wavelet layer, `None` when it cannot be
    /// computed.
    fn multiscale(&self, image: &Array2<f32>, layer: u32) -> Option<NoiseEstimate>;

    /// Fallback estimate used when the multiscale estimator does not converge.
    fn k_sigma(&self, image: &Array2<f32>) -> NoiseEstimate;
}

/// Handles to every engine used by a run.
#[derive(Clone)]
pub struct Engines {
    pub source: Arc<dyn ImageSource>,
    pub sink: Arc<dyn ImageSink>,
    pub calibration: Arc<dyn CalibrationEngine>,
    pub cosmetic: Arc<dyn CosmeticCorrectionEngine>,
    pub debayer: Arc<dyn DebayerEngine>,
    pub registration: Arc<dyn RegistrationEngine>,
    pub integration: Arc<dyn IntegrationEngine>,
    pub stars: Arc<dyn StarDescriptorEngine>,
    pub noise: Arc<dyn NoiseEstimator>,
}
