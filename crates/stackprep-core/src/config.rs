//! Run parameters and their TOML import/export.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::catalog::GroupingPolicy;
use crate::consts::DEFAULT_OUTPUT_EXTENSION;
use crate::error::Result;
use crate::frame::ImageType;
use crate::overscan::Overscan;
use crate::rejection::RejectionMethod;
use crate::weighting::{WeightProfile, WeightingPreset};

/// Every parameter of a preprocessing run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub output_directory: PathBuf,
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
    #[serde(default = "default_true")]
    pub save_process_log: bool,
    /// FITS row order: top-down when set, bottom-up otherwise.
    #[serde(default = "default_true")]
    pub up_bottom_fits: bool,
    #[serde(default)]
    pub failure_containment: FailureContainment,
    #[serde(default)]
    pub grouping: GroupingPolicy,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub light: LightConfig,
    #[serde(default)]
    pub weighting: WeightingConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub integration: IntegrationConfig,
    #[serde(default)]
    pub overscan: Overscan,
}

fn default_true() -> bool {
    true
}

fn default_output_extension() -> String {
    DEFAULT_OUTPUT_EXTENSION.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::new(),
            output_extension: default_output_extension(),
            save_process_log: true,
            up_bottom_fits: true,
            failure_containment: FailureContainment::default(),
            grouping: GroupingPolicy::default(),
            calibration: CalibrationConfig::default(),
            light: LightConfig::default(),
            weighting: WeightingConfig::default(),
            registration: RegistrationConfig::default(),
            integration: IntegrationConfig::default(),
            overscan: Overscan::default(),
        }
    }
}

/// How far a failed engine step reaches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureContainment {
    /// Skip the failing group; later groups of the same stage still run.
    Group,
    /// End the failing stage; later stages still run without its output.
    #[default]
    Stage,
    /// End the whole run.
    Run,
}

impl std::fmt::Display for FailureContainment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Group => write!(f, "Group"),
            Self::Stage => write!(f, "Stage"),
            Self::Run => write!(f, "Run"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default = "default_true")]
    pub optimize_darks: bool,
    /// Low threshold for dark optimization, in sigma units.
    #[serde(default = "default_dark_optimization_low")]
    pub dark_optimization_low: f64,
    #[serde(default = "default_dark_optimization_window")]
    pub dark_optimization_window: u32,
    #[serde(default = "default_true")]
    pub evaluate_noise: bool,
    /// Calibrate flats only with darks of the exact flat exposure.
    #[serde(default = "default_true")]
    pub flat_darks_only: bool,
}

fn default_dark_optimization_low() -> f64 {
    3.0
}

fn default_dark_optimization_window() -> u32 {
    1024
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            optimize_darks: true,
            dark_optimization_low: default_dark_optimization_low(),
            dark_optimization_window: default_dark_optimization_window(),
            evaluate_noise: true,
            flat_darks_only: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebayerMethod {
    SuperPixel,
    Bilinear,
    #[default]
    Vng,
}

impl std::fmt::Display for DebayerMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SuperPixel => write!(f, "SuperPixel"),
            Self::Bilinear => write!(f, "Bilinear"),
            Self::Vng => write!(f, "VNG"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfaPattern {
    #[default]
    Auto,
    Rggb,
    Bggr,
    Gbrg,
    Grbg,
}

/// Light-frame processing between calibration and registration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LightConfig {
    /// Stop after calibration (and cosmetic correction / debayering).
    #[serde(default)]
    pub calibrate_only: bool,
    #[serde(default)]
    pub cosmetic_correction: bool,
    #[serde(default)]
    pub cosmetic_correction_template: String,
    /// Lights are mosaiced color (CFA) images and must be debayered.
    #[serde(default)]
    pub cfa_images: bool,
    #[serde(default)]
    pub debayer_method: DebayerMethod,
    #[serde(default)]
    pub cfa_pattern: CfaPattern,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightingConfig {
    #[serde(default)]
    pub preset: WeightingPreset,
    #[serde(default)]
    pub generate_weights: bool,
    /// Compute weights on registered rather than calibrated frames.
    #[serde(default)]
    pub after_registration: bool,
    /// Select the registration reference automatically across all light groups.
    #[serde(default)]
    pub best_reference: bool,
    /// Weights used when `preset` is [`WeightingPreset::Custom`].
    #[serde(default)]
    pub custom: WeightProfile,
}

impl Default for WeightingConfig {
    fn default() -> Self {
        Self {
            preset: WeightingPreset::default(),
            generate_weights: false,
            after_registration: false,
            best_reference: false,
            custom: WeightProfile::default(),
        }
    }
}

impl WeightingConfig {
    /// The profile selected by `preset`.
    pub fn profile(&self) -> WeightProfile {
        self.preset.profile().unwrap_or(self.custom)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelInterpolation {
    #[default]
    Auto,
    NearestNeighbor,
    Bilinear,
    BicubicSpline,
    Lanczos3,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Fixed reference frame; ignored when the best reference is selected
    /// automatically.
    #[serde(default)]
    pub reference_image: Option<PathBuf>,
    #[serde(default)]
    pub interpolation: PixelInterpolation,
    #[serde(default = "default_clamping_threshold")]
    pub clamping_threshold: f64,
    #[serde(default = "default_max_stars")]
    pub max_stars: u32,
    #[serde(default)]
    pub distortion_correction: bool,
    #[serde(default)]
    pub noise_reduction: u32,
    #[serde(default = "default_true")]
    pub use_triangle_similarity: bool,
    #[serde(default = "default_true")]
    pub generate_drizzle_data: bool,
}

fn default_clamping_threshold() -> f64 {
    0.3
}

fn default_max_stars() -> u32 {
    500
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            reference_image: None,
            interpolation: PixelInterpolation::default(),
            clamping_threshold: default_clamping_threshold(),
            max_stars: default_max_stars(),
            distortion_correction: false,
            noise_reduction: 0,
            use_triangle_similarity: true,
            generate_drizzle_data: true,
        }
    }
}

/// Pixel combination operation of an integration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combination {
    #[default]
    Average,
    Median,
    Minimum,
    Maximum,
}

impl std::fmt::Display for Combination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Average => write!(f, "Average"),
            Self::Median => write!(f, "Median"),
            Self::Minimum => write!(f, "Minimum"),
            Self::Maximum => write!(f, "Maximum"),
        }
    }
}

/// Integration settings of one frame type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeIntegration {
    #[serde(default)]
    pub combination: Combination,
    #[serde(default)]
    pub rejection: RejectionMethod,
    #[serde(default = "default_min_max")]
    pub min_max_low: u32,
    #[serde(default = "default_min_max")]
    pub min_max_high: u32,
    #[serde(default = "default_percentile_low")]
    pub percentile_low: f64,
    #[serde(default = "default_percentile_high")]
    pub percentile_high: f64,
    #[serde(default = "default_sigma_low")]
    pub sigma_low: f64,
    #[serde(default = "default_sigma_high")]
    pub sigma_high: f64,
    #[serde(default = "default_linear_fit_low")]
    pub linear_fit_low: f64,
    #[serde(default = "default_linear_fit_high")]
    pub linear_fit_high: f64,
}

fn default_min_max() -> u32 {
    1
}
fn default_percentile_low() -> f64 {
    0.2
}
fn default_percentile_high() -> f64 {
    0.1
}
fn default_sigma_low() -> f64 {
    4.0
}
fn default_sigma_high() -> f64 {
    3.0
}
fn default_linear_fit_low() -> f64 {
    5.0
}
fn default_linear_fit_high() -> f64 {
    3.5
}

impl Default for TypeIntegration {
    fn default() -> Self {
        Self {
            combination: Combination::Average,
            rejection: RejectionMethod::Auto,
            min_max_low: default_min_max(),
            min_max_high: default_min_max(),
            percentile_low: default_percentile_low(),
            percentile_high: default_percentile_high(),
            sigma_low: default_sigma_low(),
            sigma_high: default_sigma_high(),
            linear_fit_low: default_linear_fit_low(),
            linear_fit_high: default_linear_fit_high(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Integrate registered lights into master lights.
    #[serde(default = "default_true")]
    pub integrate: bool,
    #[serde(default = "default_true")]
    pub generate_rejection_maps: bool,
    #[serde(default)]
    pub flats_large_scale_rejection: bool,
    #[serde(default = "default_large_scale")]
    pub flats_large_scale_layers: u32,
    #[serde(default = "default_large_scale")]
    pub flats_large_scale_growth: u32,
    #[serde(default)]
    pub bias: TypeIntegration,
    #[serde(default)]
    pub dark: TypeIntegration,
    #[serde(default)]
    pub flat: TypeIntegration,
    #[serde(default)]
    pub light: TypeIntegration,
}

fn default_large_scale() -> u32 {
    2
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            integrate: true,
            generate_rejection_maps: true,
            flats_large_scale_rejection: false,
            flats_large_scale_layers: default_large_scale(),
            flats_large_scale_growth: default_large_scale(),
            bias: TypeIntegration::default(),
            dark: TypeIntegration::default(),
            flat: TypeIntegration::default(),
            light: TypeIntegration::default(),
        }
    }
}

impl IntegrationConfig {
    /// Settings of a frame type. Unknown frames use the light settings.
    pub fn for_type(&self, image_type: ImageType) -> &TypeIntegration {
        match image_type {
            ImageType::Bias => &self.bias,
            ImageType::Dark => &self.dark,
            ImageType::Flat => &self.flat,
            ImageType::Light | ImageType::Unknown => &self.light,
        }
    }

    pub fn for_type_mut(&mut self, image_type: ImageType) -> &mut TypeIntegration {
        match image_type {
            ImageType::Bias => &mut self.bias,
            ImageType::Dark => &mut self.dark,
            ImageType::Flat => &mut self.flat,
            ImageType::Light | ImageType::Unknown => &mut self.light,
        }
    }
}

/// Serialize parameters to TOML.
pub fn export_parameters(config: &Config) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

/// Parse parameters from TOML. Missing entries take their defaults.
pub fn import_parameters(text: &str) -> Result<Config> {
    Ok(toml::from_str(text)?)
}
