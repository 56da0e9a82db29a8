/// Binning assumed when neither metadata nor the file name provide one.
pub const DEFAULT_BINNING: u32 = 1;

/// Filter name given to flat and light frames without filter information.
pub const DEFAULT_FILTER: &str = "NoFilter";

/// Maximum exposure difference (seconds) between lights sharing a group
/// when lights of different exposure are not grouped together.
pub const LIGHT_EXPOSURE_TOLERANCE: f64 = 0.5;

/// Maximum exposure difference (seconds) for a dark to count as an exact
/// duration match, as required when flats are calibrated with flat darks.
pub const FLAT_DARK_TOLERANCE: f64 = 0.5;

/// Lower bound for the configurable dark grouping tolerance.
pub const MIN_EXPOSURE_TOLERANCE: f64 = 0.01;

/// Exposure assumed for frames of unknown duration when looking up a master
/// dark. Favors the longest available dark, which optimization scales down.
pub const UNKNOWN_EXPOSURE: f64 = 1.0e10;

/// Minimum number of frames accepted by an integration.
pub const MIN_INTEGRATION_FRAMES: usize = 3;

/// Minimum number of frames that must survive registration.
pub const MIN_REGISTERED_FRAMES: usize = 3;

/// Image keyword receiving the computed subframe weight.
pub const WEIGHT_KEYWORD: &str = "SWWEIGHT";

/// Star fits with a residual at or above this value are discarded.
pub const MAX_PSF_RESIDUAL: f64 = 0.1;

/// Scale from sqrt(sx*sy) of a Moffat(beta=4) fit to the FWHM:
/// 2 * sqrt(2^(1/4) - 1).
pub const PSF_FWHM_SCALE: f64 = 0.869_958_884_092_164_5;

/// First wavelet layer tried by the multiscale noise estimator.
pub const NOISE_FIRST_LAYER: u32 = 4;

/// Noise estimation stops before reaching this layer.
pub const NOISE_LAST_LAYER: u32 = 1;

/// Minimum fraction of the image area that must support a multiscale noise
/// estimate for it to be accepted.
pub const NOISE_MIN_SUPPORT_FRACTION: f64 = 0.01;

/// Clipping factor of the k-sigma noise estimator.
pub const KSIGMA_CLIP: f64 = 3.0;

/// Maximum number of clipping passes of the k-sigma noise estimator.
pub const KSIGMA_MAX_ITERATIONS: usize = 10;

/// Upper range clipping bound applied when integrating light frames.
pub const LIGHT_RANGE_HIGH: f64 = 0.98;

/// Lower range clipping bound applied when integrating light frames.
pub const LIGHT_RANGE_LOW: f64 = 0.0;

/// Default output file extension.
pub const DEFAULT_OUTPUT_EXTENSION: &str = ".xisf";

/// Namespace prefix for every persisted session key.
pub const SESSION_KEY_BASE: &str = "StackPrep/";

/// Base name of the probe file used to test output directory writability.
pub const WRITE_PROBE_NAME: &str = "__stackprep_checking__";

/// ITU-R BT.601 luminance coefficient for the red channel.
pub const LUMINANCE_R: f32 = 0.299;

/// ITU-R BT.601 luminance coefficient for the green channel.
pub const LUMINANCE_G: f32 = 0.587;

/// ITU-R BT.601 luminance coefficient for the blue channel.
pub const LUMINANCE_B: f32 = 0.114;
