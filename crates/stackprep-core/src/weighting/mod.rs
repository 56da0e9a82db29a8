//! Frame quality descriptors, subframe weights and reference selection.

pub mod descriptors;
pub mod noise;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consts::WEIGHT_KEYWORD;
use crate::engine::{ImageSink, ImageSource};
use crate::frame::Keyword;
use crate::log::ProcessLog;

pub use descriptors::{compute_descriptors, describe_image, ImageDescriptor};
pub use noise::{estimate_noise, k_sigma_noise};

/// Relative importance of each descriptor in a subframe weight.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightProfile {
    pub fwhm: f64,
    pub eccentricity: f64,
    pub snr: f64,
    /// Constant added to every weight.
    pub pedestal: f64,
}

impl WeightProfile {
    /// Profile used to rank registration reference candidates: star shape
    /// only, signal ignored.
    pub const REFERENCE: WeightProfile = WeightProfile::new(50.0, 50.0, 0.0, 1.0);

    pub const fn new(fwhm: f64, eccentricity: f64, snr: f64, pedestal: f64) -> Self {
        Self {
            fwhm,
            eccentricity,
            snr,
            pedestal,
        }
    }
}

impl Default for WeightProfile {
    fn default() -> Self {
        Self::new(5.0, 10.0, 20.0, 65.0)
    }
}

/// Named weight profiles for common target kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightingPreset {
    Custom,
    #[default]
    Nebula,
    Galaxy,
    Cluster,
}

impl WeightingPreset {
    /// Fixed profile of the preset; `None` for [`WeightingPreset::Custom`].
    pub fn profile(&self) -> Option<WeightProfile> {
        match self {
            Self::Custom => None,
            Self::Nebula => Some(WeightProfile::new(5.0, 10.0, 20.0, 65.0)),
            Self::Galaxy => Some(WeightProfile::new(20.0, 15.0, 25.0, 40.0)),
            Self::Cluster => Some(WeightProfile::new(35.0, 35.0, 20.0, 10.0)),
        }
    }
}

impl std::fmt::Display for WeightingPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Custom => write!(f, "Custom"),
            Self::Nebula => write!(f, "Nebula"),
            Self::Galaxy => write!(f, "Galaxy"),
            Self::Cluster => write!(f, "Cluster"),
        }
    }
}

/// Per-field extremes of a descriptor set, used for normalization only.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DescriptorRange {
    pub fwhm: (f64, f64),
    pub eccentricity: (f64, f64),
    pub snr: (f64, f64),
    pub noise: (f64, f64),
}

impl DescriptorRange {
    /// `None` for an empty set.
    pub fn from_descriptors<'a, I>(descriptors: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a ImageDescriptor>,
    {
        let mut iter = descriptors.into_iter();
        let first = iter.next()?;
        let seed = |v: f64| (v, v);
        let mut range = Self {
            fwhm: seed(first.fwhm),
            eccentricity: seed(first.eccentricity),
            snr: seed(first.snr),
            noise: seed(first.noise),
        };
        let widen = |r: &mut (f64, f64), v: f64| {
            r.0 = r.0.min(v);
            r.1 = r.1.max(v);
        };
        for d in iter {
            widen(&mut range.fwhm, d.fwhm);
            widen(&mut range.eccentricity, d.eccentricity);
            widen(&mut range.snr, d.snr);
            widen(&mut range.noise, d.noise);
        }
        Some(range)
    }
}

fn normalized(value: f64, (min, max): (f64, f64)) -> f64 {
    if max == min {
        0.0
    } else {
        (value - min) / (max - min)
    }
}

/// Composite weight of one frame. Small FWHM and eccentricity and large SNR
/// score high; a degenerate range contributes nothing, leaving the pedestal.
pub fn compute_weight(
    descriptor: &ImageDescriptor,
    range: &DescriptorRange,
    profile: &WeightProfile,
) -> f64 {
    let fwhm = if range.fwhm.0 == range.fwhm.1 {
        0.0
    } else {
        1.0 - normalized(descriptor.fwhm, range.fwhm)
    };
    let eccentricity = if range.eccentricity.0 == range.eccentricity.1 {
        0.0
    } else {
        1.0 - normalized(descriptor.eccentricity, range.eccentricity)
    };
    let snr = normalized(descriptor.snr, range.snr);
    profile.pedestal + profile.fwhm * fwhm + profile.eccentricity * eccentricity + profile.snr * snr
}

/// Best registration reference across every group's descriptors, scored with
/// [`WeightProfile::REFERENCE`] against the pooled range. The first image
/// with the highest score wins.
pub fn find_registration_reference(per_group: &[Vec<ImageDescriptor>]) -> Option<PathBuf> {
    let pool: Vec<&ImageDescriptor> = per_group.iter().flatten().collect();
    let range = DescriptorRange::from_descriptors(pool.iter().copied())?;

    let mut best: Option<&ImageDescriptor> = None;
    let mut best_weight = 0.0;
    for d in pool {
        let weight = compute_weight(d, &range, &WeightProfile::REFERENCE);
        debug!(path = %d.path.display(), weight, "Reference candidate");
        if best.is_none() || weight > best_weight {
            best = Some(d);
            best_weight = weight;
        }
    }
    best.map(|d| {
        info!(path = %d.path.display(), weight = best_weight, "Registration reference selected");
        d.path.clone()
    })
}

/// Weight value as stored in the header: three decimals, `E`, signed
/// two-digit exponent (`6.500E+01`).
pub fn format_weight(weight: f64) -> String {
    let raw = format!("{weight:.3E}");
    match raw.split_once('E') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(e) => {
                let sign = if e < 0 { '-' } else { '+' };
                format!("{mantissa}E{sign}{:02}", e.abs())
            }
            Err(_) => raw,
        },
        None => raw,
    }
}

/// Store each frame's weight in its `SWWEIGHT` keyword, rewriting the file in
/// place. Returns the number of frames written; every failure is a warning.
pub fn write_weights(
    descriptors: &[ImageDescriptor],
    range: &DescriptorRange,
    profile: &WeightProfile,
    source: &dyn ImageSource,
    sink: &dyn ImageSink,
    log: &mut ProcessLog,
) -> usize {
    let mut written = 0;
    for d in descriptors {
        let weight = compute_weight(d, range, profile);
        if !weight.is_finite() {
            log.add_warning(format!("Invalid weight for {}", d.path.display()));
            continue;
        }
        match write_weight(&d.path, weight, source, sink) {
            Ok(()) => {
                debug!(path = %d.path.display(), weight, "Weight stored");
                written += 1;
            }
            Err(e) => log.add_warning(format!("Unable to store weight: {e}")),
        }
    }
    written
}

fn write_weight(
    path: &Path,
    weight: f64,
    source: &dyn ImageSource,
    sink: &dyn ImageSink,
) -> Result<(), crate::error::ImageError> {
    let mut image = source.open(path)?;
    image.metadata.set_keyword(Keyword::new(
        WEIGHT_KEYWORD,
        format_weight(weight),
        "Subframe weight",
    ));
    sink.write(path, &image)
}
