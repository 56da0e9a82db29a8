use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consts::{MAX_PSF_RESIDUAL, PSF_FWHM_SCALE};
use crate::engine::{Engines, NoiseEstimate, StarFit};
use crate::log::ProcessLog;

use super::noise::estimate_noise;

/// Quality measurements of one image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub path: PathBuf,
    /// Median star FWHM in pixels.
    pub fwhm: f64,
    pub eccentricity: f64,
    pub snr: f64,
    pub noise: f64,
}

/// Median of `values`; 0 for an empty slice. Sorts in place.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

/// Fits usable for measurement: residual below the limit, one fit per
/// star position (rounded to whole pixels).
pub fn select_star_fits(fits: &[StarFit]) -> Vec<StarFit> {
    let mut kept: Vec<StarFit> = fits
        .iter()
        .filter(|f| f.residual < MAX_PSF_RESIDUAL && f.sx > 0.0 && f.sy > 0.0)
        .copied()
        .collect();
    let key = |f: &StarFit| (f.x.round() as i64, f.y.round() as i64);
    kept.sort_by_key(key);
    kept.dedup_by_key(|f| key(f));
    kept
}

/// FWHM of a fit set: median sqrt(sx*sy) scaled to a full width.
pub fn fwhm_of(fits: &[StarFit]) -> f64 {
    let mut widths: Vec<f64> = fits.iter().map(|f| (f.sx * f.sy).sqrt()).collect();
    PSF_FWHM_SCALE * median(&mut widths)
}

/// Median eccentricity sqrt(1 - (sy/sx)^2) of a fit set.
pub fn eccentricity_of(fits: &[StarFit]) -> f64 {
    let mut values: Vec<f64> = fits
        .iter()
        .map(|f| {
            let ratio = f.sy / f.sx;
            (1.0 - ratio * ratio).max(0.0).sqrt()
        })
        .collect();
    median(&mut values)
}

/// Mean absolute deviation from the median.
pub fn average_deviation(image: &Array2<f32>) -> f64 {
    if image.is_empty() {
        return 0.0;
    }
    let mut values: Vec<f64> = image.iter().map(|&v| v as f64).collect();
    let m = median(&mut values);
    values.iter().map(|v| (v - m).abs()).sum::<f64>() / values.len() as f64
}

/// Build the descriptor of one grayscale image from its star fits and noise.
pub fn describe_image(
    path: &Path,
    image: &Array2<f32>,
    stars: &[StarFit],
    noise: NoiseEstimate,
) -> ImageDescriptor {
    let fits = select_star_fits(stars);
    let dispersion = average_deviation(image);
    let snr = if noise.sigma != 0.0 {
        (dispersion / noise.sigma).powi(2)
    } else {
        0.0
    };
    ImageDescriptor {
        path: path.to_path_buf(),
        fwhm: fwhm_of(&fits),
        eccentricity: eccentricity_of(&fits),
        snr,
        noise: noise.sigma,
    }
}

/// Measure every image in turn. Each image is released before the next is
/// opened; unreadable images are skipped with a warning.
pub fn compute_descriptors(
    paths: &[PathBuf],
    engines: &Engines,
    log: &mut ProcessLog,
) -> Vec<ImageDescriptor> {
    let mut descriptors = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        debug!(index = i + 1, total = paths.len(), path = %path.display(), "Computing descriptors");
        let gray = match engines.source.open(path) {
            Ok(image) => image.luminance(),
            Err(e) => {
                log.add_warning(format!("Unable to read image: {} ({e})", path.display()));
                continue;
            }
        };
        let stars = match engines.stars.detect_stars(&gray) {
            Ok(stars) => stars,
            Err(e) => {
                log.add_warning(format!("Star detection failed for {}: {e}", path.display()));
                Vec::new()
            }
        };
        let noise = estimate_noise(&gray, engines.noise.as_ref());
        let descriptor = describe_image(path, &gray, &stars, noise);
        info!(
            path = %path.display(),
            fwhm = descriptor.fwhm,
            eccentricity = descriptor.eccentricity,
            snr = descriptor.snr,
            "Image descriptor"
        );
        descriptors.push(descriptor);
    }
    descriptors
}
