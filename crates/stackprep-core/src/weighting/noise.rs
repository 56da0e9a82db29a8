use ndarray::Array2;
use tracing::warn;

use crate::consts::{
    KSIGMA_CLIP, KSIGMA_MAX_ITERATIONS, NOISE_FIRST_LAYER, NOISE_LAST_LAYER,
    NOISE_MIN_SUPPORT_FRACTION,
};
use crate::engine::{NoiseEstimate, NoiseEstimator};

/// Estimate the noise of a grayscale image.
///
/// The multiscale estimator is tried at layers 4, 3 and 2; the first layer
/// whose support covers at least 1% of the image is accepted. Without
/// convergence the k-sigma estimate is returned.
pub fn estimate_noise(image: &Array2<f32>, estimator: &dyn NoiseEstimator) -> NoiseEstimate {
    let mut layer = NOISE_FIRST_LAYER;
    while layer > NOISE_LAST_LAYER {
        if let Some(estimate) = estimator.multiscale(image, layer) {
            if estimate.support_fraction >= NOISE_MIN_SUPPORT_FRACTION {
                return estimate;
            }
        }
        layer -= 1;
    }
    warn!("No convergence in multiscale noise evaluation, using k-sigma noise estimate");
    estimator.k_sigma(image)
}

/// Iterative k-sigma clipped standard deviation of all pixels.
///
/// Each pass rejects values farther than 3 sigma from the mean of the values
/// kept so far, until nothing changes.
pub fn k_sigma_noise(image: &Array2<f32>) -> NoiseEstimate {
    let values: Vec<f32> = image.iter().copied().collect();
    if values.is_empty() {
        return NoiseEstimate {
            sigma: 0.0,
            support_fraction: 0.0,
        };
    }
    let mut mask = vec![true; values.len()];

    let mut sigma = 0.0;
    for _ in 0..KSIGMA_MAX_ITERATIONS {
        let (mean, stddev) = mean_stddev(&values, &mask);
        sigma = stddev;
        if stddev < 1e-10 {
            break;
        }
        let lo = mean - KSIGMA_CLIP * stddev;
        let hi = mean + KSIGMA_CLIP * stddev;
        let mut changed = false;
        for (v, keep) in values.iter().zip(mask.iter_mut()) {
            let v = *v as f64;
            if *keep && (v < lo || v > hi) {
                *keep = false;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let kept = mask.iter().filter(|&&m| m).count();
    NoiseEstimate {
        sigma,
        support_fraction: kept as f64 / values.len() as f64,
    }
}

fn mean_stddev(values: &[f32], mask: &[bool]) -> (f64, f64) {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for (&v, &m) in values.iter().zip(mask.iter()) {
        if m {
            sum += v as f64;
            count += 1;
        }
    }
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;
    let mut var_sum = 0.0f64;
    for (&v, &m) in values.iter().zip(mask.iter()) {
        if m {
            let d = v as f64 - mean;
            var_sum += d * d;
        }
    }
    (mean, (var_sum / count as f64).sqrt())
}
