//! Master frame lookup and per-exposure calibration planning.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::catalog::{FrameCatalog, FrameGroup};
use crate::consts::{FLAT_DARK_TOLERANCE, UNKNOWN_EXPOSURE};
use crate::frame::ImageType;

/// A master dark chosen for a calibration.
#[derive(Clone, Debug, PartialEq)]
pub struct MasterDark {
    pub path: PathBuf,
    /// Representative exposure of the master dark group.
    pub exposure: f64,
}

fn master_groups(
    catalog: &FrameCatalog,
    image_type: ImageType,
    binning: u32,
) -> impl Iterator<Item = &FrameGroup> {
    catalog
        .sorted()
        .into_iter()
        .filter(move |g| g.master_frame && g.image_type == image_type && g.binning == binning)
}

/// Find the master dark best matching `exposure` at `binning`.
///
/// A non-positive exposure is treated as unknown and resolves to the longest
/// dark available. With `exact`, only darks within 0.5 s are accepted, and
/// among those the nearest one is used rather than whichever comes last.
/// Candidates are visited in display order (longest exposure first) and only
/// a strictly smaller difference replaces the current choice, so of two
/// equally distant darks the longer one wins.
pub fn master_dark(
    catalog: &FrameCatalog,
    binning: u32,
    exposure: f64,
    exact: bool,
) -> Option<MasterDark> {
    let binning = binning.max(1);
    let exposure = if exposure > 0.0 {
        exposure
    } else {
        UNKNOWN_EXPOSURE
    };

    let mut found: Option<MasterDark> = None;
    let mut best = f64::INFINITY;
    for group in master_groups(catalog, ImageType::Dark, binning) {
        let Some(path) = group.master_path() else {
            continue;
        };
        let d = (group.exposure - exposure).abs();
        if d < best && (!exact || d < FLAT_DARK_TOLERANCE) {
            found = Some(MasterDark {
                path: path.to_path_buf(),
                exposure: group.exposure,
            });
            if d == 0.0 {
                break;
            }
            best = d;
        }
    }

    if let Some(dark) = &found {
        debug!(
            requested = exposure,
            found = dark.exposure,
            exact,
            "Master dark selected"
        );
    }
    found
}

/// First master bias at `binning`.
pub fn master_bias(catalog: &FrameCatalog, binning: u32) -> Option<PathBuf> {
    master_groups(catalog, ImageType::Bias, binning.max(1))
        .find_map(|g| g.master_path().map(Path::to_path_buf))
}

/// First master flat at `binning` for `filter`.
pub fn master_flat(catalog: &FrameCatalog, binning: u32, filter: &str) -> Option<PathBuf> {
    master_groups(catalog, ImageType::Flat, binning.max(1))
        .filter(|g| g.filter == filter)
        .find_map(|g| g.master_path().map(Path::to_path_buf))
}

/// How a calibration subgroup is processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationMode {
    /// Every master found is applied.
    Full,
    /// An exact-duration dark was required but only a master bias exists.
    BiasOnly,
    /// Nothing usable exists; frames continue uncalibrated.
    Skip,
}

/// One calibration call: the frames of a single exposure and their masters.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationPlan {
    pub exposure: f64,
    pub frames: Vec<PathBuf>,
    pub master_bias: Option<PathBuf>,
    pub master_dark: Option<MasterDark>,
    pub master_flat: Option<PathBuf>,
    pub mode: CalibrationMode,
    /// Position of the registration reference frame in `frames`.
    pub reference_index: Option<usize>,
}

/// Split `group` by exact exposure (in order of first appearance) and
/// resolve the masters of each subgroup.
///
/// Flats calibrated under `flat_darks_only` need a dark of their exact
/// exposure; without it they fall back to bias-only calibration, or are
/// skipped when no bias exists either. Only lights receive a master flat.
pub fn plan_calibration(
    catalog: &FrameCatalog,
    group: &FrameGroup,
    flat_darks_only: bool,
    reference: Option<&Path>,
) -> Vec<CalibrationPlan> {
    let mut subgroups: Vec<(f64, Vec<PathBuf>)> = Vec::new();
    for item in &group.items {
        match subgroups.iter_mut().find(|(e, _)| *e == item.exposure) {
            Some((_, frames)) => frames.push(item.path.clone()),
            None => subgroups.push((item.exposure, vec![item.path.clone()])),
        }
    }

    let exact = group.image_type == ImageType::Flat && flat_darks_only;
    let master_bias = master_bias(catalog, group.binning);
    let master_flat = if group.image_type == ImageType::Light {
        master_flat(catalog, group.binning, &group.filter)
    } else {
        None
    };

    subgroups
        .into_iter()
        .map(|(exposure, frames)| {
            let master_dark = master_dark(catalog, group.binning, exposure, exact);
            let mode = match (exact, &master_dark, &master_bias) {
                (true, None, None) => CalibrationMode::Skip,
                (true, None, Some(_)) => CalibrationMode::BiasOnly,
                _ => CalibrationMode::Full,
            };
            let reference_index = reference.and_then(|r| frames.iter().position(|f| f == r));
            CalibrationPlan {
                exposure,
                frames,
                master_bias: master_bias.clone(),
                master_dark,
                master_flat: master_flat.clone(),
                mode,
                reference_index,
            }
        })
        .collect()
}
