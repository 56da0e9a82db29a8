//! Pre-flight validation of a run.
//!
//! Errors block the run; warnings need explicit confirmation.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::catalog::{clean_filter_name, FrameCatalog, FrameGroup};
use crate::config::Config;
use crate::consts::{FLAT_DARK_TOLERANCE, MIN_INTEGRATION_FRAMES, WRITE_PROBE_NAME};
use crate::engine::{Engines, ProcessTemplate};
use crate::frame::ImageType;
use crate::rejection::rejection_is_good;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagnosticMessage {
    pub severity: Severity,
    pub text: String,
}

impl fmt::Display for DiagnosticMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Error => write!(f, "*** Error: {}", self.text),
            Severity::Warning => write!(f, "** Warning: {}", self.text),
        }
    }
}

/// Messages of one validation pass, in check order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticReport {
    messages: Vec<DiagnosticMessage>,
}

impl DiagnosticReport {
    pub fn error(&mut self, text: impl Into<String>) {
        self.messages.push(DiagnosticMessage {
            severity: Severity::Error,
            text: text.into(),
        });
    }

    pub fn warning(&mut self, text: impl Into<String>) {
        self.messages.push(DiagnosticMessage {
            severity: Severity::Warning,
            text: text.into(),
        });
    }

    pub fn messages(&self) -> &[DiagnosticMessage] {
        &self.messages
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.severity == Severity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.messages.iter().any(|m| m.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &DiagnosticMessage> {
        self.messages.iter().filter(|m| m.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticMessage> {
        self.messages.iter().filter(|m| m.severity == Severity::Warning)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.messages {
            writeln!(f, "{m}")?;
        }
        Ok(())
    }
}

/// Validate the catalog and configuration before a run.
pub fn run_diagnostics(catalog: &FrameCatalog, config: &Config, engines: &Engines) -> DiagnosticReport {
    let mut report = DiagnosticReport::default();

    check_output_format(&mut report, config, engines);
    check_output_directory(&mut report, &config.output_directory);

    if catalog.is_empty() {
        report.error("No input frames have been specified.");
    }

    for g in catalog.groups() {
        if !g.master_frame && g.len() < MIN_INTEGRATION_FRAMES {
            report.error(format!("Cannot integrate less than {MIN_INTEGRATION_FRAMES} {g}"));
        }
    }

    for g in catalog.groups() {
        for item in &g.items {
            if !item.path.exists() {
                report.error(format!("Nonexistent input file: {}", item.path.display()));
            }
        }
    }

    for g in catalog.groups() {
        if !g.filter.is_empty() && clean_filter_name(&g.filter) != g.filter {
            report.warning(format!(
                "Invalid file name characters will be replaced with underscores in filter name: '{}'",
                g.filter
            ));
        }
    }

    if catalog.has_frames(ImageType::Light) {
        check_cosmetic_correction(&mut report, config, engines);
        check_registration_reference(&mut report, config);
    }

    if !catalog.has_frames(ImageType::Bias) {
        report.warning("No bias frames have been selected.");
    }
    if !catalog.has_frames(ImageType::Dark) {
        report.warning("No dark frames have been selected.");
    }
    if !catalog.has_frames(ImageType::Flat) {
        report.warning("No flat frames have been selected.");
    } else {
        check_flat_darks(&mut report, catalog, config);
    }
    if !catalog.has_frames(ImageType::Light) {
        report.warning("No light frames have been selected.");
    } else {
        check_light_calibration(&mut report, catalog, config);
    }

    check_rejection(&mut report, catalog, config);

    if !config.overscan.is_valid() {
        report.error("Invalid overscan region(s) defined.");
    } else if config.overscan.enabled && !config.overscan.has_regions() {
        report.warning("Overscan correction has been enabled, but no overscan regions have been defined.");
    }

    debug!(
        errors = report.errors().count(),
        warnings = report.warnings().count(),
        "Diagnostics complete"
    );
    report
}

fn check_output_format(report: &mut DiagnosticReport, config: &Config, engines: &Engines) {
    let extension = &config.output_extension;
    let Some(format) = engines.sink.capabilities(extension) else {
        report.error(format!("No installed file format can write {extension} files."));
        return;
    };
    if !format.can_store_float {
        report.error(format!(
            "The {} format cannot store 32-bit floating point image data.",
            format.name
        ));
    }
    if !format.can_store_keywords {
        report.warning(format!("The {} format does not support keywords.", format.name));
    }
    if !format.can_store_properties {
        report.warning(format!("The {} format does not support image properties.", format.name));
    }
    if format.is_deprecated {
        report.warning(format!("Using a deprecated output file format: {}", format.name));
    }
}

fn check_output_directory(report: &mut DiagnosticReport, dir: &Path) {
    if dir.as_os_str().is_empty() {
        report.error("No output directory specified.");
    } else if !dir.is_dir() {
        report.error(format!(
            "The specified output directory does not exist: {}",
            dir.display()
        ));
    } else if probe_writable(dir).is_err() {
        report.error(format!(
            "Cannot access the output directory for writing: {}",
            dir.display()
        ));
    }
}

/// Create and remove a probe file under the first free numeric suffix.
fn probe_writable(dir: &Path) -> std::io::Result<()> {
    let probe: PathBuf = (1u32..)
        .map(|u| dir.join(format!("{WRITE_PROBE_NAME}{u}")))
        .find(|p| !p.exists())
        .unwrap_or_else(|| dir.join(WRITE_PROBE_NAME));
    File::create(&probe)?;
    std::fs::remove_file(&probe)
}

fn check_cosmetic_correction(report: &mut DiagnosticReport, config: &Config, engines: &Engines) {
    let light = &config.light;
    if !light.cosmetic_correction {
        return;
    }
    let id = &light.cosmetic_correction_template;
    if id.is_empty() {
        report.error("No cosmetic correction template instance has been specified.");
        return;
    }
    match engines.cosmetic.template(id) {
        None => report.error(format!("No such process icon: {id}")),
        Some(ProcessTemplate::Other(_)) => report.error(format!(
            "The specified process icon does not transport an instance of CosmeticCorrection: {id}"
        )),
        Some(ProcessTemplate::Cosmetic(template)) => {
            if template.cfa != light.cfa_images {
                report.warning(format!(
                    "The specified CosmeticCorrection instance is not congruent with current settings (CFA Images): {id}"
                ));
            }
            if !template.has_correction() {
                report.warning(format!(
                    "The specified CosmeticCorrection instance does not define a valid correction operation: {id}"
                ));
            }
        }
    }
}

fn check_registration_reference(report: &mut DiagnosticReport, config: &Config) {
    if config.light.calibrate_only || config.weighting.best_reference {
        return;
    }
    match &config.registration.reference_image {
        None => report.error("No registration reference image has been specified."),
        Some(p) if p.as_os_str().is_empty() => {
            report.error("No registration reference image has been specified.")
        }
        Some(p) if !p.exists() => report.error(format!(
            "The specified registration reference file does not exist: {}",
            p.display()
        )),
        Some(_) => {}
    }
}

/// Dark group closest to `exposure` at `binning`: (difference, exposure).
fn best_dark(catalog: &FrameCatalog, binning: u32, exposure: f64) -> Option<(f64, f64)> {
    let mut best: Option<(f64, f64)> = None;
    for g in catalog.sorted() {
        if g.image_type != ImageType::Dark || g.binning != binning {
            continue;
        }
        let d = (g.exposure - exposure).abs();
        match best {
            Some((bd, _)) if d >= bd => {}
            _ => best = Some((d, g.exposure)),
        }
    }
    best
}

fn dark_mismatch_warning(
    report: &mut DiagnosticReport,
    group: &FrameGroup,
    subgroup: &str,
    dark_exposure: f64,
    optimize: bool,
) {
    if optimize {
        report.warning(format!(
            "{group}{subgroup} will be calibrated using an OPTIMIZED master dark with a different exposure of {dark_exposure} sec."
        ));
    } else {
        report.warning(format!(
            "{group}{subgroup} will be calibrated using a master dark with a different exposure of {dark_exposure} sec."
        ));
    }
}

fn check_flat_darks(report: &mut DiagnosticReport, catalog: &FrameCatalog, config: &Config) {
    for flat in catalog
        .groups()
        .iter()
        .filter(|g| g.image_type == ImageType::Flat && !g.master_frame)
    {
        if config.calibration.flat_darks_only {
            let have_dark = flat.exposures.iter().all(|&e| {
                catalog.groups().iter().any(|g| {
                    g.image_type == ImageType::Dark
                        && g.binning == flat.binning
                        && (g.exposure - e).abs() < FLAT_DARK_TOLERANCE
                })
            });
            let have_bias = catalog
                .groups()
                .iter()
                .any(|g| g.image_type == ImageType::Bias && g.binning == flat.binning);
            if !have_dark && !have_bias {
                report.warning(format!("Neither master dark nor master bias found to calibrate {flat}"));
            } else if have_bias && !have_dark {
                report.warning(format!("Only master bias will be used to calibrate {flat}"));
            }
        } else {
            for &exposure in &flat.exposures {
                if let Some((d, dark_exposure)) = best_dark(catalog, flat.binning, exposure) {
                    if d != 0.0 {
                        dark_mismatch_warning(
                            report,
                            flat,
                            "",
                            dark_exposure,
                            config.calibration.optimize_darks,
                        );
                    }
                }
            }
        }
    }
}

fn check_light_calibration(report: &mut DiagnosticReport, catalog: &FrameCatalog, config: &Config) {
    let has_flats = catalog.has_frames(ImageType::Flat);
    for light in catalog.groups().iter().filter(|g| g.image_type == ImageType::Light) {
        for &exposure in &light.exposures {
            if let Some((d, dark_exposure)) = best_dark(catalog, light.binning, exposure) {
                if d != 0.0 {
                    let subgroup = if light.exposures.len() > 1 {
                        format!(" subgroup of lights with exposure time of {exposure}s")
                    } else {
                        String::new()
                    };
                    dark_mismatch_warning(
                        report,
                        light,
                        &subgroup,
                        dark_exposure,
                        config.calibration.optimize_darks,
                    );
                }
            }
        }

        let have_flats = catalog.groups().iter().any(|g| {
            g.image_type == ImageType::Flat && g.binning == light.binning && g.filter == light.filter
        });
        if has_flats && !have_flats {
            report.warning(format!("No matching flat frames have been found to calibrate {light}"));
        }
    }
}

fn check_rejection(report: &mut DiagnosticReport, catalog: &FrameCatalog, config: &Config) {
    for g in catalog.groups() {
        let skip = match g.image_type {
            ImageType::Light => config.light.calibrate_only || !config.integration.integrate,
            _ => g.master_frame,
        };
        if skip {
            continue;
        }
        let selected = config.integration.for_type(g.image_type).rejection;
        // Suboptimal choices are reported too.
        if let Some(reason) = rejection_is_good(selected, g.len()).reason() {
            report.warning(format!("Integration of {g}: {reason}"));
        }
    }
}
