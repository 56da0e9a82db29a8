#[allow(dead_code)]
mod common;

use tempfile::TempDir;

use stackprep_core::catalog::{ForcedValues, FrameCatalog, GroupingPolicy};
use stackprep_core::config::FailureContainment;
use stackprep_core::diagnostics::{run_diagnostics, Severity};
use stackprep_core::frame::ImageType;
use stackprep_core::overscan::Rect;
use stackprep_core::pipeline::PipelineOrchestrator;

use common::{
    engines_for, frame_set, short_dark_session, standard_session, test_config, KeywordSource,
};

fn errors(report: &stackprep_core::diagnostics::DiagnosticReport) -> Vec<String> {
    report.errors().map(|m| m.text.clone()).collect()
}

#[test]
fn test_empty_catalog_reports_missing_input() {
    let output = TempDir::new().unwrap();
    let source = KeywordSource::new();
    let catalog = FrameCatalog::new(GroupingPolicy::default(), source.clone());
    let config = test_config(output.path(), None);

    let report = run_diagnostics(&catalog, &config, &engines_for(source));
    assert_eq!(errors(&report), vec!["No input frames have been specified.".to_string()]);
    for kind in ["bias", "dark", "flat", "light"] {
        let text = format!("No {kind} frames have been selected.");
        assert!(report.warnings().any(|m| m.text == text), "missing: {text}");
    }
}

#[test]
fn test_standard_session_is_runnable() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let session = standard_session(input.path());
    let config = test_config(output.path(), Some(session.lights[0].clone()));

    let report = run_diagnostics(&session.catalog, &config, &engines_for(session.source.clone()));
    assert!(!report.has_errors(), "{report}");
    assert!(report
        .warnings()
        .any(|m| m.text.starts_with("Only master bias will be used to calibrate")));
    assert!(report
        .warnings()
        .any(|m| m.text.contains("master dark with a different exposure of 30 sec.")));
}

#[test]
fn test_missing_output_directory() {
    let input = TempDir::new().unwrap();
    let session = standard_session(input.path());
    let config = test_config(&input.path().join("nowhere"), Some(session.lights[0].clone()));

    let report = run_diagnostics(&session.catalog, &config, &engines_for(session.source.clone()));
    assert!(errors(&report)
        .iter()
        .any(|e| e.starts_with("The specified output directory does not exist")));
}

#[test]
fn test_unsupported_output_format() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let session = standard_session(input.path());
    let mut config = test_config(output.path(), Some(session.lights[0].clone()));
    config.output_extension = ".jpg".to_string();

    let report = run_diagnostics(&session.catalog, &config, &engines_for(session.source.clone()));
    assert_eq!(
        errors(&report),
        vec!["No installed file format can write .jpg files.".to_string()]
    );
}

#[test]
fn test_fits_output_lacks_properties() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let session = standard_session(input.path());
    let mut config = test_config(output.path(), Some(session.lights[0].clone()));
    config.output_extension = ".fits".to_string();

    let report = run_diagnostics(&session.catalog, &config, &engines_for(session.source.clone()));
    assert!(!report.has_errors());
    assert!(report
        .warnings()
        .any(|m| m.text == "The FITS format does not support image properties."));
}

#[test]
fn test_registration_reference_checks() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let session = standard_session(input.path());
    let engines = engines_for(session.source.clone());

    let config = test_config(output.path(), None);
    let report = run_diagnostics(&session.catalog, &config, &engines);
    assert_eq!(
        errors(&report),
        vec!["No registration reference image has been specified.".to_string()]
    );

    let config = test_config(output.path(), Some(input.path().join("gone.fits")));
    let report = run_diagnostics(&session.catalog, &config, &engines);
    assert!(errors(&report)[0].starts_with("The specified registration reference file does not exist"));

    let mut config = test_config(output.path(), None);
    config.weighting.best_reference = true;
    assert!(!run_diagnostics(&session.catalog, &config, &engines).has_errors());

    let mut config = test_config(output.path(), None);
    config.light.calibrate_only = true;
    assert!(!run_diagnostics(&session.catalog, &config, &engines).has_errors());
}

#[test]
fn test_small_groups_cannot_be_integrated() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let source = KeywordSource::new();
    let mut catalog = FrameCatalog::new(GroupingPolicy::default(), source.clone());
    for p in frame_set(input.path(), &source, "bias", 2, ImageType::Bias, "", 1, 0.0) {
        catalog.add_file(&p, &ForcedValues::default());
    }
    let config = test_config(output.path(), None);

    let report = run_diagnostics(&catalog, &config, &engines_for(source.clone()));
    let errs = errors(&report);
    assert_eq!(errs.len(), 1);
    assert!(errs[0].starts_with("Cannot integrate less than 3 "));

    catalog.set_use_as_master(ImageType::Bias, true);
    let report = run_diagnostics(&catalog, &config, &engines_for(source));
    assert!(!report.has_errors(), "{report}");
}

#[test]
fn test_small_raw_group_reported_beside_master_group() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = short_dark_session(input.path());
    let mut config = test_config(output.path(), Some(session.lights[0].clone()));
    config.failure_containment = FailureContainment::Group;
    PipelineOrchestrator::new(config.clone(), engines_for(session.source.clone()))
        .run(&mut session.catalog)
        .unwrap();

    let report = run_diagnostics(&session.catalog, &config, &engines_for(session.source.clone()));
    let small: Vec<_> = errors(&report)
        .into_iter()
        .filter(|e| e.starts_with("Cannot integrate less than 3 "))
        .collect();
    assert_eq!(small.len(), 1, "{report}");
    assert!(small[0].contains("binning = 2"), "{}", small[0]);
}

#[test]
fn test_explicit_rejection_is_reviewed() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let session = standard_session(input.path());
    let mut config = test_config(output.path(), Some(session.lights[0].clone()));
    config.integration.bias.rejection = stackprep_core::rejection::RejectionMethod::MinMax;
    config.integration.light.rejection = stackprep_core::rejection::RejectionMethod::LinearFit;

    let report = run_diagnostics(&session.catalog, &config, &engines_for(session.source.clone()));
    let review: Vec<_> = report
        .warnings()
        .filter(|m| m.text.starts_with("Integration of "))
        .collect();
    assert_eq!(review.len(), 2);
    assert!(review.iter().all(|m| m.severity == Severity::Warning));
}

#[test]
fn test_invalid_overscan_is_an_error() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let session = standard_session(input.path());
    let mut config = test_config(output.path(), Some(session.lights[0].clone()));
    config.overscan.enabled = true;
    let report = run_diagnostics(&session.catalog, &config, &engines_for(session.source.clone()));
    assert!(!report.has_errors());
    assert!(report.warnings().any(|m| m
        .text
        .starts_with("Overscan correction has been enabled, but no overscan regions")));

    config.overscan.regions[0].enabled = true;
    config.overscan.regions[0].source = Rect::new(10, 0, 5, 100);
    let report = run_diagnostics(&session.catalog, &config, &engines_for(session.source.clone()));
    assert_eq!(errors(&report), vec!["Invalid overscan region(s) defined.".to_string()]);
}

#[test]
fn test_cosmetic_template_checks() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let session = standard_session(input.path());
    let mut config = test_config(output.path(), Some(session.lights[0].clone()));
    config.light.cosmetic_correction = true;

    let report = run_diagnostics(&session.catalog, &config, &engines_for(session.source.clone()));
    assert_eq!(
        errors(&report),
        vec!["No cosmetic correction template instance has been specified.".to_string()]
    );

    config.light.cosmetic_correction_template = "CC1".to_string();
    config.light.cfa_images = true;
    let report = run_diagnostics(&session.catalog, &config, &engines_for(session.source.clone()));
    assert!(!report.has_errors());
    assert!(report
        .warnings()
        .any(|m| m.text.contains("not congruent with current settings (CFA Images): CC1")));
}

#[test]
fn test_missing_flat_for_light_group() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = standard_session(input.path());
    for p in frame_set(input.path(), &session.source, "lightg", 3, ImageType::Light, "G", 1, 60.0) {
        session.catalog.add_file(&p, &ForcedValues::default());
    }
    let config = test_config(output.path(), Some(session.lights[0].clone()));
    let report = run_diagnostics(&session.catalog, &config, &engines_for(session.source.clone()));
    assert_eq!(
        report
            .warnings()
            .filter(|m| m.text.starts_with("No matching flat frames have been found"))
            .count(),
        1
    );
}
