#[allow(dead_code)]
mod common;

use std::sync::Arc;

use tempfile::TempDir;

use stackprep_core::catalog::{ForcedValues, FrameCatalog, GroupingPolicy};
use stackprep_core::config::FailureContainment;
use stackprep_core::error::PrepError;
use stackprep_core::frame::ImageType;
use stackprep_core::pipeline::{
    master_file_name, master_keywords, PipelineOrchestrator, PipelineStage, RunState,
    StageOutcome,
};

use common::{
    dark_groups, engines_for, frame_set, short_dark_session, standard_session, test_config,
    CallOrder, FailingIntegration, KeywordSource, LossyRegistration, RecordingCalibration,
    RecordingReporter,
};

// ---------------------------------------------------------------------------
// Full runs
// ---------------------------------------------------------------------------

#[test]
fn test_full_rehearsal_run() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = standard_session(input.path());
    let config = test_config(output.path(), Some(session.lights[0].clone()));

    let mut orchestrator = PipelineOrchestrator::new(config, engines_for(session.source.clone()));
    let summary = orchestrator.run(&mut session.catalog).unwrap();

    for stage in PipelineStage::ALL {
        assert_eq!(summary.outcome(stage), Some(&StageOutcome::Completed), "{stage}");
    }
    assert_eq!(orchestrator.state(), RunState::Done);

    let master = output.path().join("master");
    let produced: Vec<_> = summary.masters.iter().map(|m| m.path.clone()).collect();
    assert_eq!(
        produced,
        vec![
            master.join("bias-BINNING_1.xisf"),
            master.join("dark-BINNING_1-EXPTIME_30.xisf"),
            master.join("flat-FILTER_R-BINNING_1-EXPTIME_2.xisf"),
        ]
    );
    for path in &produced {
        assert!(path.exists(), "{}", path.display());
    }
    assert_eq!(
        summary.light_masters,
        vec![master.join("light-FILTER_R-BINNING_1-EXPTIME_60.xisf")]
    );

    assert_eq!(
        summary.reference,
        Some(output.path().join("calibrated/light/light_000_c.xisf"))
    );
    assert!(output
        .path()
        .join("registered/R/light_009_c_r.xisf")
        .exists());

    // Flats have no dark of their own exposure.
    assert!(summary
        .log
        .contains("Flat frames will be calibrated only with master bias"));
    assert!(summary.log.contains("Rejection method auto-selected: Percentile Clipping"));
    assert!(summary.log.contains("Registration OK"));
    assert!(!summary.log.has_errors());
    assert!(summary.log_file.is_none());
}

#[test]
fn test_masters_are_installed_in_catalog() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = standard_session(input.path());
    let config = test_config(output.path(), Some(session.lights[0].clone()));

    PipelineOrchestrator::new(config, engines_for(session.source.clone()))
        .run(&mut session.catalog)
        .unwrap();

    for g in session.catalog.groups() {
        assert_eq!(g.master_frame, g.image_type != ImageType::Light, "{g}");
    }
    // Promotion is per group; the type-wide master setting stays untouched.
    let masters = session.catalog.masters();
    assert!(!masters.bias && !masters.dark && !masters.flat);
    let flat = session
        .catalog
        .groups()
        .iter()
        .find(|g| g.image_type == ImageType::Flat)
        .unwrap();
    assert!(flat.master_frame);
    assert!(flat
        .master_path()
        .unwrap()
        .ends_with("master/flat-FILTER_R-BINNING_1-EXPTIME_2.xisf"));
}

#[test]
fn test_process_log_is_saved() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = standard_session(input.path());
    let mut config = test_config(output.path(), Some(session.lights[0].clone()));
    config.save_process_log = true;

    let summary = PipelineOrchestrator::new(config, engines_for(session.source.clone()))
        .run(&mut session.catalog)
        .unwrap();
    let log_file = summary.log_file.unwrap();
    assert!(log_file.starts_with(output.path().join("logs")));
    let text = std::fs::read_to_string(log_file).unwrap();
    assert!(text.contains("Integration OK"));
}

#[test]
fn test_stages_without_frames_are_skipped() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let source = KeywordSource::new();
    let mut catalog = FrameCatalog::new(GroupingPolicy::default(), source.clone());
    let lights = frame_set(input.path(), &source, "light", 4, ImageType::Light, "L", 1, 120.0);
    for p in &lights {
        catalog.add_file(p, &ForcedValues::default());
    }
    let config = test_config(output.path(), Some(lights[1].clone()));

    let summary = PipelineOrchestrator::new(config, engines_for(source))
        .run(&mut catalog)
        .unwrap();
    for stage in [PipelineStage::Bias, PipelineStage::Dark, PipelineStage::Flat] {
        assert_eq!(summary.outcome(stage), Some(&StageOutcome::Skipped));
    }
    assert_eq!(summary.outcome(PipelineStage::Light), Some(&StageOutcome::Completed));
    // Lights without masters still pass through calibration.
    assert_eq!(
        summary.reference,
        Some(output.path().join("calibrated/light/light_001_c.xisf"))
    );
    assert!(output.path().join("registered/L/light_000_c_r.xisf").exists());
}

#[test]
fn test_calibrate_only_stops_before_registration() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = standard_session(input.path());
    let mut config = test_config(output.path(), None);
    config.light.calibrate_only = true;

    let summary = PipelineOrchestrator::new(config, engines_for(session.source.clone()))
        .run(&mut session.catalog)
        .unwrap();
    assert_eq!(summary.outcome(PipelineStage::Light), Some(&StageOutcome::Completed));
    assert!(summary.light_masters.is_empty());
    assert!(output.path().join("calibrated/light/light_004_c.xisf").exists());
    assert!(!output.path().join("registered").exists());
}

#[test]
fn test_best_reference_and_weights() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = standard_session(input.path());
    let mut config = test_config(output.path(), None);
    config.weighting.best_reference = true;
    config.weighting.generate_weights = true;

    let summary = PipelineOrchestrator::new(config, engines_for(session.source.clone()))
        .run(&mut session.catalog)
        .unwrap();
    assert_eq!(summary.outcome(PipelineStage::Light), Some(&StageOutcome::Completed));
    // Blank frames score alike; the first candidate wins.
    assert_eq!(
        summary.reference,
        Some(output.path().join("calibrated/light/light_000_c.xisf"))
    );
    assert!(summary.log.contains("Best reference frame for registration"));
    assert!(summary.log.contains("Frame weights computed and stored successfully"));
}

#[test]
fn test_missing_reference_fails_light_stage() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = standard_session(input.path());
    let config = test_config(output.path(), None);

    let summary = PipelineOrchestrator::new(config, engines_for(session.source.clone()))
        .run(&mut session.catalog)
        .unwrap();
    assert_eq!(
        summary.outcome(PipelineStage::Light),
        Some(&StageOutcome::Failed(vec![
            "No registration reference image has been specified.".to_string()
        ]))
    );
    assert_eq!(summary.masters.len(), 3);
}

// ---------------------------------------------------------------------------
// Failure containment
// ---------------------------------------------------------------------------

fn two_dark_groups(input: &std::path::Path) -> (FrameCatalog, Arc<KeywordSource>) {
    let source = KeywordSource::new();
    let mut catalog = FrameCatalog::new(GroupingPolicy::default(), source.clone());
    for p in frame_set(input, &source, "d30", 3, ImageType::Dark, "", 1, 30.0) {
        catalog.add_file(&p, &ForcedValues::default());
    }
    for p in frame_set(input, &source, "d300", 3, ImageType::Dark, "", 1, 300.0) {
        catalog.add_file(&p, &ForcedValues::default());
    }
    for p in frame_set(input, &source, "bias", 3, ImageType::Bias, "", 1, 0.0) {
        catalog.add_file(&p, &ForcedValues::default());
    }
    (catalog, source)
}

fn run_with_failing(
    containment: FailureContainment,
    fail: Vec<ImageType>,
) -> stackprep_core::pipeline::RunSummary {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let (mut catalog, source) = two_dark_groups(input.path());
    let mut config = test_config(output.path(), None);
    config.failure_containment = containment;
    let mut engines = engines_for(source);
    engines.integration = Arc::new(FailingIntegration { fail });

    PipelineOrchestrator::new(config, engines)
        .run(&mut catalog)
        .unwrap()
}

#[test]
fn test_group_containment_continues_with_next_group() {
    let summary = run_with_failing(FailureContainment::Group, vec![ImageType::Dark]);
    match summary.outcome(PipelineStage::Dark) {
        Some(StageOutcome::Failed(reasons)) => assert_eq!(reasons.len(), 2),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(summary.log.warning_count(), 2);
}

#[test]
fn test_stage_containment_ends_stage_only() {
    let summary = run_with_failing(FailureContainment::Stage, vec![ImageType::Dark]);
    match summary.outcome(PipelineStage::Dark) {
        Some(StageOutcome::Failed(reasons)) => {
            assert_eq!(reasons.len(), 1);
            assert!(reasons[0].starts_with("Error integrating dark frames."));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(summary.outcome(PipelineStage::Bias), Some(&StageOutcome::Completed));
}

#[test]
fn test_run_containment_skips_later_stages() {
    let summary = run_with_failing(FailureContainment::Run, vec![ImageType::Bias]);
    assert!(summary.outcome(PipelineStage::Bias).unwrap().is_failed());
    for stage in [PipelineStage::Dark, PipelineStage::Flat, PipelineStage::Light] {
        assert_eq!(summary.outcome(stage), Some(&StageOutcome::Skipped), "{stage}");
    }
    assert!(summary.masters.is_empty());
}

#[test]
fn test_failed_bias_leaves_flats_uncalibrated() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = standard_session(input.path());
    let config = test_config(output.path(), Some(session.lights[0].clone()));
    let mut engines = engines_for(session.source.clone());
    engines.integration = Arc::new(FailingIntegration {
        fail: vec![ImageType::Bias],
    });

    let summary = PipelineOrchestrator::new(config, engines)
        .run(&mut session.catalog)
        .unwrap();
    assert!(summary.outcome(PipelineStage::Bias).unwrap().is_failed());
    assert_eq!(summary.outcome(PipelineStage::Flat), Some(&StageOutcome::Completed));
    assert!(summary.log.contains("Calibration of flat frames skipped"));
    assert_eq!(summary.light_masters.len(), 1);
}

// ---------------------------------------------------------------------------
// Reruns over partially mastered catalogs
// ---------------------------------------------------------------------------

#[test]
fn test_promotion_marks_only_the_integrated_group() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = short_dark_session(input.path());
    let mut config = test_config(output.path(), Some(session.lights[0].clone()));
    config.failure_containment = FailureContainment::Group;

    let summary = PipelineOrchestrator::new(config, engines_for(session.source.clone()))
        .run(&mut session.catalog)
        .unwrap();
    match summary.outcome(PipelineStage::Dark) {
        Some(StageOutcome::Failed(reasons)) => assert_eq!(reasons.len(), 1),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(dark_groups(&session.catalog), vec![(1, true, 6), (2, false, 2)]);
    assert!(!session.catalog.masters().dark);

    // A raw dark matching the unmastered group joins it, not the master group.
    for p in frame_set(input.path(), &session.source, "dark_bin1_late", 1, ImageType::Dark, "", 1, 30.0) {
        assert!(session.catalog.add_file(&p, &ForcedValues::default()));
    }
    assert_eq!(
        dark_groups(&session.catalog),
        vec![(1, false, 1), (1, true, 6), (2, false, 2)]
    );
}

#[test]
fn test_rerun_retries_failed_group() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = short_dark_session(input.path());
    let mut config = test_config(output.path(), Some(session.lights[0].clone()));
    config.failure_containment = FailureContainment::Group;

    PipelineOrchestrator::new(config.clone(), engines_for(session.source.clone()))
        .run(&mut session.catalog)
        .unwrap();
    for p in frame_set(input.path(), &session.source, "dark_bin2_extra", 1, ImageType::Dark, "", 2, 30.0) {
        assert!(session.catalog.add_file(&p, &ForcedValues::default()));
    }
    assert_eq!(dark_groups(&session.catalog), vec![(1, true, 6), (2, false, 3)]);

    let summary = PipelineOrchestrator::new(config, engines_for(session.source.clone()))
        .run(&mut session.catalog)
        .unwrap();
    assert_eq!(summary.outcome(PipelineStage::Bias), Some(&StageOutcome::Skipped));
    assert_eq!(summary.outcome(PipelineStage::Dark), Some(&StageOutcome::Completed));
    assert_eq!(summary.outcome(PipelineStage::Flat), Some(&StageOutcome::Skipped));
    let produced: Vec<_> = summary.masters.iter().map(|m| m.path.clone()).collect();
    assert_eq!(
        produced,
        vec![output.path().join("master").join("dark-BINNING_2-EXPTIME_30.xisf")]
    );
    assert_eq!(dark_groups(&session.catalog), vec![(1, true, 6), (2, true, 4)]);
}

#[test]
fn test_reconstruct_keeps_master_groups() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = short_dark_session(input.path());
    let mut config = test_config(output.path(), Some(session.lights[0].clone()));
    config.failure_containment = FailureContainment::Group;
    PipelineOrchestrator::new(config, engines_for(session.source.clone()))
        .run(&mut session.catalog)
        .unwrap();
    let master = session
        .catalog
        .groups()
        .iter()
        .find(|g| g.image_type == ImageType::Dark && g.master_frame)
        .and_then(|g| g.master_path().map(|p| p.to_path_buf()))
        .unwrap();

    session.catalog.reconstruct_groups();
    assert_eq!(dark_groups(&session.catalog), vec![(1, true, 6), (2, false, 2)]);
    let rebuilt = session
        .catalog
        .groups()
        .iter()
        .find(|g| g.image_type == ImageType::Dark && g.master_frame)
        .unwrap();
    assert_eq!(rebuilt.master_path(), Some(master.as_path()));
}

#[test]
fn test_lights_are_calibrated_before_any_registration() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = standard_session(input.path());
    for p in frame_set(input.path(), &session.source, "glight", 4, ImageType::Light, "G", 1, 60.0) {
        assert!(session.catalog.add_file(&p, &ForcedValues::default()));
    }
    let config = test_config(output.path(), Some(session.lights[0].clone()));
    let order = Arc::new(CallOrder::default());
    let mut engines = engines_for(session.source.clone());
    engines.calibration = order.clone();
    engines.registration = order.clone();

    let summary = PipelineOrchestrator::new(config, engines)
        .run(&mut session.catalog)
        .unwrap();
    assert_eq!(summary.outcome(PipelineStage::Light), Some(&StageOutcome::Completed));
    // One flat calibration, two light calibrations, then two registrations.
    assert_eq!(
        *order.calls.lock().unwrap(),
        vec!["calibrate", "calibrate", "calibrate", "register", "register"]
    );
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[test]
fn test_partial_registration_loss_is_a_warning() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = standard_session(input.path());
    let config = test_config(output.path(), Some(session.lights[0].clone()));
    let mut engines = engines_for(session.source.clone());
    engines.registration = Arc::new(LossyRegistration { lost: 2 });

    let summary = PipelineOrchestrator::new(config, engines)
        .run(&mut session.catalog)
        .unwrap();
    assert_eq!(summary.outcome(PipelineStage::Light), Some(&StageOutcome::Completed));
    assert!(summary.log.contains("Failed to register 2 images out of 10"));
    assert!(summary.log.contains("Registration completed with warnings"));
    assert_eq!(summary.light_masters.len(), 1);
}

#[test]
fn test_too_few_registered_frames_fails_group() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = standard_session(input.path());
    let config = test_config(output.path(), Some(session.lights[0].clone()));
    let mut engines = engines_for(session.source.clone());
    engines.registration = Arc::new(LossyRegistration { lost: 8 });

    let summary = PipelineOrchestrator::new(config, engines)
        .run(&mut session.catalog)
        .unwrap();
    assert!(summary.outcome(PipelineStage::Light).unwrap().is_failed());
    assert!(summary.log.has_errors());
    assert!(summary
        .log
        .contains("Star alignment failed to register 8 images out of 10."));
    assert!(summary.light_masters.is_empty());
}

// ---------------------------------------------------------------------------
// Calibration requests
// ---------------------------------------------------------------------------

#[test]
fn test_calibration_requests_carry_matching_masters() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = standard_session(input.path());
    let config = test_config(output.path(), Some(session.lights[0].clone()));
    let calibration = Arc::new(RecordingCalibration::default());
    let mut engines = engines_for(session.source.clone());
    engines.calibration = calibration.clone();

    PipelineOrchestrator::new(config, engines)
        .run(&mut session.catalog)
        .unwrap();

    let requests = calibration.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);

    let flat = &requests[0];
    assert_eq!(flat.image_type, ImageType::Flat);
    assert_eq!(flat.frames.len(), 5);
    assert!(flat.master_bias.is_some());
    assert!(flat.master_dark.is_none());
    assert!(!flat.evaluate_noise);

    let light = &requests[1];
    assert_eq!(light.image_type, ImageType::Light);
    assert_eq!(light.frames.len(), 10);
    assert!(light
        .master_dark
        .as_ref()
        .unwrap()
        .ends_with("dark-BINNING_1-EXPTIME_30.xisf"));
    assert!(light
        .master_flat
        .as_ref()
        .unwrap()
        .ends_with("flat-FILTER_R-BINNING_1-EXPTIME_2.xisf"));
    assert!(light.evaluate_noise);
    assert!(light.overscan.is_none());
    assert_eq!(light.output.postfix, "_c");
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[test]
fn test_cancellation_ends_run() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut session = standard_session(input.path());
    let config = test_config(output.path(), Some(session.lights[0].clone()));
    let reporter = RecordingReporter::new(Some(2));

    let mut orchestrator = PipelineOrchestrator::new(config, engines_for(session.source.clone()))
        .with_reporter(reporter.clone());
    let result = orchestrator.run(&mut session.catalog);
    assert!(matches!(result, Err(PrepError::Cancelled)));
    assert_eq!(
        *reporter.stages.lock().unwrap(),
        vec![PipelineStage::Bias, PipelineStage::Dark]
    );
    // The bias master was finished before the request.
    let master_of = |image_type: ImageType| {
        session
            .catalog
            .groups()
            .iter()
            .any(|g| g.image_type == image_type && g.master_frame)
    };
    assert!(master_of(ImageType::Bias));
    assert!(!master_of(ImageType::Dark));
}

// ---------------------------------------------------------------------------
// Master naming
// ---------------------------------------------------------------------------

#[test]
fn test_master_file_name() {
    assert_eq!(
        master_file_name(ImageType::Bias, "", 1, 0.0, ".xisf"),
        "bias-BINNING_1.xisf"
    );
    assert_eq!(
        master_file_name(ImageType::Dark, "", 2, 30.0, ".xisf"),
        "dark-BINNING_2-EXPTIME_30.xisf"
    );
    assert_eq!(
        master_file_name(ImageType::Flat, "H alpha", 1, 0.5, ".fits"),
        "flat-FILTER_H_alpha-BINNING_1-EXPTIME_0.5.fits"
    );
}

#[test]
fn test_master_keywords() {
    let keywords = master_keywords(ImageType::Light, "R", 2, 60.0);
    let value = |name: &str| {
        keywords
            .iter()
            .find(|k| k.name == name)
            .map(|k| k.value.clone())
    };
    assert_eq!(value("IMAGETYP").as_deref(), Some("Master Light"));
    assert_eq!(value("FILTER").as_deref(), Some("R"));
    assert_eq!(value("XBINNING").as_deref(), Some("2"));
    assert_eq!(value("YBINNING").as_deref(), Some("2"));
    assert_eq!(value("EXPTIME").as_deref(), Some("60.00"));
    assert_eq!(keywords.iter().filter(|k| k.name == "COMMENT").count(), 2);

    let bias = master_keywords(ImageType::Bias, "", 1, 0.0);
    assert!(bias.iter().all(|k| k.name != "FILTER" && k.name != "EXPTIME"));
}
