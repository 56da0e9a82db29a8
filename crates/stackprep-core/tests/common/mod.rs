use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ndarray::Array2;

use stackprep_core::catalog::{FrameCatalog, GroupingPolicy};
use stackprep_core::config::Config;
use stackprep_core::engine::passthrough::{rehearsal_engines, RehearsalCalibration, RehearsalRegistration};
use stackprep_core::engine::{
    BatchOutput, CalibrationEngine, CalibrationRequest, Engines, ImageSource, IntegrationEngine,
    IntegrationRequest, IntegrationResult, RegistrationEngine, RegistrationRequest,
};
use stackprep_core::error::{EngineError, ImageError};
use stackprep_core::frame::{Image, ImageMetadata, ImageType, Keyword};
use stackprep_core::pipeline::{PipelineStage, ProgressReporter};

/// Image source backed by an in-memory table. Files that exist on disk but
/// are not registered open as a blank 8x8 frame without keywords.
#[derive(Default)]
pub struct KeywordSource {
    images: Mutex<HashMap<PathBuf, Image>>,
}

impl KeywordSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_image(&self, path: &Path, image: Image) {
        self.images.lock().unwrap().insert(path.to_path_buf(), image);
    }

    pub fn set_keywords(&self, path: &Path, keywords: &[(&str, &str)]) {
        let mut image = Image::mono(Array2::zeros((8, 8)));
        image.metadata = ImageMetadata {
            keywords: keywords
                .iter()
                .map(|(name, value)| Keyword::new(*name, *value, ""))
                .collect(),
            exposure: None,
        };
        self.set_image(path, image);
    }
}

impl ImageSource for KeywordSource {
    fn open(&self, path: &Path) -> Result<Image, ImageError> {
        if let Some(image) = self.images.lock().unwrap().get(path) {
            return Ok(image.clone());
        }
        if path.exists() {
            Ok(Image::mono(Array2::zeros((8, 8))))
        } else {
            Err(ImageError::NotFound(path.to_path_buf()))
        }
    }
}

/// Create a small placeholder file.
pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"frame").expect("write placeholder");
    path
}

/// Create `count` frames described by header keywords.
pub fn frame_set(
    dir: &Path,
    source: &KeywordSource,
    prefix: &str,
    count: usize,
    image_type: ImageType,
    filter: &str,
    binning: u32,
    exposure: f64,
) -> Vec<PathBuf> {
    let binning = binning.to_string();
    let exposure = exposure.to_string();
    (0..count)
        .map(|i| {
            let path = touch(dir, &format!("{prefix}_{i:03}.fits"));
            let mut keywords = vec![
                ("IMAGETYP", image_type.frame_keyword_value()),
                ("XBINNING", binning.as_str()),
                ("EXPTIME", exposure.as_str()),
            ];
            if !filter.is_empty() {
                keywords.push(("FILTER", filter));
            }
            source.set_keywords(&path, &keywords);
            path
        })
        .collect()
}

/// 5 bias, 5 darks of 30 s, 5 R flats and 10 R lights of 60 s, binning 1.
pub struct Session {
    pub catalog: FrameCatalog,
    pub source: Arc<KeywordSource>,
    pub lights: Vec<PathBuf>,
}

pub fn standard_session(input: &Path) -> Session {
    let source = KeywordSource::new();
    let mut catalog = FrameCatalog::new(GroupingPolicy::default(), source.clone());
    let mut lights = Vec::new();
    for path in frame_set(input, &source, "bias", 5, ImageType::Bias, "", 1, 0.0) {
        assert!(catalog.add_file(&path, &Default::default()));
    }
    for path in frame_set(input, &source, "dark", 5, ImageType::Dark, "", 1, 30.0) {
        assert!(catalog.add_file(&path, &Default::default()));
    }
    for path in frame_set(input, &source, "flat", 5, ImageType::Flat, "R", 1, 2.0) {
        assert!(catalog.add_file(&path, &Default::default()));
    }
    for path in frame_set(input, &source, "light", 10, ImageType::Light, "R", 1, 60.0) {
        assert!(catalog.add_file(&path, &Default::default()));
        lights.push(path);
    }
    Session {
        catalog,
        source,
        lights,
    }
}

/// The standard session plus two binning-2 darks of 30 s, too few to
/// integrate on their own.
pub fn short_dark_session(input: &Path) -> Session {
    let mut session = standard_session(input);
    for path in frame_set(input, &session.source, "dark_bin2", 2, ImageType::Dark, "", 2, 30.0) {
        assert!(session.catalog.add_file(&path, &Default::default()));
    }
    session
}

/// (binning, master flag, length) of every dark group, by binning.
pub fn dark_groups(catalog: &FrameCatalog) -> Vec<(u32, bool, usize)> {
    let mut darks: Vec<_> = catalog
        .groups()
        .iter()
        .filter(|g| g.image_type == ImageType::Dark)
        .map(|g| (g.binning, g.master_frame, g.len()))
        .collect();
    darks.sort();
    darks
}

/// Defaults writing under `output`, with a fixed registration reference and
/// no process log file.
pub fn test_config(output: &Path, reference: Option<PathBuf>) -> Config {
    let mut config = Config::default();
    config.output_directory = output.to_path_buf();
    config.save_process_log = false;
    config.registration.reference_image = reference;
    config
}

pub fn engines_for(source: Arc<KeywordSource>) -> Engines {
    rehearsal_engines(source, false)
}

/// Integration that fails for the listed frame types and otherwise stores
/// the first frame as the master.
pub struct FailingIntegration {
    pub fail: Vec<ImageType>,
}

impl IntegrationEngine for FailingIntegration {
    fn integrate(&self, request: &IntegrationRequest) -> Result<IntegrationResult, EngineError> {
        if self.fail.contains(&request.image_type) {
            return Err(EngineError::Failed {
                engine: "ImageIntegration",
                reason: "rejected by test".into(),
            });
        }
        if let Some(dir) = request.output_path.parent() {
            std::fs::create_dir_all(dir).unwrap();
        }
        std::fs::copy(&request.frames[0], &request.output_path).unwrap();
        Ok(IntegrationResult {
            master: request.output_path.clone(),
            rejection_maps: Vec::new(),
        })
    }
}

/// Registration that loses the first `lost` frames of every call.
pub struct LossyRegistration {
    pub lost: usize,
}

impl RegistrationEngine for LossyRegistration {
    fn align(&self, request: &RegistrationRequest) -> Result<BatchOutput, EngineError> {
        let mut out = RehearsalRegistration.align(request)?;
        for entry in out.iter_mut().take(self.lost) {
            *entry = None;
        }
        Ok(out)
    }
}

/// Calibration that records every request it receives.
#[derive(Default)]
pub struct RecordingCalibration {
    pub requests: Mutex<Vec<CalibrationRequest>>,
}

impl CalibrationEngine for RecordingCalibration {
    fn calibrate(&self, request: &CalibrationRequest) -> Result<BatchOutput, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        RehearsalCalibration.calibrate(request)
    }
}

/// Calibration and registration that record the order of their calls.
#[derive(Default)]
pub struct CallOrder {
    pub calls: Mutex<Vec<&'static str>>,
}

impl CalibrationEngine for CallOrder {
    fn calibrate(&self, request: &CalibrationRequest) -> Result<BatchOutput, EngineError> {
        self.calls.lock().unwrap().push("calibrate");
        RehearsalCalibration.calibrate(request)
    }
}

impl RegistrationEngine for CallOrder {
    fn align(&self, request: &RegistrationRequest) -> Result<BatchOutput, EngineError> {
        self.calls.lock().unwrap().push("register");
        RehearsalRegistration.align(request)
    }
}

/// Reporter recording stage starts; requests cancellation once `cancel_at`
/// stages have started.
pub struct RecordingReporter {
    pub stages: Mutex<Vec<PipelineStage>>,
    pub started: AtomicUsize,
    pub cancel_at: Option<usize>,
}

impl RecordingReporter {
    pub fn new(cancel_at: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            stages: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
            cancel_at,
        })
    }
}

impl ProgressReporter for RecordingReporter {
    fn begin_stage(&self, stage: PipelineStage, _total_items: Option<usize>) {
        self.stages.lock().unwrap().push(stage);
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel_requested(&self) -> bool {
        self.cancel_at
            .is_some_and(|n| self.started.load(Ordering::SeqCst) >= n)
    }
}
