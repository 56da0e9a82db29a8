//! Frame ingestion and grouping.

mod group;
pub mod naming;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::{DEFAULT_BINNING, DEFAULT_FILTER};
use crate::engine::ImageSource;
use crate::frame::{FileItem, ImageType};

pub use group::{FrameGroup, GroupingPolicy};
pub use naming::clean_filter_name;

/// Values that override metadata and file-name inference on ingestion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ForcedValues {
    pub image_type: Option<ImageType>,
    /// `"?"` is treated as not forced.
    pub filter: Option<String>,
    pub binning: Option<u32>,
    pub exposure: Option<f64>,
}

impl ForcedValues {
    pub fn image_type(image_type: ImageType) -> Self {
        Self {
            image_type: Some(image_type),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_binning(mut self, binning: u32) -> Self {
        self.binning = Some(binning);
        self
    }

    pub fn with_exposure(mut self, exposure: f64) -> Self {
        self.exposure = Some(exposure);
        self
    }

    /// Every resolved attribute of an existing item, as used when groups are
    /// rebuilt.
    pub fn from_item(item: &FileItem) -> Self {
        Self {
            image_type: Some(item.image_type),
            filter: Some(item.filter.clone()).filter(|f| !f.is_empty()),
            binning: Some(item.binning),
            exposure: Some(item.exposure),
        }
    }
}

/// Per-type flags marking calibration frames as ready-made masters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterFlags {
    pub bias: bool,
    pub dark: bool,
    pub flat: bool,
}

impl MasterFlags {
    pub fn get(&self, image_type: ImageType) -> bool {
        match image_type {
            ImageType::Bias => self.bias,
            ImageType::Dark => self.dark,
            ImageType::Flat => self.flat,
            _ => false,
        }
    }

    pub fn set(&mut self, image_type: ImageType, value: bool) {
        match image_type {
            ImageType::Bias => self.bias = value,
            ImageType::Dark => self.dark = value,
            ImageType::Flat => self.flat = value,
            _ => {}
        }
    }
}

/// The set of ingested frames, partitioned into [`FrameGroup`]s.
///
/// Ingestion failures never panic or return errors: they are recorded as
/// diagnostic messages (see [`FrameCatalog::take_messages`]) and the call
/// returns `false` without touching the catalog.
pub struct FrameCatalog {
    groups: Vec<FrameGroup>,
    policy: GroupingPolicy,
    masters: MasterFlags,
    source: Arc<dyn ImageSource>,
    messages: Vec<String>,
}

impl FrameCatalog {
    pub fn new(policy: GroupingPolicy, source: Arc<dyn ImageSource>) -> Self {
        Self {
            groups: Vec::new(),
            policy,
            masters: MasterFlags::default(),
            source,
            messages: Vec::new(),
        }
    }

    pub fn policy(&self) -> &GroupingPolicy {
        &self.policy
    }

    /// Change tolerances. Existing groups keep their partition until
    /// [`reconstruct_groups`](Self::reconstruct_groups) is called.
    pub fn set_policy(&mut self, policy: GroupingPolicy) {
        self.policy = policy;
    }

    pub fn masters(&self) -> MasterFlags {
        self.masters
    }

    /// Mark (or unmark) every group of a calibration type as a ready-made
    /// master. Files of that type ingested afterwards form master groups.
    pub fn set_use_as_master(&mut self, image_type: ImageType, value: bool) {
        self.masters.set(image_type, value);
        for g in self.groups.iter_mut().filter(|g| g.image_type == image_type) {
            g.master_frame = value;
        }
    }

    pub fn groups(&self) -> &[FrameGroup] {
        &self.groups
    }

    /// Groups in display order.
    pub fn sorted(&self) -> Vec<&FrameGroup> {
        let mut view: Vec<&FrameGroup> = self.groups.iter().collect();
        view.sort_by(|a, b| FrameGroup::display_order(a, b));
        view
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.groups.iter().map(FrameGroup::len).sum()
    }

    pub fn has_frames(&self, image_type: ImageType) -> bool {
        self.groups.iter().any(|g| g.image_type == image_type)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.groups.iter().any(|g| g.contains(path))
    }

    /// Ingestion diagnostics accumulated since the last call.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn take_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }

    /// Ingest one file. Returns `false` (with a diagnostic) when the path is
    /// empty, missing, already present, unreadable, or of unknown type.
    pub fn add_file(&mut self, path: impl AsRef<Path>, forced: &ForcedValues) -> bool {
        self.ingest(path.as_ref(), forced, None)
    }

    /// Ingest a file as the master of its own group, regardless of the
    /// type-wide master setting.
    pub fn add_master_file(&mut self, path: impl AsRef<Path>, forced: &ForcedValues) -> bool {
        self.ingest(path.as_ref(), forced, Some(true))
    }

    fn ingest(&mut self, path: &Path, forced: &ForcedValues, master: Option<bool>) -> bool {
        let raw = path.to_string_lossy();
        let path = PathBuf::from(raw.trim());

        if let Err(message) = self.check_file(&path) {
            self.messages.push(message);
            return false;
        }

        match self.resolve(&path, forced) {
            Ok(item) => {
                let master = master.unwrap_or_else(|| self.masters.get(item.image_type));
                self.insert(item, master);
                true
            }
            Err(message) => {
                self.messages.push(message);
                false
            }
        }
    }

    pub fn add_bias(&mut self, path: impl AsRef<Path>) -> bool {
        self.add_file(path, &ForcedValues::image_type(ImageType::Bias))
    }

    pub fn add_dark(&mut self, path: impl AsRef<Path>) -> bool {
        self.add_file(path, &ForcedValues::image_type(ImageType::Dark))
    }

    pub fn add_flat(&mut self, path: impl AsRef<Path>) -> bool {
        self.add_file(path, &ForcedValues::image_type(ImageType::Flat))
    }

    pub fn add_light(&mut self, path: impl AsRef<Path>) -> bool {
        self.add_file(path, &ForcedValues::image_type(ImageType::Light))
    }

    /// Remove every group of the given type.
    pub fn clear_type(&mut self, image_type: ImageType) {
        self.groups.retain(|g| g.image_type != image_type);
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }

    /// Remove one file; groups left empty are dropped.
    pub fn remove_file(&mut self, path: &Path) -> bool {
        let mut removed = false;
        for g in &mut self.groups {
            let before = g.items.len();
            g.items.retain(|i| i.path != path);
            removed |= g.items.len() != before;
        }
        self.groups.retain(|g| !g.is_empty());
        removed
    }

    /// Re-partition every ingested file under the current policy, then sort
    /// the groups into display order. Master groups stay master groups.
    pub fn reconstruct_groups(&mut self) {
        let groups: Vec<FrameGroup> = self.groups.drain(..).collect();
        debug!(
            files = groups.iter().map(FrameGroup::len).sum::<usize>(),
            "Rebuilding frame groups"
        );
        for g in groups {
            if g.master_frame {
                // Master items go in at index 0, so replay backwards to keep the
                // master first.
                for item in g.items.iter().rev() {
                    self.ingest(&item.path, &ForcedValues::from_item(item), Some(true));
                }
            } else {
                for item in &g.items {
                    self.ingest(&item.path, &ForcedValues::from_item(item), Some(false));
                }
            }
        }
        self.groups.sort_by(FrameGroup::display_order);
    }

    /// Install an integrated master as item 0 of group `index` and flag that
    /// group as master. Other groups of the type are left alone.
    pub(crate) fn promote_master(&mut self, index: usize, master: PathBuf) {
        if let Some(g) = self.groups.get_mut(index) {
            let item = FileItem::new(master, g.image_type, g.filter.clone(), g.binning, g.exposure);
            g.items.insert(0, item);
            g.master_frame = true;
        }
    }

    fn check_file(&self, path: &Path) -> Result<(), String> {
        if path.as_os_str().is_empty() {
            return Err("Empty file path".into());
        }
        if !path.exists() {
            return Err(format!("No such file: {}", path.display()));
        }
        if self.contains(path) {
            return Err(format!("File already selected: {}", path.display()));
        }
        Ok(())
    }

    /// Resolve type, filter, binning and exposure by precedence:
    /// forced value, header keywords, file name, defaults.
    fn resolve(&self, path: &Path, forced: &ForcedValues) -> Result<FileItem, String> {
        let mut image_type = forced.image_type.filter(|t| *t != ImageType::Unknown);
        let mut filter = forced.filter.clone().filter(|f| f != "?");
        let mut binning = forced.binning.filter(|b| *b > 0);
        let mut exposure = if image_type == Some(ImageType::Bias) {
            Some(0.0)
        } else {
            forced.exposure.filter(|e| *e > 0.0)
        };

        let forced_type = image_type.is_some();
        let forced_filter = filter.is_some();
        let forced_binning = binning.is_some();
        let forced_exposure = exposure.is_some();

        if !(forced_type && forced_filter && forced_binning && forced_exposure) {
            let metadata = self
                .source
                .metadata(path)
                .map_err(|e| format!("Unable to open input file: {} ({e})", path.display()))?;

            for keyword in &metadata.keywords {
                let value = keyword.stripped_value();
                match keyword.name.as_str() {
                    "IMAGETYP" if !forced_type => {
                        image_type = Some(ImageType::from_keyword(value));
                    }
                    "FILTER" | "INSFLNAM" if !forced_filter => {
                        filter = Some(value.to_string()).filter(|f| !f.is_empty());
                    }
                    "XBINNING" | "BINNING" | "CCDBINX" if !forced_binning => {
                        binning = parse_binning(value);
                    }
                    "EXPTIME" | "EXPOSURE" if !forced_exposure => {
                        exposure = value.parse::<f64>().ok().filter(|e| *e > 0.0);
                    }
                    _ => {}
                }
            }

            if !forced_exposure && exposure.is_none() {
                exposure = metadata.exposure.filter(|e| *e > 0.0);
            }
        }

        let image_type = match image_type.filter(|t| *t != ImageType::Unknown) {
            Some(t) => t,
            None => naming::image_type_from_path(path)
                .ok_or_else(|| format!("Unable to determine frame type: {}", path.display()))?,
        };

        let binning = binning
            .or_else(|| naming::binning_from_path(path))
            .unwrap_or(DEFAULT_BINNING);
        let filter = filter
            .or_else(|| naming::filter_from_path(path))
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let exposure = if image_type == ImageType::Bias {
            0.0
        } else {
            exposure
                .or_else(|| naming::exposure_from_path(path))
                .unwrap_or(0.0)
        };

        Ok(FileItem::new(path, image_type, filter, binning, exposure))
    }

    /// Master and raw frames never share a group; master items go first.
    fn insert(&mut self, item: FileItem, is_master: bool) {
        let found = self.groups.iter().position(|g| {
            g.master_frame == is_master
                && g.same_parameters(item.image_type, &item.filter, item.binning, item.exposure, &self.policy)
        });
        match found {
            Some(i) => {
                let exposure = item.exposure;
                let group = &mut self.groups[i];
                if is_master {
                    group.items.insert(0, item);
                } else {
                    group.items.push(item);
                }
                group.add_exposure(exposure);
            }
            None => self.groups.push(FrameGroup::new(item, is_master)),
        }
    }
}

fn parse_binning(value: &str) -> Option<u32> {
    value
        .parse::<f64>()
        .ok()
        .filter(|b| *b >= 1.0)
        .map(|b| b as u32)
}
