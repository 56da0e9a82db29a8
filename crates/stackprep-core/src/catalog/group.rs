use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_FILTER, LIGHT_EXPOSURE_TOLERANCE};
use crate::frame::{FileItem, ImageType};

/// Tolerances that decide which frames share a group.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupingPolicy {
    /// Maximum exposure difference (seconds) between darks of one group.
    #[serde(default = "default_dark_tolerance")]
    pub dark_exposure_tolerance: f64,
    /// Group lights regardless of their exposure.
    #[serde(default)]
    pub group_lights_of_different_exposure: bool,
}

fn default_dark_tolerance() -> f64 {
    10.0
}

impl Default for GroupingPolicy {
    fn default() -> Self {
        Self {
            dark_exposure_tolerance: default_dark_tolerance(),
            group_lights_of_different_exposure: false,
        }
    }
}

/// Frames sharing type, binning and (depending on type) filter and exposure.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameGroup {
    pub image_type: ImageType,
    /// Empty for bias and dark groups.
    pub filter: String,
    pub binning: u32,
    /// Representative exposure: the maximum of `exposures`.
    pub exposure: f64,
    /// Sorted set of the distinct member exposures.
    pub exposures: Vec<f64>,
    /// When set, `items[0]` is the master frame of this group.
    pub master_frame: bool,
    pub enabled: bool,
    pub items: Vec<FileItem>,
}

impl FrameGroup {
    /// Empty group with the given parameters.
    pub fn empty(image_type: ImageType, filter: &str, binning: u32, exposure: f64) -> Self {
        let filter = match image_type {
            ImageType::Bias | ImageType::Dark => String::new(),
            _ => filter.to_string(),
        };
        let exposure = if image_type == ImageType::Bias {
            0.0
        } else {
            exposure
        };
        Self {
            image_type,
            filter,
            binning,
            exposure,
            exposures: vec![exposure],
            master_frame: false,
            enabled: true,
            items: Vec::new(),
        }
    }

    /// New group seeded with its first frame.
    pub fn new(first: FileItem, master_frame: bool) -> Self {
        let mut group = Self::empty(first.image_type, &first.filter, first.binning, first.exposure);
        group.master_frame = master_frame;
        group.items.push(first);
        group
    }

    /// Whether a frame with these parameters belongs to this group.
    pub fn same_parameters(
        &self,
        image_type: ImageType,
        filter: &str,
        binning: u32,
        exposure: f64,
        policy: &GroupingPolicy,
    ) -> bool {
        if self.image_type != image_type || self.binning != binning {
            return false;
        }
        match image_type {
            ImageType::Bias => true,
            ImageType::Dark => (self.exposure - exposure).abs() <= policy.dark_exposure_tolerance,
            ImageType::Flat | ImageType::Unknown => self.filter == filter,
            ImageType::Light => {
                self.filter == filter
                    && (policy.group_lights_of_different_exposure
                        || (self.exposure - exposure).abs() <= LIGHT_EXPOSURE_TOLERANCE)
            }
        }
    }

    pub fn add_exposure(&mut self, exposure: f64) {
        let exposure = if self.image_type == ImageType::Bias {
            0.0
        } else {
            exposure
        };
        if !self.exposures.contains(&exposure) {
            self.exposures.push(exposure);
            self.exposures.sort_by(f64::total_cmp);
        }
        self.exposure = self.exposures.iter().copied().fold(f64::MIN, f64::max);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.items.iter().map(|i| i.path.clone()).collect()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.items.iter().any(|i| i.path == path)
    }

    /// Path of the master frame, when this group holds one.
    pub fn master_path(&self) -> Option<&Path> {
        if self.master_frame {
            self.items.first().map(|i| i.path.as_path())
        } else {
            None
        }
    }

    /// Filter as shown to users.
    pub fn display_filter(&self) -> &str {
        if self.filter.is_empty() {
            DEFAULT_FILTER
        } else {
            &self.filter
        }
    }

    /// `12.00s` for a single exposure, `[30.00s, 60.00s]` otherwise.
    pub fn exposures_label(&self) -> String {
        if self.exposures.len() > 1 {
            let list: Vec<String> = self.exposures.iter().map(|e| format!("{e:.2}s")).collect();
            format!("[{}]", list.join(", "))
        } else {
            format!("{:.2}s", self.exposure)
        }
    }

    /// Multi-line banner written to the process log before a group is processed.
    pub fn log_header(&self) -> String {
        let mut s = String::from("---------------------------------\n");
        s.push_str(&format!("Group of {} {} frames\n", self.len(), self.image_type));
        s.push_str(&format!("BINNING  : {}\n", self.binning));
        if !matches!(self.image_type, ImageType::Bias | ImageType::Dark) {
            s.push_str(&format!("Filter   : {}\n", self.display_filter()));
        }
        if self.image_type != ImageType::Bias {
            s.push_str(&format!("Exposure : {}\n", self.exposures_label()));
        }
        s
    }

    pub fn log_footer(&self) -> String {
        String::from("---------------------------------\n")
    }

    /// Display order: binning ascending, filter ascending (case-insensitive),
    /// exposure descending.
    pub fn display_order(a: &FrameGroup, b: &FrameGroup) -> Ordering {
        a.binning
            .cmp(&b.binning)
            .then_with(|| a.filter.to_lowercase().cmp(&b.filter.to_lowercase()))
            .then_with(|| b.exposure.total_cmp(&a.exposure))
    }
}

impl std::fmt::Display for FrameGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} frames (", self.image_type)?;
        if self.filter.is_empty() {
            write!(f, "filter = {DEFAULT_FILTER}")?;
        } else {
            write!(f, "filter = \"{}\"", self.filter)?;
        }
        write!(f, ", binning = {}", self.binning)?;
        if self.exposures.len() > 1 {
            write!(f, ", exposures = {}", self.exposures_label())?;
        } else {
            write!(f, ", exposure = {:.2}s", self.exposure)?;
        }
        write!(f, ", length = {})", self.len())
    }
}
