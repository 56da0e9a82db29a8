//! Session persistence through a key-value settings store.
//!
//! Frame groups are stored as plain records and restored by replaying every
//! file through [`FrameCatalog::add_file`], so groups are rebuilt under the
//! grouping policy in effect when the session is loaded.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::{ForcedValues, FrameCatalog};
use crate::config::{export_parameters, import_parameters, Config};
use crate::consts::SESSION_KEY_BASE;
use crate::error::Result;
use crate::frame::ImageType;

/// A typed settings value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SettingValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Typed key-value storage.
pub trait SettingsStore {
    fn read(&self, key: &str) -> Option<SettingValue>;
    fn write(&mut self, key: &str, value: SettingValue);
    fn remove(&mut self, key: &str);
}

/// In-memory settings, serializable as a whole.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySettings {
    values: BTreeMap<String, SettingValue>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SettingsStore for MemorySettings {
    fn read(&self, key: &str) -> Option<SettingValue> {
        self.values.get(key).cloned()
    }

    fn write(&mut self, key: &str, value: SettingValue) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}

/// Stored form of one frame group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub image_type: ImageType,
    pub filter: String,
    pub binning: u32,
    pub exposure: f64,
    pub exposures: Vec<f64>,
    pub master_frame: bool,
    pub files: Vec<PathBuf>,
}

fn frame_groups_key() -> String {
    format!("{SESSION_KEY_BASE}frameGroups")
}

fn parameters_key() -> String {
    format!("{SESSION_KEY_BASE}parameters")
}

/// Store every group of `catalog`.
pub fn save_session(store: &mut dyn SettingsStore, catalog: &FrameCatalog) -> Result<()> {
    let records: Vec<GroupRecord> = catalog
        .groups()
        .iter()
        .map(|g| GroupRecord {
            image_type: g.image_type,
            filter: g.filter.clone(),
            binning: g.binning,
            exposure: g.exposure,
            exposures: g.exposures.clone(),
            master_frame: g.master_frame,
            files: g.paths(),
        })
        .collect();
    let json = serde_json::to_string(&records)?;
    store.write(&frame_groups_key(), SettingValue::Text(json));
    debug!(groups = records.len(), "Session saved");
    Ok(())
}

/// Replay a stored session into `catalog`. Returns the number of files
/// added; files that can no longer be ingested are reported through the
/// catalog's messages.
pub fn load_session(store: &dyn SettingsStore, catalog: &mut FrameCatalog) -> Result<usize> {
    let Some(value) = store.read(&frame_groups_key()) else {
        return Ok(0);
    };
    let Some(json) = value.as_text() else {
        return Ok(0);
    };
    let records: Vec<GroupRecord> = serde_json::from_str(json)?;

    let mut added = 0;
    for record in &records {
        let forced = ForcedValues::image_type(record.image_type);
        // A master group restores as its master file alone, under the
        // group's stored parameters.
        if record.master_frame {
            if let Some(master) = record.files.first() {
                let mut forced = forced.with_binning(record.binning).with_exposure(record.exposure);
                if !record.filter.is_empty() {
                    forced = forced.with_filter(record.filter.clone());
                }
                if catalog.add_master_file(master, &forced) {
                    added += 1;
                }
            }
            continue;
        }
        for file in &record.files {
            if catalog.add_file(file, &forced) {
                added += 1;
            }
        }
    }
    info!(groups = records.len(), files = added, "Session restored");
    Ok(added)
}

pub fn save_config(store: &mut dyn SettingsStore, config: &Config) -> Result<()> {
    store.write(&parameters_key(), SettingValue::Text(export_parameters(config)?));
    Ok(())
}

/// Stored parameters, or `None` when nothing was saved.
pub fn load_config(store: &dyn SettingsStore) -> Result<Option<Config>> {
    match store.read(&parameters_key()) {
        Some(SettingValue::Text(text)) => Ok(Some(import_parameters(&text)?)),
        _ => Ok(None),
    }
}

/// Forget the stored session and parameters.
pub fn clear_session(store: &mut dyn SettingsStore) {
    store.remove(&frame_groups_key());
    store.remove(&parameters_key());
}
