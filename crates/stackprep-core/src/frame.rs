use std::path::PathBuf;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::{LUMINANCE_B, LUMINANCE_G, LUMINANCE_R};

/// Classification of an input frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageType {
    #[default]
    Unknown,
    Bias,
    Dark,
    Flat,
    Light,
}

impl ImageType {
    /// Calibration frame types, in the order their stages run.
    pub const CALIBRATION: [ImageType; 3] = [ImageType::Bias, ImageType::Dark, ImageType::Flat];

    /// Map an IMAGETYP keyword value to a frame type (case-insensitive).
    pub fn from_keyword(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "bias frame" | "bias" | "master bias" => Self::Bias,
            "dark frame" | "dark" | "master dark" => Self::Dark,
            "flat field" | "flat frame" | "flat" | "master flat" => Self::Flat,
            "light frame" | "light" | "science frame" | "science" | "master light" => Self::Light,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Bias => "bias",
            Self::Dark => "dark",
            Self::Flat => "flat",
            Self::Light => "light",
        }
    }

    /// IMAGETYP value written on individual frames.
    pub fn frame_keyword_value(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Bias => "Bias Frame",
            Self::Dark => "Dark Frame",
            Self::Flat => "Flat Field",
            Self::Light => "Light Frame",
        }
    }

    /// IMAGETYP value written on integrated master frames.
    pub fn master_keyword_value(&self) -> &'static str {
        match self {
            Self::Unknown => "Master Unknown",
            Self::Bias => "Master Bias",
            Self::Dark => "Master Dark",
            Self::Flat => "Master Flat",
            Self::Light => "Master Light",
        }
    }
}

impl std::fmt::Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One ingested frame file with its resolved classification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileItem {
    pub path: PathBuf,
    pub image_type: ImageType,
    pub filter: String,
    pub binning: u32,
    /// Exposure in seconds; 0 when unknown.
    pub exposure: f64,
    pub enabled: bool,
}

impl FileItem {
    pub fn new(
        path: impl Into<PathBuf>,
        image_type: ImageType,
        filter: impl Into<String>,
        binning: u32,
        exposure: f64,
    ) -> Self {
        Self {
            path: path.into(),
            image_type,
            filter: filter.into(),
            binning,
            exposure,
            enabled: true,
        }
    }
}

/// A header keyword as stored in an image file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub name: String,
    pub value: String,
    pub comment: String,
}

impl Keyword {
    pub fn new(name: impl Into<String>, value: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            comment: comment.into(),
        }
    }

    /// Value without surrounding quotes and padding.
    pub fn stripped_value(&self) -> &str {
        let v = self.value.trim();
        let v = v
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .unwrap_or(v);
        v.trim()
    }
}

/// Header information of an image file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageMetadata {
    pub keywords: Vec<Keyword>,
    /// Exposure reported by the file format itself, if any.
    pub exposure: Option<f64>,
}

impl ImageMetadata {
    pub fn keyword(&self, name: &str) -> Option<&Keyword> {
        self.keywords.iter().find(|k| k.name == name)
    }

    /// Replace every keyword named like `keyword` with `keyword`.
    pub fn set_keyword(&mut self, keyword: Keyword) {
        self.keywords.retain(|k| k.name != keyword.name);
        self.keywords.push(keyword);
    }
}

/// Decoded image: one plane per channel plus header metadata.
#[derive(Clone, Debug)]
pub struct Image {
    /// Pixel planes, row-major, shape = (height, width)
    pub channels: Vec<Array2<f32>>,
    pub metadata: ImageMetadata,
}

impl Image {
    pub fn mono(data: Array2<f32>) -> Self {
        Self {
            channels: vec![data],
            metadata: ImageMetadata::default(),
        }
    }

    pub fn width(&self) -> usize {
        self.channels.first().map_or(0, |c| c.ncols())
    }

    pub fn height(&self) -> usize {
        self.channels.first().map_or(0, |c| c.nrows())
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    pub fn is_color(&self) -> bool {
        self.channels.len() >= 3
    }

    /// Grayscale view: BT.601 luminance for color images, the single plane
    /// otherwise.
    pub fn luminance(&self) -> Array2<f32> {
        if self.is_color() {
            let (r, g, b) = (&self.channels[0], &self.channels[1], &self.channels[2]);
            let mut out = Array2::<f32>::zeros(r.dim());
            ndarray::Zip::from(&mut out)
                .and(r)
                .and(g)
                .and(b)
                .for_each(|o, &r, &g, &b| *o = LUMINANCE_R * r + LUMINANCE_G * g + LUMINANCE_B * b);
            out
        } else {
            self.channels
                .first()
                .cloned()
                .unwrap_or_else(|| Array2::zeros((0, 0)))
        }
    }
}
