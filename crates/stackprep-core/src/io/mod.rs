//! File-backed image sources and sinks.

pub mod fits;
pub mod image_io;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::engine::{FormatCapabilities, ImageSink, ImageSource};
use crate::error::ImageError;
use crate::frame::{Image, ImageMetadata};

use self::fits::{write_fits, FitsReader};

pub const FITS_EXTENSIONS: &[&str] = &[".fits", ".fit", ".fts"];

/// Whether the file starts with a FITS primary header.
fn is_fits(path: &Path) -> Result<bool, ImageError> {
    let mut file = File::open(path).map_err(|e| ImageError::from_io(path, e))?;
    let mut magic = [0u8; 6];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == b"SIMPLE"),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(ImageError::from_io(path, e)),
    }
}

/// Reads FITS files natively and common raster formats through `image`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileImageSource;

impl ImageSource for FileImageSource {
    fn open(&self, path: &Path) -> Result<Image, ImageError> {
        if is_fits(path)? {
            FitsReader::open(path)?.read_image()
        } else {
            image_io::load_raster(path)
        }
    }

    fn metadata(&self, path: &Path) -> Result<ImageMetadata, ImageError> {
        if is_fits(path)? {
            Ok(FitsReader::open(path)?.header.metadata())
        } else {
            image_io::probe_raster(path)?;
            Ok(ImageMetadata::default())
        }
    }
}

/// Writes 32-bit float FITS files.
#[derive(Clone, Copy, Debug, Default)]
pub struct FitsSink;

impl ImageSink for FitsSink {
    fn capabilities(&self, extension: &str) -> Option<FormatCapabilities> {
        let extension = extension.to_lowercase();
        FITS_EXTENSIONS
            .contains(&extension.as_str())
            .then(|| FormatCapabilities {
                name: "FITS".to_string(),
                can_store_float: true,
                can_store_keywords: true,
                can_store_properties: false,
                is_deprecated: false,
            })
    }

    fn write(&self, path: &Path, image: &Image) -> Result<(), ImageError> {
        write_fits(path, image)
    }
}
