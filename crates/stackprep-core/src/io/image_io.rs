use std::path::Path;

use image::ImageReader;
use ndarray::Array2;

use crate::error::ImageError;
use crate::frame::{Image, ImageMetadata};

fn reader(
    path: &Path,
) -> Result<ImageReader<std::io::BufReader<std::fs::File>>, ImageError> {
    ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| ImageError::from_io(path, e))
}

fn decode_error(path: &Path, source: image::ImageError) -> ImageError {
    ImageError::Decode {
        path: path.to_path_buf(),
        source,
    }
}

/// Check that a raster file can be decoded, without decoding the pixels.
pub fn probe_raster(path: &Path) -> Result<(u32, u32), ImageError> {
    reader(path)?
        .into_dimensions()
        .map_err(|e| decode_error(path, e))
}

/// Load a raster image (PNG, TIFF, ...). Pixel values are scaled to [0, 1];
/// color files yield three planes. Raster files carry no keywords.
pub fn load_raster(path: &Path) -> Result<Image, ImageError> {
    let img = reader(path)?.decode().map_err(|e| decode_error(path, e))?;
    let (w, h) = (img.width() as usize, img.height() as usize);

    let channels = if img.color().has_color() {
        let rgb = img.to_rgb32f();
        let mut planes = vec![Array2::<f32>::zeros((h, w)); 3];
        for (col, row, pixel) in rgb.enumerate_pixels() {
            for (c, plane) in planes.iter_mut().enumerate() {
                plane[[row as usize, col as usize]] = pixel.0[c];
            }
        }
        planes
    } else {
        let gray = img.to_luma32f();
        let mut data = Array2::<f32>::zeros((h, w));
        for (col, row, pixel) in gray.enumerate_pixels() {
            data[[row as usize, col as usize]] = pixel.0[0];
        }
        vec![data]
    };

    Ok(Image {
        channels,
        metadata: ImageMetadata::default(),
    })
}
