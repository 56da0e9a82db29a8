use std::sync::Arc;

use ndarray::Array2;

use stackprep_core::catalog::{ForcedValues, FrameCatalog, GroupingPolicy};
use stackprep_core::engine::{ImageSink, ImageSource};
use stackprep_core::frame::{Image, ImageType, Keyword};
use stackprep_core::io::fits::{write_fits, FitsReader};
use stackprep_core::io::{FileImageSource, FitsSink};

fn frame(keywords: &[(&str, &str)]) -> Image {
    let mut data = Array2::<f32>::zeros((3, 5));
    data[[0, 0]] = 0.25;
    data[[1, 4]] = 0.75;
    data[[2, 2]] = 1.5;
    let mut image = Image::mono(data);
    for (name, value) in keywords {
        image.metadata.set_keyword(Keyword::new(*name, *value, ""));
    }
    image
}

// ---------------------------------------------------------------------------
// FITS
// ---------------------------------------------------------------------------

#[test]
fn test_fits_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("light_001.fits");
    let image = frame(&[("IMAGETYP", "Light Frame"), ("EXPTIME", "120.5")]);

    write_fits(&path, &image).unwrap();
    let reader = FitsReader::open(&path).unwrap();
    assert_eq!(reader.header.width, 5);
    assert_eq!(reader.header.height, 3);
    assert_eq!(reader.header.bitpix, -32);
    assert_eq!(reader.header.exposure(), Some(120.5));

    let loaded = reader.read_image().unwrap();
    assert_eq!(loaded.channels.len(), 1);
    assert!((loaded.channels[0][[0, 0]] - 0.25).abs() < 1e-6);
    assert!((loaded.channels[0][[1, 4]] - 0.75).abs() < 1e-6);
    assert!((loaded.channels[0][[2, 2]] - 1.5).abs() < 1e-6);
    assert_eq!(
        loaded.metadata.keyword("IMAGETYP").unwrap().stripped_value(),
        "Light Frame"
    );
}

#[test]
fn test_fits_file_size_is_block_aligned() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bias.fits");
    write_fits(&path, &frame(&[])).unwrap();
    let size = std::fs::metadata(&path).unwrap().len() as usize;
    assert_eq!(size % 2880, 0);
}

#[test]
fn test_fits_sink_rewrites_weight_keyword() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("light_002.fits");
    write_fits(&path, &frame(&[("SWWEIGHT", "1.000E+00")])).unwrap();

    let source = FileImageSource;
    let mut image = source.open(&path).unwrap();
    image
        .metadata
        .set_keyword(Keyword::new("SWWEIGHT", "6.500E+01", "Subframe weight"));
    FitsSink.write(&path, &image).unwrap();

    let metadata = source.metadata(&path).unwrap();
    let weights: Vec<_> = metadata
        .keywords
        .iter()
        .filter(|k| k.name == "SWWEIGHT")
        .collect();
    assert_eq!(weights.len(), 1);
    assert_eq!(weights[0].stripped_value(), "6.500E+01");
    assert_eq!(
        metadata.keywords.iter().filter(|k| k.name == "BITPIX").count(),
        1
    );
}

#[test]
fn test_fits_sink_capabilities() {
    assert!(FitsSink.capabilities(".FIT").is_some());
    assert!(FitsSink.capabilities(".xisf").is_none());
    assert!(!FitsSink.capabilities(".fits").unwrap().can_store_properties);
}

#[test]
fn test_truncated_fits_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.fits");
    write_fits(&path, &frame(&[])).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..2880]).unwrap();
    assert!(FitsReader::open(&path).is_err());
}

// ---------------------------------------------------------------------------
// Catalog ingestion from disk
// ---------------------------------------------------------------------------

#[test]
fn test_catalog_reads_fits_headers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame_001.fits");
    write_fits(
        &path,
        &frame(&[
            ("IMAGETYP", "Dark Frame"),
            ("XBINNING", "2"),
            ("EXPTIME", "300"),
        ]),
    )
    .unwrap();

    let mut catalog = FrameCatalog::new(GroupingPolicy::default(), Arc::new(FileImageSource));
    assert!(catalog.add_file(&path, &ForcedValues::default()));
    let g = &catalog.groups()[0];
    assert_eq!(g.image_type, ImageType::Dark);
    assert_eq!(g.binning, 2);
    assert_eq!(g.exposure, 300.0);
}

// ---------------------------------------------------------------------------
// Raster formats
// ---------------------------------------------------------------------------

#[test]
fn test_png_loads_through_file_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flat_001.png");
    let mut png = image::GrayImage::new(4, 2);
    png.put_pixel(3, 1, image::Luma([255]));
    png.save(&path).unwrap();

    let loaded = FileImageSource.open(&path).unwrap();
    assert_eq!(loaded.width(), 4);
    assert_eq!(loaded.height(), 2);
    assert!((loaded.channels[0][[1, 3]] - 1.0).abs() < 1e-6);
    assert!(loaded.metadata.keywords.is_empty());
}
