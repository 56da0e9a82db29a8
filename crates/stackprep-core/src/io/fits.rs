use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use ndarray::Array2;

use crate::error::ImageError;
use crate::frame::{Image, ImageMetadata, Keyword};

pub const FITS_BLOCK_SIZE: usize = 2880;
pub const FITS_CARD_SIZE: usize = 80;

/// Keywords describing the data layout; rebuilt on write, never copied.
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "NAXIS3", "EXTEND", "BZERO", "BSCALE", "END",
];

/// Primary HDU header of a FITS file.
#[derive(Clone, Debug)]
pub struct FitsHeader {
    pub keywords: Vec<Keyword>,
    pub bitpix: i32,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub bzero: f64,
    pub bscale: f64,
    /// Byte offset of the first data block.
    pub data_offset: usize,
}

impl FitsHeader {
    pub fn bytes_per_sample(&self) -> usize {
        (self.bitpix.unsigned_abs() / 8) as usize
    }

    pub fn data_size(&self) -> usize {
        self.width * self.height * self.channels * self.bytes_per_sample()
    }

    /// Exposure in seconds from EXPTIME or EXPOSURE.
    pub fn exposure(&self) -> Option<f64> {
        self.keywords
            .iter()
            .find(|k| k.name == "EXPTIME" || k.name == "EXPOSURE")
            .and_then(|k| k.stripped_value().parse::<f64>().ok())
    }

    pub fn metadata(&self) -> ImageMetadata {
        ImageMetadata {
            keywords: self.keywords.clone(),
            exposure: self.exposure(),
        }
    }
}

/// Memory-mapped reader of the primary image of a FITS file.
pub struct FitsReader {
    mmap: Mmap,
    path: PathBuf,
    pub header: FitsHeader,
}

impl FitsReader {
    /// Open a FITS file and parse its primary header.
    pub fn open(path: &Path) -> Result<Self, ImageError> {
        let file = File::open(path).map_err(|e| ImageError::from_io(path, e))?;
        let mmap = unsafe { Mmap::map(&file).map_err(|e| ImageError::from_io(path, e))? };

        let header = parse_header(&mmap, path)?;
        if mmap.len() < header.data_offset + header.data_size() {
            return Err(unreadable(
                path,
                format!(
                    "File truncated: expected at least {} bytes, got {}",
                    header.data_offset + header.data_size(),
                    mmap.len()
                ),
            ));
        }

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
            header,
        })
    }

    /// Decode every channel to f32. Integer data is scaled to [0, 1].
    pub fn read_image(&self) -> Result<Image, ImageError> {
        let h = &self.header;
        let plane = h.width * h.height;
        let raw = &self.mmap[h.data_offset..h.data_offset + h.data_size()];
        let mut cursor = Cursor::new(raw);
        let scale = integer_range(h.bitpix);

        let mut channels = Vec::with_capacity(h.channels);
        for _ in 0..h.channels {
            let mut data = Vec::with_capacity(plane);
            for _ in 0..plane {
                let stored = read_sample(&mut cursor, h.bitpix)
                    .map_err(|e| unreadable(&self.path, e.to_string()))?;
                let physical = h.bzero + h.bscale * stored;
                let value = match scale {
                    Some(max) => physical / max,
                    None => physical,
                };
                data.push(value as f32);
            }
            let array = Array2::from_shape_vec((h.height, h.width), data)
                .map_err(|e| unreadable(&self.path, e.to_string()))?;
            channels.push(array);
        }

        Ok(Image {
            channels,
            metadata: h.metadata(),
        })
    }
}

fn unreadable(path: &Path, reason: impl Into<String>) -> ImageError {
    ImageError::UnreadableFormat {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Full-scale value of integer sample formats.
fn integer_range(bitpix: i32) -> Option<f64> {
    match bitpix {
        8 => Some(u8::MAX as f64),
        16 => Some(u16::MAX as f64),
        32 => Some(u32::MAX as f64),
        _ => None,
    }
}

fn read_sample(cursor: &mut Cursor<&[u8]>, bitpix: i32) -> std::io::Result<f64> {
    Ok(match bitpix {
        8 => cursor.read_u8()? as f64,
        16 => cursor.read_i16::<BigEndian>()? as f64,
        32 => cursor.read_i32::<BigEndian>()? as f64,
        -32 => cursor.read_f32::<BigEndian>()? as f64,
        _ => cursor.read_f64::<BigEndian>()?,
    })
}

fn parse_header(buf: &[u8], path: &Path) -> Result<FitsHeader, ImageError> {
    if buf.len() < FITS_BLOCK_SIZE || &buf[0..6] != b"SIMPLE" {
        return Err(unreadable(path, "Missing SIMPLE card"));
    }

    let mut keywords = Vec::new();
    let mut end = None;
    for (i, card) in buf.chunks_exact(FITS_CARD_SIZE).enumerate() {
        let card: String = card
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { '?' })
            .collect();
        let name = card[..8].trim_end().to_string();
        if name == "END" {
            end = Some((i + 1) * FITS_CARD_SIZE);
            break;
        }
        if let Some(keyword) = parse_card(&name, &card) {
            keywords.push(keyword);
        }
    }
    let end = end.ok_or_else(|| unreadable(path, "Missing END card"))?;
    let data_offset = end.div_ceil(FITS_BLOCK_SIZE) * FITS_BLOCK_SIZE;

    let int = |name: &str| -> Option<i64> {
        keywords
            .iter()
            .find(|k| k.name == name)
            .and_then(|k| k.stripped_value().parse::<i64>().ok())
    };
    let float = |name: &str, default: f64| -> f64 {
        keywords
            .iter()
            .find(|k| k.name == name)
            .and_then(|k| k.stripped_value().parse::<f64>().ok())
            .unwrap_or(default)
    };

    if int("NEXTEND").is_some_and(|n| n > 0) {
        return Err(ImageError::MultiImageUnsupported(path.to_path_buf()));
    }

    let bitpix = int("BITPIX").ok_or_else(|| unreadable(path, "Missing BITPIX"))? as i32;
    if !matches!(bitpix, 8 | 16 | 32 | -32 | -64) {
        return Err(unreadable(path, format!("Unsupported BITPIX {bitpix}")));
    }
    let naxis = int("NAXIS").unwrap_or(0);
    if !(2..=3).contains(&naxis) {
        return Err(unreadable(path, format!("Unsupported NAXIS {naxis}")));
    }
    let width = int("NAXIS1").unwrap_or(0).max(0) as usize;
    let height = int("NAXIS2").unwrap_or(0).max(0) as usize;
    let channels = if naxis == 3 {
        int("NAXIS3").unwrap_or(1).max(1) as usize
    } else {
        1
    };
    if width == 0 || height == 0 {
        return Err(unreadable(path, format!("Invalid dimensions {width}x{height}")));
    }

    Ok(FitsHeader {
        bzero: float("BZERO", 0.0),
        bscale: float("BSCALE", 1.0),
        keywords,
        bitpix,
        width,
        height,
        channels,
        data_offset,
    })
}

/// Split a header card into name, raw value and comment.
fn parse_card(name: &str, card: &str) -> Option<Keyword> {
    if name.is_empty() {
        return None;
    }
    if &card[8..10] != "= " {
        // Commentary card: COMMENT, HISTORY or a bare name.
        return Some(Keyword::new(name, "", card[8..].trim()));
    }

    let field = &card[10..];
    let trimmed = field.trim_start();
    if trimmed.starts_with('\'') {
        // Quoted string; '' is an escaped quote.
        let bytes = trimmed.as_bytes();
        let mut i = 1;
        while i < bytes.len() {
            if bytes[i] == b'\'' {
                if bytes.get(i + 1) == Some(&b'\'') {
                    i += 2;
                    continue;
                }
                break;
            }
            i += 1;
        }
        let close = (i + 1).min(trimmed.len());
        let value = &trimmed[..close];
        let comment = trimmed[close..]
            .split_once('/')
            .map(|(_, c)| c.trim())
            .unwrap_or("");
        return Some(Keyword::new(name, value.replace("''", "'"), comment));
    }

    let (value, comment) = match field.split_once('/') {
        Some((v, c)) => (v.trim(), c.trim()),
        None => (field.trim(), ""),
    };
    Some(Keyword::new(name, value, comment))
}

fn is_literal(value: &str) -> bool {
    value == "T" || value == "F" || value.parse::<f64>().is_ok()
}

/// Format one 80-column header card.
fn format_card(keyword: &Keyword) -> String {
    let name: String = keyword.name.chars().take(8).collect();
    let card = if keyword.value.is_empty() && !keyword.comment.is_empty() {
        format!("{name:<8}{}", keyword.comment)
    } else {
        let value = keyword.value.trim();
        let value = if is_literal(value) || value.starts_with('\'') {
            format!("{value:>20}")
        } else {
            format!("'{:<8}'", value.replace('\'', "''"))
        };
        if keyword.comment.is_empty() {
            format!("{name:<8}= {value}")
        } else {
            format!("{name:<8}= {value} / {}", keyword.comment)
        }
    };
    let mut card: String = card.chars().take(FITS_CARD_SIZE).collect();
    while card.len() < FITS_CARD_SIZE {
        card.push(' ');
    }
    card
}

fn pad_to_block(w: &mut impl Write, written: usize, fill: u8) -> std::io::Result<()> {
    let rem = written % FITS_BLOCK_SIZE;
    if rem != 0 {
        w.write_all(&vec![fill; FITS_BLOCK_SIZE - rem])?;
    }
    Ok(())
}

/// Write `image` as a 32-bit float FITS file, carrying its keywords.
pub fn write_fits(path: &Path, image: &Image) -> Result<(), ImageError> {
    let file = File::create(path).map_err(|e| ImageError::Create {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut w = BufWriter::new(file);
    write_contents(&mut w, image).map_err(|e| ImageError::Write {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn write_contents(w: &mut impl Write, image: &Image) -> std::io::Result<()> {
    let mut cards = vec![
        Keyword::new("SIMPLE", "T", "file conforms to FITS standard"),
        Keyword::new("BITPIX", "-32", "32-bit IEEE floating point"),
        Keyword::new("NAXIS", if image.channels.len() > 1 { "3" } else { "2" }, ""),
        Keyword::new("NAXIS1", image.width().to_string(), ""),
        Keyword::new("NAXIS2", image.height().to_string(), ""),
    ];
    if image.channels.len() > 1 {
        cards.push(Keyword::new("NAXIS3", image.channels.len().to_string(), ""));
    }
    cards.extend(
        image
            .metadata
            .keywords
            .iter()
            .filter(|k| !STRUCTURAL_KEYWORDS.contains(&k.name.as_str()))
            .cloned(),
    );

    let mut written = 0;
    for card in &cards {
        w.write_all(format_card(card).as_bytes())?;
        written += FITS_CARD_SIZE;
    }
    w.write_all(format!("{:<80}", "END").as_bytes())?;
    written += FITS_CARD_SIZE;
    pad_to_block(w, written, b' ')?;

    let mut data_bytes = 0;
    for channel in &image.channels {
        for &v in channel.iter() {
            w.write_f32::<BigEndian>(v)?;
            data_bytes += 4;
        }
    }
    pad_to_block(w, data_bytes, 0)?;
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string_card() {
        let card = format!("{:<80}", "FILTER  = 'Ha 7nm  '           / filter name");
        let kw = parse_card("FILTER", &card).unwrap();
        assert_eq!(kw.stripped_value(), "Ha 7nm");
        assert_eq!(kw.comment, "filter name");
    }

    #[test]
    fn test_parse_numeric_card() {
        let card = format!("{:<80}", "EXPTIME =                 60.0 / seconds");
        let kw = parse_card("EXPTIME", &card).unwrap();
        assert_eq!(kw.value, "60.0");
        assert_eq!(kw.comment, "seconds");
    }

    #[test]
    fn test_format_card_width() {
        let card = format_card(&Keyword::new("SWWEIGHT", "6.500E+01", "Subframe weight"));
        assert_eq!(card.len(), FITS_CARD_SIZE);
        assert!(card.starts_with("SWWEIGHT= "));
        assert!(card.contains("6.500E+01 / Subframe weight"));
    }
}
