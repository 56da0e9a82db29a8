//! File-name heuristics used when header keywords do not classify a frame.
//!
//! Names are split into tokens on every character that is neither
//! alphanumeric nor a decimal point, so `M42_Light_R_bin2_300s_001.fits`
//! yields `M42`, `Light`, `R`, `bin2`, `300s` and `001`.

use std::path::Path;

use crate::frame::ImageType;

fn tokens(text: &str) -> Vec<&str> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '.'))
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
        .collect()
}

fn stem_tokens(path: &Path) -> Vec<&str> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(tokens)
        .unwrap_or_default()
}

fn type_from_token(token: &str) -> Option<ImageType> {
    match token.to_lowercase().as_str() {
        "bias" | "biases" | "offset" | "offsets" => Some(ImageType::Bias),
        "dark" | "darks" => Some(ImageType::Dark),
        "flat" | "flats" | "flatfield" | "flatfields" => Some(ImageType::Flat),
        "light" | "lights" | "science" => Some(ImageType::Light),
        _ => None,
    }
}

/// Split a token into its leading number and the remaining suffix.
fn leading_number(token: &str) -> Option<(f64, &str)> {
    let end = token
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map_or(token.len(), |(i, _)| i);
    if end == 0 {
        return None;
    }
    token[..end].parse::<f64>().ok().map(|v| (v, &token[end..]))
}

/// Frame type from the file name, falling back to the parent directory name.
pub fn image_type_from_path(path: &Path) -> Option<ImageType> {
    if let Some(t) = stem_tokens(path).into_iter().find_map(type_from_token) {
        return Some(t);
    }
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .and_then(|n| tokens(n).into_iter().find_map(type_from_token))
}

/// Binning from `bin2`, `binning2`, `bin_2` or `2x2` tokens.
pub fn binning_from_path(path: &Path) -> Option<u32> {
    let toks = stem_tokens(path);
    for (i, tok) in toks.iter().enumerate() {
        let lower = tok.to_lowercase();
        for prefix in ["binning", "bin"] {
            if let Some(rest) = lower.strip_prefix(prefix) {
                let value = if rest.is_empty() {
                    toks.get(i + 1).and_then(|n| n.parse::<u32>().ok())
                } else {
                    rest.parse::<u32>().ok()
                };
                if let Some(b) = value.filter(|b| *b > 0) {
                    return Some(b);
                }
            }
        }
        if let Some((x, y)) = lower.split_once('x') {
            if let (Ok(x), Ok(y)) = (x.parse::<u32>(), y.parse::<u32>()) {
                if x == y && x > 0 {
                    return Some(x);
                }
            }
        }
    }
    None
}

/// Filter from `filterR`, `filter_R` or `filter-Ha` tokens. Case is kept.
pub fn filter_from_path(path: &Path) -> Option<String> {
    let toks = stem_tokens(path);
    for (i, tok) in toks.iter().enumerate() {
        if tok.len() >= 6 && tok[..6].eq_ignore_ascii_case("filter") {
            let rest = &tok[6..];
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
            if let Some(next) = toks.get(i + 1) {
                return Some(next.to_string());
            }
        }
    }
    None
}

/// Exposure from `300s`, `300sec`, `0.5secs`, `exp300`, `exptime300` or
/// `exposure_300` tokens.
pub fn exposure_from_path(path: &Path) -> Option<f64> {
    let toks = stem_tokens(path);
    for (i, tok) in toks.iter().enumerate() {
        let lower = tok.to_lowercase();
        if let Some((value, unit)) = leading_number(&lower) {
            if matches!(unit, "s" | "sec" | "secs") && value > 0.0 {
                return Some(value);
            }
        }
        for prefix in ["exposure", "exptime", "exp"] {
            if let Some(rest) = lower.strip_prefix(prefix) {
                let value = if rest.is_empty() {
                    toks.get(i + 1).and_then(|n| leading_number(n)).map(|(v, _)| v)
                } else {
                    leading_number(rest).map(|(v, _)| v)
                };
                if let Some(v) = value.filter(|v| *v > 0.0) {
                    return Some(v);
                }
            }
        }
    }
    None
}

/// Replace every character that is not safe in a file name with `_`.
pub fn clean_filter_name(filter: &str) -> String {
    filter
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
