use serde::{Deserialize, Serialize};

/// Pixel rectangle, `x1`/`y1` exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl Rect {
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Corners are ordered.
    pub fn is_normal(&self) -> bool {
        self.x0 <= self.x1 && self.y0 <= self.y1
    }

    pub fn is_non_negative(&self) -> bool {
        self.x0 >= 0 && self.y0 >= 0
    }

    pub fn is_empty(&self) -> bool {
        self.x0 == self.x1 || self.y0 == self.y1
    }
}

/// One overscan slot: a source strip measured to correct a target region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverscanRegion {
    pub enabled: bool,
    pub source: Rect,
    pub target: Rect,
}

impl OverscanRegion {
    pub fn is_valid(&self) -> bool {
        !self.enabled
            || (self.source.is_normal()
                && self.target.is_normal()
                && self.source.is_non_negative()
                && self.target.is_non_negative())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overscan {
    pub enabled: bool,
    /// Image area kept after overscan correction (crop rectangle).
    pub image_rect: Rect,
    pub regions: [OverscanRegion; 4],
}

impl Overscan {
    /// Disabled overscan is always valid; otherwise every region and the
    /// image rectangle must be normal and non-negative.
    pub fn is_valid(&self) -> bool {
        if !self.enabled {
            return true;
        }
        self.regions.iter().all(OverscanRegion::is_valid)
            && self.image_rect.is_normal()
            && self.image_rect.is_non_negative()
    }

    pub fn has_regions(&self) -> bool {
        self.regions.iter().any(|r| r.enabled)
    }

    /// The overscan settings to forward to calibration, when enabled.
    pub fn active(&self) -> Option<&Overscan> {
        self.enabled.then_some(self)
    }
}
