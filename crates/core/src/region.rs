//! Resolution-relative regions of interest.
//!
//! Every region is a fixed fraction of the target window. The absolute
//! rectangle is derived from the window geometry at call time and never
//! stored, so a window that moves or resizes between probes is always
//! addressed correctly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Region, ScreenRect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedRegion {
    Full,
    HudCorner,
    BottomRight,
    Center,
    TopHalf,
}

impl NamedRegion {
    pub const ALL: [NamedRegion; 5] = [
        NamedRegion::Full,
        NamedRegion::HudCorner,
        NamedRegion::BottomRight,
        NamedRegion::Center,
        NamedRegion::TopHalf,
    ];

    /// (left, top, width, height) as fractions of the window size.
    pub fn fractions(self) -> (f64, f64, f64, f64) {
        match self {
            NamedRegion::Full => (0.0, 0.0, 1.0, 1.0),
            NamedRegion::HudCorner => (0.0, 0.7, 0.3, 0.3),
            NamedRegion::BottomRight => (0.7, 0.7, 0.3, 0.3),
            NamedRegion::Center => (0.3, 0.3, 0.4, 0.4),
            NamedRegion::TopHalf => (0.0, 0.0, 1.0, 0.5),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NamedRegion::Full => "full",
            NamedRegion::HudCorner => "hud_corner",
            NamedRegion::BottomRight => "bottom_right",
            NamedRegion::Center => "center",
            NamedRegion::TopHalf => "top_half",
        }
    }
}

impl fmt::Display for NamedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Map `region` onto absolute display coordinates for the window as it is now.
pub fn resolve(region: NamedRegion, window: &Region) -> ScreenRect {
    let (fx, fy, fw, fh) = region.fractions();
    let w = window.w.max(0) as f64;
    let h = window.h.max(0) as f64;

    // Extents are clamped against the rounded origin so the rect never leaves the window.
    let dx = (w * fx).round() as i32;
    let dy = (h * fy).round() as i32;
    let width = ((w * fw).round() as i32).min(window.w - dx).max(0) as u32;
    let height = ((h * fh).round() as i32).min(window.h - dy).max(0) as u32;

    ScreenRect::new(window.l + dx, window.t + dy, width, height)
}

/// Ratio between the target's current size and the resolution templates were cut at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactor {
    pub x: f64,
    pub y: f64,
}

impl ScaleFactor {
    pub const UNITY: ScaleFactor = ScaleFactor { x: 1.0, y: 1.0 };

    pub fn between(window: &Region, reference_w: u32, reference_h: u32) -> Self {
        if window.w <= 0 || window.h <= 0 || reference_w == 0 || reference_h == 0 {
            return Self::UNITY;
        }
        Self {
            x: window.w as f64 / reference_w as f64,
            y: window.h as f64 / reference_h as f64,
        }
    }

    pub fn is_unity(&self) -> bool {
        (self.x - 1.0).abs() < 1e-3 && (self.y - 1.0).abs() < 1e-3
    }

    /// Scaled extent, never below one pixel.
    pub fn apply(&self, width: u32, height: u32) -> (u32, u32) {
        let w = (width as f64 * self.x).round().max(1.0) as u32;
        let h = (height as f64 * self.y).round().max(1.0) as u32;
        (w, h)
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        Self::UNITY
    }
}
