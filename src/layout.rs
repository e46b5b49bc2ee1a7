//! Page geometry in PDF user space
//!
//! All values are points (1/72 inch) with the origin at the bottom-left of
//! the page's MediaBox.

/// Axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle from two opposite corners in any order, as stored in a
    /// `/MediaBox` array
    pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn top(&self) -> f64 {
        self.y + self.height
    }

    /// `[llx lly urx ury]` as stored in page dictionaries
    pub fn to_array(&self) -> [f64; 4] {
        [self.x, self.y, self.right(), self.top()]
    }
}

/// Standard page sizes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDimensions {
    pub width: f64,
    pub height: f64,
}

impl PageDimensions {
    /// US Letter size (8.5" × 11")
    pub const LETTER: Self = Self { width: 612.0, height: 792.0 };

    pub fn media_box(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }
}

/// Place a box of the given size in the bottom-right corner of `page`,
/// inset by the margins
pub fn anchor_bottom_right(
    page: &Rect,
    width: f64,
    height: f64,
    margin_right: f64,
    margin_bottom: f64,
) -> Rect {
    Rect::new(
        page.right() - width - margin_right,
        page.y + margin_bottom,
        width,
        height,
    )
}
