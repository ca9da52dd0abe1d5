// THEORY:
// Axis-aligned boxes in original-image pixel coordinates, plus the handful of
// pairwise relations the resolver is built from (IoU, containment, overlap, union,
// center distance).
//
// Boxes are signed on purpose. The classifier only ever produces boxes inside the
// image, but merged or hand-edited boxes need not be, and none of the relations
// below may assume otherwise.

use serde::{Deserialize, Serialize};

/// An (x, y, width, height) rectangle. `x + width` is one past the right edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i64; 4]", into = "[i64; 4]")]
pub struct BoundingBox {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl BoundingBox {
    pub const fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds the box that covers the inclusive pixel range `[min, max]` on both axes.
    pub fn from_inclusive_corners(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Self {
        Self::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
    }

    pub fn right(&self) -> i64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i64 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        self.width * self.height
    }

    /// Integer center, rounding toward the top-left like the rest of the pipeline.
    pub fn center(&self) -> (i64, i64) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// `max(w, h) / min(w, h)`, guarded so a zero-width sliver does not divide by zero.
    pub fn aspect_ratio(&self) -> f64 {
        let long = self.width.max(self.height) as f64;
        let short = self.width.min(self.height) as f64;
        long / (short + 1e-6)
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> i64 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right - left).max(0) * (bottom - top).max(0)
    }

    /// Intersection over union with a small epsilon so two empty boxes yield 0.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let inter = self.intersection_area(other) as f64;
        inter / (self.area() as f64 + other.area() as f64 - inter + 1e-6)
    }

    /// True when all four edges of `self` lie within `outer`.
    pub fn is_inside(&self, outer: &BoundingBox) -> bool {
        self.x >= outer.x
            && self.y >= outer.y
            && self.right() <= outer.right()
            && self.bottom() <= outer.bottom()
    }

    /// Strictly positive intersection area. Touching edges do not count.
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        right > left && bottom > top
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        BoundingBox::new(x, y, right - x, bottom - y)
    }

    /// Clips the box to a `width x height` raster. Returns `None` when nothing is left.
    pub fn clipped_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let x0 = self.x.clamp(0, width as i64);
        let y0 = self.y.clamp(0, height as i64);
        let x1 = self.right().clamp(0, width as i64);
        let y1 = self.bottom().clamp(0, height as i64);
        (x1 > x0 && y1 > y0).then(|| BoundingBox::new(x0, y0, x1 - x0, y1 - y0))
    }
}

impl From<[i64; 4]> for BoundingBox {
    fn from([x, y, width, height]: [i64; 4]) -> Self {
        Self::new(x, y, width, height)
    }
}

impl From<BoundingBox> for [i64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}
