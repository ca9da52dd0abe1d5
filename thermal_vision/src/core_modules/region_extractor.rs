// THEORY:
// The `RegionExtractor` is the spatial layer of the classifier. It looks at the
// filtered image once, in HSV space, and produces every statistic the rules need,
// so the rule classifier never touches pixels except to score a finished box.
//
// Key architectural principles & algorithm steps:
// 1.  **One Pass, Five Bands**: Each pixel is converted to HSV exactly once
//     (`HsvPixel`) and tested against the five configured bands: blue, black,
//     yellow, orange and red. Red is the union of a low-hue and a high-hue range,
//     because red straddles the hue wrap-around.
// 2.  **Bands Overlap**: The bands are independent tests, not a partition. A pixel with
//     hue 20 can be orange and yellow at once, and a dark blue pixel is both blue and
//     black. The rules are written against these overlapping counts.
// 3.  **Center Window**: Loose joints show up as heat in the middle of the component.
//     The extractor also counts the fault bands inside the center window (rows
//     `[H/4, 3H/4)`, columns `[W/4, 3W/4)`).
// 4.  **External Contours Only**: Shape rules look at the outer border of each
//     connected region and ignore holes and anything nested inside them. Each
//     contour is summarized as its polygon area and its bounding rectangle.
// 5.  **Stateless Utility**: `extract` is a pure function of the image and the color
//     ranges.

use crate::config::{ColorRanges, HsvRange};
use crate::core_modules::geometry::BoundingBox;
use crate::core_modules::hsv_pixel::hsv::HsvPixel;
use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;

/// The named color bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorBand {
    Blue,
    Black,
    Yellow,
    Orange,
    Red,
}

/// Binary mask of one color band over an image.
#[derive(Debug, Clone)]
pub struct ColorMask {
    mask: GrayImage,
    count: usize,
}

impl ColorMask {
    fn build(pixels: &[HsvPixel], width: u32, height: u32, ranges: &[HsvRange]) -> Self {
        let mut count = 0;
        let raw: Vec<u8> = pixels
            .iter()
            .map(|p| {
                if ranges.iter().any(|r| r.contains(p.hue, p.saturation, p.value)) {
                    count += 1;
                    255
                } else {
                    0
                }
            })
            .collect();
        // `pixels` is row-major width * height.
        let mask = GrayImage::from_raw(width, height, raw).unwrap_or_else(|| GrayImage::new(width, height));
        Self { mask, count }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_set(&self, x: u32, y: u32) -> bool {
        self.mask.get_pixel(x, y).0[0] > 0
    }

    /// Set pixels inside a rectangle that is already clipped to the image.
    pub fn count_within(&self, rect: &BoundingBox) -> usize {
        let mut count = 0;
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                if self.is_set(x as u32, y as u32) {
                    count += 1;
                }
            }
        }
        count
    }

    /// Outer borders of the mask's connected regions, excluding anything inside a hole.
    pub fn external_contours(&self) -> Vec<RegionContour> {
        find_contours::<i32>(&self.mask)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter_map(|c| RegionContour::from_points(&c.points))
            .collect()
    }
}

/// One external contour, reduced to what the rules look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionContour {
    /// Polygon area of the traced border (shoelace). A single pixel has area 0.
    pub area: f64,
    pub bounding_box: BoundingBox,
}

impl RegionContour {
    pub fn from_points(points: &[Point<i32>]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self {
            area: polygon_area(points),
            bounding_box: BoundingBox::from_inclusive_corners(
                min_x as i64,
                min_y as i64,
                max_x as i64,
                max_y as i64,
            ),
        })
    }
}

/// Shoelace area of a closed polygon.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice.abs() as f64 / 2.0
}

/// Fault-band counts inside the center window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterWindow {
    /// The window's pixel footprint, rows `[H/4, 3H/4)` and columns `[W/4, 3W/4)`.
    pub window: BoundingBox,
    /// The box reported for a loose joint, `(W/4, H/4, W/2, H/2)`.
    pub report_box: BoundingBox,
    pub area: usize,
    pub red: usize,
    pub orange: usize,
    pub yellow: usize,
}

/// Everything the rule classifier needs about one image.
#[derive(Debug, Clone)]
pub struct RegionStats {
    pub width: u32,
    pub height: u32,
    pub total: usize,
    pub blue: ColorMask,
    pub black: ColorMask,
    pub yellow: ColorMask,
    pub orange: ColorMask,
    pub red: ColorMask,
    pub center: CenterWindow,
    pub red_contours: Vec<RegionContour>,
    pub yellow_contours: Vec<RegionContour>,
    pub orange_contours: Vec<RegionContour>,
}

impl RegionStats {
    pub fn ratio(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 / self.total as f64
        }
    }

    pub fn mask(&self, band: ColorBand) -> &ColorMask {
        match band {
            ColorBand::Blue => &self.blue,
            ColorBand::Black => &self.black,
            ColorBand::Yellow => &self.yellow,
            ColorBand::Orange => &self.orange,
            ColorBand::Red => &self.red,
        }
    }

    /// External contours for the three fault bands. Blue and black have none.
    pub fn contours(&self, band: ColorBand) -> &[RegionContour] {
        match band {
            ColorBand::Red => &self.red_contours,
            ColorBand::Yellow => &self.yellow_contours,
            ColorBand::Orange => &self.orange_contours,
            ColorBand::Blue | ColorBand::Black => &[],
        }
    }
}

pub mod region_extractor {
    use super::*;

    pub fn extract(image: &RgbImage, ranges: &ColorRanges) -> RegionStats {
        let (width, height) = image.dimensions();

        // --- 1. HSV Conversion ---
        let pixels: Vec<HsvPixel> = image.pixels().map(HsvPixel::from_rgb).collect();

        // --- 2. Band Masks ---
        let blue = ColorMask::build(&pixels, width, height, &[ranges.blue]);
        let black = ColorMask::build(&pixels, width, height, &[ranges.black]);
        let yellow = ColorMask::build(&pixels, width, height, &[ranges.yellow]);
        let orange = ColorMask::build(&pixels, width, height, &[ranges.orange]);
        let red = ColorMask::build(&pixels, width, height, &[ranges.red_low, ranges.red_high]);

        // --- 3. Center Window ---
        let (w, h) = (width as i64, height as i64);
        let window = BoundingBox::new(w / 4, h / 4, 3 * w / 4 - w / 4, 3 * h / 4 - h / 4);
        let center = CenterWindow {
            window,
            report_box: BoundingBox::new(w / 4, h / 4, w / 2, h / 2),
            area: window.area() as usize,
            red: red.count_within(&window),
            orange: orange.count_within(&window),
            yellow: yellow.count_within(&window),
        };

        // --- 4. External Contours ---
        let red_contours = red.external_contours();
        let yellow_contours = yellow.external_contours();
        let orange_contours = orange.external_contours();

        tracing::trace!(
            blue = blue.count(),
            black = black.count(),
            yellow = yellow.count(),
            orange = orange.count(),
            red = red.count(),
            contours = red_contours.len() + yellow_contours.len() + orange_contours.len(),
            "extracted regions"
        );

        RegionStats {
            width,
            height,
            total: width as usize * height as usize,
            blue,
            black,
            yellow,
            orange,
            red,
            center,
            red_contours,
            yellow_contours,
            orange_contours,
        }
    }
}

/// Paints a filled rectangle, clipped to the image.
pub fn fill_rect(image: &mut RgbImage, rect: BoundingBox, color: image::Rgb<u8>) {
    if let Some(r) = rect.clipped_to(image.width(), image.height()) {
        for y in r.y..r.bottom() {
            for x in r.x..r.right() {
                image.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::region_extractor::extract;
    use super::*;
    use image::{Luma, Rgb};

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);
    const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

    #[test]
    fn black_image_is_all_black_band() {
        let stats = extract(&RgbImage::new(20, 10), &ColorRanges::default());
        assert_eq!(stats.total, 200);
        assert_eq!(stats.black.count(), 200);
        assert_eq!(stats.red.count(), 0);
        assert!(stats.red_contours.is_empty());
    }

    #[test]
    fn bands_overlap_where_ranges_overlap() {
        // Hue 20 is inside both orange (10..25) and yellow (20..35).
        let image = RgbImage::from_pixel(4, 4, Rgb([255, 170, 0]));
        let (hue, _, _) = crate::core_modules::hsv_pixel::hsv::rgb_to_hsv(255, 170, 0);
        assert_eq!(hue, 20);
        let stats = extract(&image, &ColorRanges::default());
        assert_eq!(stats.orange.count(), 16);
        assert_eq!(stats.yellow.count(), 16);
    }

    #[test]
    fn square_contour_area_and_box() {
        let mut image = RgbImage::new(50, 50);
        fill_rect(&mut image, BoundingBox::new(10, 5, 10, 10), RED);
        let stats = extract(&image, &ColorRanges::default());

        assert_eq!(stats.red_contours.len(), 1);
        let contour = stats.red_contours[0];
        assert_eq!(contour.bounding_box, BoundingBox::new(10, 5, 10, 10));
        // Border pixel centers span 9 x 9.
        assert_eq!(contour.area, 81.0);
    }

    #[test]
    fn nested_regions_report_only_the_outer_border() {
        let mut image = RgbImage::new(40, 40);
        fill_rect(&mut image, BoundingBox::new(5, 5, 30, 30), RED);
        fill_rect(&mut image, BoundingBox::new(10, 10, 20, 20), BLUE);
        fill_rect(&mut image, BoundingBox::new(15, 15, 5, 5), RED);
        let stats = extract(&image, &ColorRanges::default());
        assert_eq!(stats.red_contours.len(), 1);
        assert_eq!(stats.red_contours[0].bounding_box, BoundingBox::new(5, 5, 30, 30));
    }

    #[test]
    fn center_window_counts_only_the_middle() {
        let mut image = RgbImage::new(8, 8);
        fill_rect(&mut image, BoundingBox::new(0, 0, 8, 1), YELLOW);
        fill_rect(&mut image, BoundingBox::new(3, 3, 2, 2), RED);
        let stats = extract(&image, &ColorRanges::default());

        assert_eq!(stats.center.window, BoundingBox::new(2, 2, 4, 4));
        assert_eq!(stats.center.area, 16);
        assert_eq!(stats.center.red, 4);
        assert_eq!(stats.center.yellow, 0);
    }

    #[test]
    fn odd_dimensions_keep_slice_and_report_box_apart() {
        let stats = extract(&RgbImage::new(7, 7), &ColorRanges::default());
        assert_eq!(stats.center.window, BoundingBox::new(1, 1, 4, 4));
        assert_eq!(stats.center.report_box, BoundingBox::new(1, 1, 3, 3));
    }

    #[test]
    fn shoelace_matches_rectangle() {
        let pts = [Point::new(0, 0), Point::new(4, 0), Point::new(4, 3), Point::new(0, 3)];
        assert_eq!(polygon_area(&pts), 12.0);
        assert_eq!(polygon_area(&pts[..2]), 0.0);
        let mask = GrayImage::from_fn(3, 3, |x, y| {
            if x == 1 && y == 1 { Luma([255]) } else { Luma([0]) }
        });
        assert_eq!(find_contours::<i32>(&mask).len(), 1);
    }
}
