// THEORY:
// The `RuleClassifier` is the decision layer. It reads the `RegionStats` of one
// filtered image and produces a global verdict plus a list of candidate boxes. It
// has no learned parameters. Every decision is an area, coverage or aspect-ratio
// threshold, and all thresholds are driven by one sensitivity scalar.
//
// Key architectural principles & rule order:
// 1.  **Global Dominance**: A cheap, informational first label from band ratios
//     ("Normal" for a mostly blue/black image, "Full Wire Overload" when red+orange
//     or yellow dominate). Later rules may overwrite it.
// 2.  **Full Wire Short-Circuit**: When the fault bands cover most of the image, the
//     whole image is one box and the point/loose-joint rules are skipped.
// 3.  **Point Overloads & Loose Joints**: Otherwise, red and yellow contours inside an
//     area window become point overloads, and heat concentrated in the center window
//     becomes a loose joint (faulty beats potential).
// 4.  **Always-On Rules**: Tiny spots and elongated wire strips are evaluated no
//     matter what the earlier rules decided. Strips are prepended so they lead the
//     candidate list.
// 5.  **Sensitivity Scaling**: Higher sensitivity lowers the area floors and raises the
//     area ceilings. Every threshold is clamped, so no sensitivity in range can push
//     one negative or past its cap.
//
// Rules fire independently and overlap freely. De-duplication is the resolver's job.

use crate::config::Sensitivity;
use crate::core_modules::fault_label::FaultLabel;
use crate::core_modules::geometry::BoundingBox;
use crate::core_modules::hsv_pixel::hsv::gray_level;
use crate::core_modules::region_extractor::{ColorBand, ColorMask, RegionStats};
use image::RgbImage;

/// Confidence used when a box has no pixels inside the image.
pub const DEGENERATE_CONFIDENCE: f64 = 0.5;

/// One candidate or final detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: FaultLabel,
    pub confidence: f64,
}

impl Detection {
    pub fn new(bbox: BoundingBox, label: FaultLabel, confidence: f64) -> Self {
        Self {
            bbox,
            label,
            confidence,
        }
    }
}

/// Rounds to three decimals, the precision every reported confidence carries.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// All rule thresholds for one sensitivity and image size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Fault-band fraction above which the whole image is one wire overload.
    pub full_wire_ratio: f64,
    pub faulty_min_area: f64,
    pub potential_min_area: f64,
    pub point_max_area: f64,
    /// Fraction of the center window that must be hot for a loose joint.
    pub center_fraction: f64,
    pub tiny_min_area: f64,
    pub tiny_max_area: f64,
    pub strip_min_area: f64,
    pub strip_min_aspect: f64,
}

impl Thresholds {
    pub fn for_sensitivity(sensitivity: Sensitivity, total: usize) -> Self {
        let s = sensitivity.value();
        let total = total as f64;
        Self {
            full_wire_ratio: f64::max(0.5, 0.7 / s),
            faulty_min_area: ((120.0 / s) as i64).max(10) as f64,
            potential_min_area: ((1000.0 / s) as i64).max(50) as f64,
            point_max_area: f64::min(0.2 * total, 0.05 * total * s),
            center_fraction: f64::max(0.05, 0.1 / s),
            tiny_min_area: ((10.0 / s) as i64).max(5) as f64,
            tiny_max_area: ((30.0 * s) as i64).min(100) as f64,
            strip_min_area: f64::max(0.005 * total, 0.01 * total / s),
            strip_min_aspect: f64::max(3.0, 5.0 / s),
        }
    }
}

/// Output of one classification pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub global_label: FaultLabel,
    /// Unresolved candidates: strips first, then point overloads, loose joint, tiny spots.
    pub candidates: Vec<Detection>,
}

pub mod rule_classifier {
    use super::*;

    pub fn classify(image: &RgbImage, stats: &RegionStats, sensitivity: Sensitivity) -> Classification {
        let thresholds = Thresholds::for_sensitivity(sensitivity, stats.total);
        let mut global_label = FaultLabel::Unknown;
        let mut candidates = Vec::new();

        if stats.total == 0 {
            return Classification {
                global_label,
                candidates,
            };
        }

        // --- 1. Global Color Dominance ---
        let blue_black = stats.ratio(stats.blue.count() + stats.black.count());
        let red_orange = stats.ratio(stats.red.count() + stats.orange.count());
        let yellow = stats.ratio(stats.yellow.count());
        if blue_black > 0.8 {
            global_label = FaultLabel::Normal;
        } else if red_orange > 0.5 || yellow > 0.5 {
            global_label = FaultLabel::FullWireOverload;
        }

        // --- 2. Full Wire Overload ---
        let fault_ratio =
            stats.ratio(stats.red.count() + stats.orange.count() + stats.yellow.count());
        if fault_ratio > thresholds.full_wire_ratio {
            global_label = FaultLabel::FullWireOverload;
            let confidence = f64::min(0.95, 0.7 + (fault_ratio - thresholds.full_wire_ratio) * 0.8);
            candidates.push(Detection::new(
                BoundingBox::new(0, 0, stats.width as i64, stats.height as i64),
                FaultLabel::FullWireOverload,
                round3(confidence),
            ));
        } else {
            // --- 3a. Point Overloads ---
            let point_rules = [
                (ColorBand::Red, FaultLabel::PointOverloadFaulty, thresholds.faulty_min_area),
                (ColorBand::Yellow, FaultLabel::PointOverloadPotential, thresholds.potential_min_area),
            ];
            for (band, label, min_area) in point_rules {
                let mask = stats.mask(band);
                for contour in stats.contours(band) {
                    if min_area < contour.area && contour.area < thresholds.point_max_area {
                        let bbox = contour.bounding_box;
                        let confidence = box_confidence(image, &bbox, mask, label);
                        candidates.push(Detection::new(bbox, label, confidence));
                    }
                }
            }

            // --- 3b. Loose Joint ---
            if let Some(joint) = loose_joint(stats, &thresholds) {
                global_label = joint.label;
                candidates.push(joint);
            }
        }

        // --- 4. Tiny Spots ---
        let tiny_rules = [
            (ColorBand::Red, FaultLabel::TinyFaultySpot),
            (ColorBand::Yellow, FaultLabel::TinyPotentialSpot),
        ];
        for (band, label) in tiny_rules {
            let mask = stats.mask(band);
            for contour in stats.contours(band) {
                if thresholds.tiny_min_area < contour.area && contour.area < thresholds.tiny_max_area {
                    let bbox = contour.bounding_box;
                    candidates.push(Detection::new(bbox, label, box_confidence(image, &bbox, mask, label)));
                }
            }
        }

        // --- 5. Wire Strips ---
        let strip_rules = [
            (ColorBand::Red, FaultLabel::WireOverloadRedStrip),
            (ColorBand::Yellow, FaultLabel::WireOverloadYellowStrip),
            (ColorBand::Orange, FaultLabel::WireOverloadOrangeStrip),
        ];
        let mut strips = Vec::new();
        for (band, label) in strip_rules {
            let mask = stats.mask(band);
            for contour in stats.contours(band) {
                let bbox = contour.bounding_box;
                if contour.area > thresholds.strip_min_area
                    && bbox.aspect_ratio() > thresholds.strip_min_aspect
                {
                    strips.push(Detection::new(bbox, label, box_confidence(image, &bbox, mask, label)));
                }
            }
        }
        strips.extend(candidates);

        tracing::debug!(
            global = %global_label,
            candidates = strips.len(),
            sensitivity = sensitivity.value(),
            "classified image"
        );

        Classification {
            global_label,
            candidates: strips,
        }
    }

    fn loose_joint(stats: &RegionStats, thresholds: &Thresholds) -> Option<Detection> {
        let center = &stats.center;
        if center.area == 0 {
            return None;
        }
        // `center.area` counts pixels, not pixel channels, so the fraction compares
        // like with like against the per-pixel band counts.
        let threshold = thresholds.center_fraction * center.area as f64;
        let area = center.area as f64;

        let hot = (center.red + center.orange) as f64;
        if hot > threshold {
            let confidence = f64::min(0.85, 0.6 + hot / area);
            return Some(Detection::new(center.report_box, FaultLabel::LooseJointFaulty, round3(confidence)));
        }
        let warm = center.yellow as f64;
        if warm > threshold {
            let confidence = f64::min(0.75, 0.5 + warm / area);
            return Some(Detection::new(center.report_box, FaultLabel::LooseJointPotential, round3(confidence)));
        }
        None
    }

    /// General confidence for a box found in `mask`.
    ///
    /// Blends the label's prior, how much of the box the mask fills, how bright the
    /// masked pixels are, and a size term that penalizes specks and very large boxes.
    pub fn box_confidence(image: &RgbImage, bbox: &BoundingBox, mask: &ColorMask, label: FaultLabel) -> f64 {
        let (width, height) = image.dimensions();
        let Some(roi) = bbox.clipped_to(width, height) else {
            return DEGENERATE_CONFIDENCE;
        };

        let mut covered = 0usize;
        let mut gray_sum = 0.0;
        for y in roi.y..roi.bottom() {
            for x in roi.x..roi.right() {
                let (x, y) = (x as u32, y as u32);
                if mask.is_set(x, y) {
                    covered += 1;
                    gray_sum += gray_level(image.get_pixel(x, y));
                }
            }
        }

        let coverage = covered as f64 / roi.area() as f64;
        let intensity = if covered > 0 {
            gray_sum / covered as f64 / 255.0
        } else {
            0.0
        };

        let total = width as f64 * height as f64;
        let size_ratio = bbox.area() as f64 / total;
        let size_conf = if size_ratio < 0.0001 {
            size_ratio / 0.0001
        } else if size_ratio > 0.1 {
            f64::max(0.3, 1.0 - (size_ratio - 0.1) / 0.9)
        } else {
            1.0
        };

        let score = 0.4 * base_confidence(label) + 0.35 * coverage + 0.15 * intensity + 0.10 * size_conf;
        round3(score.clamp(0.3, 0.99))
    }

    /// Label prior. The first matching family wins.
    pub fn base_confidence(label: FaultLabel) -> f64 {
        if label.is_faulty() {
            0.7
        } else if label.is_potential() {
            0.6
        } else if label.is_tiny() {
            0.5
        } else if label.is_wire_or_full() {
            0.8
        } else if label.is_loose_joint() {
            0.7
        } else {
            0.6
        }
    }
}

#[cfg(test)]
mod tests {
    use super::rule_classifier::*;
    use super::*;
    use crate::config::ColorRanges;
    use crate::core_modules::region_extractor::{fill_rect, region_extractor::extract};
    use approx::assert_relative_eq;
    use image::Rgb;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

    fn run(image: &RgbImage, s: f64) -> Classification {
        let stats = extract(image, &ColorRanges::default());
        classify(image, &stats, Sensitivity::new(s))
    }

    #[test]
    fn all_red_is_one_full_wire_box() {
        let image = RgbImage::from_pixel(100, 80, RED);
        let result = run(&image, 1.0);
        assert_eq!(result.global_label, FaultLabel::FullWireOverload);
        assert_eq!(result.candidates.len(), 1);
        let only = result.candidates[0];
        assert_eq!(only.bbox, BoundingBox::new(0, 0, 100, 80));
        assert_eq!(only.label, FaultLabel::FullWireOverload);
        // 0.7 + (1.0 - 0.7) * 0.8
        assert_relative_eq!(only.confidence, 0.94, epsilon = 1e-9);
    }

    #[test]
    fn all_blue_is_normal_without_candidates() {
        let image = RgbImage::from_pixel(64, 64, BLUE);
        let result = run(&image, 1.0);
        assert_eq!(result.global_label, FaultLabel::Normal);
        assert!(result.candidates.is_empty());
    }

    #[test]
    fn red_square_is_faulty_point_overload() {
        let mut image = RgbImage::new(200, 200);
        fill_rect(&mut image, BoundingBox::new(20, 20, 20, 20), RED);
        let result = run(&image, 1.0);

        // Mostly black, so the informational label stays Normal.
        assert_eq!(result.global_label, FaultLabel::Normal);
        assert_eq!(result.candidates.len(), 1);
        let hit = result.candidates[0];
        assert_eq!(hit.label, FaultLabel::PointOverloadFaulty);
        assert_eq!(hit.bbox, BoundingBox::new(20, 20, 20, 20));
        // 0.4*0.7 + 0.35*1.0 + 0.15*(85/255) + 0.10*1.0
        assert_relative_eq!(hit.confidence, 0.78, epsilon = 1e-9);
    }

    #[test]
    fn hot_center_is_loose_joint() {
        let mut image = RgbImage::new(100, 100);
        fill_rect(&mut image, BoundingBox::new(35, 35, 30, 30), RED);
        let result = run(&image, 1.0);

        assert_eq!(result.global_label, FaultLabel::LooseJointFaulty);
        assert_eq!(result.candidates.len(), 1);
        let joint = result.candidates[0];
        assert_eq!(joint.bbox, BoundingBox::new(25, 25, 50, 50));
        assert_relative_eq!(joint.confidence, 0.85, epsilon = 1e-9);
    }

    #[test]
    fn loose_joint_threshold_counts_pixels() {
        let loose_joint = |result: &Classification| {
            result
                .candidates
                .iter()
                .find(|d| d.label == FaultLabel::LooseJointFaulty)
                .copied()
        };

        // Center window is 50x50 = 2500 pixels, so the cut at s=1 is 250 hot pixels.
        let mut image = RgbImage::new(100, 100);
        fill_rect(&mut image, BoundingBox::new(40, 40, 20, 15), RED);
        let joint = loose_joint(&run(&image, 1.0)).unwrap();
        // 0.6 + 300 / 2500
        assert_relative_eq!(joint.confidence, 0.72, epsilon = 1e-9);

        let mut image = RgbImage::new(100, 100);
        fill_rect(&mut image, BoundingBox::new(40, 40, 15, 15), RED);
        assert!(loose_joint(&run(&image, 1.0)).is_none());
    }

    #[test]
    fn strips_lead_the_candidate_list() {
        let mut image = RgbImage::new(200, 100);
        fill_rect(&mut image, BoundingBox::new(10, 10, 100, 4), RED);
        let result = run(&image, 1.0);

        let labels: Vec<_> = result.candidates.iter().map(|d| d.label).collect();
        assert_eq!(
            labels,
            vec![FaultLabel::WireOverloadRedStrip, FaultLabel::PointOverloadFaulty]
        );
    }

    #[test]
    fn small_red_dot_is_tiny_faulty_spot() {
        let mut image = RgbImage::new(100, 100);
        fill_rect(&mut image, BoundingBox::new(5, 5, 5, 5), RED);
        let result = run(&image, 1.0);

        assert_eq!(result.candidates.len(), 1);
        let spot = result.candidates[0];
        assert_eq!(spot.label, FaultLabel::TinyFaultySpot);
        // "Tiny Faulty Spot" takes the faulty prior, not the tiny one.
        assert_relative_eq!(base_confidence(spot.label), 0.7);
        assert_relative_eq!(spot.confidence, 0.78, epsilon = 1e-9);
    }

    #[test]
    fn strip_labels_use_wire_prior() {
        assert_relative_eq!(base_confidence(FaultLabel::WireOverloadRedStrip), 0.8);
        assert_relative_eq!(base_confidence(FaultLabel::FullWireOverload), 0.8);
        assert_relative_eq!(base_confidence(FaultLabel::TinyPotentialSpot), 0.6);
        assert_relative_eq!(base_confidence(FaultLabel::Unknown), 0.6);
    }

    #[test]
    fn box_outside_image_gets_neutral_confidence() {
        let image = RgbImage::from_pixel(10, 10, RED);
        let stats = extract(&image, &ColorRanges::default());
        let outside = BoundingBox::new(50, 50, 5, 5);
        let c = box_confidence(&image, &outside, &stats.red, FaultLabel::PointOverloadFaulty);
        assert_eq!(c, DEGENERATE_CONFIDENCE);
        let empty = BoundingBox::new(2, 2, 0, 4);
        assert_eq!(
            box_confidence(&image, &empty, &stats.red, FaultLabel::PointOverloadFaulty),
            DEGENERATE_CONFIDENCE
        );
    }

    #[test]
    fn confidence_stays_in_range() {
        let image = RgbImage::from_pixel(50, 50, RED);
        let stats = extract(&image, &ColorRanges::default());
        for label in FaultLabel::ALL {
            for bbox in [
                BoundingBox::new(0, 0, 50, 50),
                BoundingBox::new(0, 0, 1, 1),
                BoundingBox::new(10, 10, 5, 30),
            ] {
                for mask in [&stats.red, &stats.blue] {
                    let c = box_confidence(&image, &bbox, mask, label);
                    assert!((0.3..=0.99).contains(&c), "{label} {bbox:?} -> {c}");
                    assert_eq!(round3(c), c);
                }
            }
        }
    }

    #[test]
    fn thresholds_respect_their_caps_across_sensitivity() {
        let total = 640 * 480;
        for step in 1..=200 {
            let s = Sensitivity::new(0.1 + step as f64 * (1.9 / 200.0));
            let t = Thresholds::for_sensitivity(s, total);
            assert!(t.full_wire_ratio >= 0.5);
            assert!(t.faulty_min_area >= 10.0);
            assert!(t.potential_min_area >= 50.0);
            assert!(t.point_max_area > 0.0 && t.point_max_area <= 0.2 * total as f64);
            assert!(t.center_fraction >= 0.05);
            assert!(t.tiny_min_area >= 5.0);
            assert!(t.tiny_max_area >= 0.0 && t.tiny_max_area <= 100.0);
            assert!(t.strip_min_area >= 0.005 * total as f64);
            assert!(t.strip_min_aspect >= 3.0);
        }
    }

    #[test]
    fn thresholds_truncate_like_integer_division() {
        let t = Thresholds::for_sensitivity(Sensitivity::new(0.7), 10_000);
        // 120 / 0.7 = 171.43, 1000 / 0.7 = 1428.57, 10 / 0.7 = 14.29, 30 * 0.7 = 21
        assert_eq!(t.faulty_min_area, 171.0);
        assert_eq!(t.potential_min_area, 1428.0);
        assert_eq!(t.tiny_min_area, 14.0);
        assert_eq!(t.tiny_max_area, 21.0);
    }
}
