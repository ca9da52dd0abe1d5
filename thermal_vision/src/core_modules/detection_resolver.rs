// THEORY:
// The `DetectionResolver` turns the classifier's raw, heavily redundant candidate list
// into the final detection set. The rule classifier fires several rules over the same
// hot region (a red contour can be a point overload, a tiny spot and a strip at once),
// so the raw list routinely holds stacked and nested boxes.
//
// Key architectural principles:
// 1.  **Fixed Stage Order**: Four reductions run in exactly this order:
//     NMS -> containment -> overlap -> proximity merge. Each stage sees the output of
//     the previous one. Reordering them changes the final box count (merging first,
//     for instance, grows boxes that NMS would otherwise have suppressed), so the
//     order is part of the contract and pinned by tests.
// 2.  **Faulty Beats Potential**: The two filter stages only ever remove
//     "Point Overload (Potential)" boxes, and only because of a
//     "Point Overload (Faulty)" box. A yellow halo around a red hotspot is the same
//     fault, seen at lower temperature.
// 3.  **Positional Identity**: Detections carry no IDs. Every stage preserves the
//     relative order of the boxes it keeps.
// 4.  **Stateless Utility**: Pure functions over `Vec<Detection>`. No I/O, no memory
//     across calls.

use crate::config::Sensitivity;
use crate::core_modules::fault_label::FaultLabel;
use crate::core_modules::rule_classifier::Detection;
use serde::{Deserialize, Serialize};

pub const DEFAULT_IOU_THRESHOLD: f64 = 0.4;
pub const DEFAULT_MERGE_DISTANCE: i64 = 100;

/// Tunables for the NMS and merge stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolverParams {
    /// Boxes whose IoU with a larger kept box is strictly above this are dropped.
    pub iou_threshold: f64,
    /// Same-label boxes whose centers differ by less than this on both axes merge.
    pub merge_distance: i64,
}

impl Default for ResolverParams {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            merge_distance: DEFAULT_MERGE_DISTANCE,
        }
    }
}

impl ResolverParams {
    /// Higher sensitivity suppresses less and merges only closer boxes.
    pub fn for_sensitivity(sensitivity: Sensitivity) -> Self {
        let s = sensitivity.value();
        Self {
            iou_threshold: (0.4 + (s - 1.0) * 0.1).clamp(0.2, 0.6),
            merge_distance: ((100.0 / s) as i64).clamp(20, 200),
        }
    }
}

pub mod detection_resolver {
    use super::*;

    /// Runs all four stages in their fixed order.
    pub fn resolve(candidates: Vec<Detection>, params: &ResolverParams) -> Vec<Detection> {
        let raw = candidates.len();

        // --- 1. Non-Maximum Suppression ---
        let kept = non_max_suppression(candidates, params.iou_threshold);
        let after_nms = kept.len();

        // --- 2. Containment Filter ---
        let kept = filter_contained_potential(kept);

        // --- 3. Overlap Filter ---
        let kept = filter_overlapping_potential(kept);
        let after_filters = kept.len();

        // --- 4. Proximity Merge ---
        let merged = merge_nearby(kept, params.merge_distance);

        tracing::debug!(
            raw,
            after_nms,
            after_filters,
            merged = merged.len(),
            "resolved detections"
        );
        merged
    }

    /// Greedy NMS, largest box first. Labels are not considered.
    ///
    /// Ties in area keep their input order. The output is in descending area order.
    pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f64) -> Vec<Detection> {
        // `sort_by` is stable, so equal areas stay in extraction order.
        candidates.sort_by(|a, b| b.bbox.area().cmp(&a.bbox.area()));

        let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
        let mut suppressed = vec![false; candidates.len()];
        for i in 0..candidates.len() {
            if suppressed[i] {
                continue;
            }
            let anchor = candidates[i];
            for j in (i + 1)..candidates.len() {
                if !suppressed[j] && anchor.bbox.iou(&candidates[j].bbox) > iou_threshold {
                    suppressed[j] = true;
                }
            }
            kept.push(anchor);
        }
        kept
    }

    /// Drops potential point overloads that sit entirely inside a faulty one.
    pub fn filter_contained_potential(detections: Vec<Detection>) -> Vec<Detection> {
        let faulty: Vec<_> = faulty_point_boxes(&detections);
        detections
            .into_iter()
            .filter(|d| {
                d.label != FaultLabel::PointOverloadPotential
                    || !faulty.iter().any(|f| d.bbox.is_inside(f))
            })
            .collect()
    }

    /// Drops potential point overloads that share any area with a faulty one.
    pub fn filter_overlapping_potential(detections: Vec<Detection>) -> Vec<Detection> {
        let faulty: Vec<_> = faulty_point_boxes(&detections);
        detections
            .into_iter()
            .filter(|d| {
                d.label != FaultLabel::PointOverloadPotential
                    || !faulty.iter().any(|f| d.bbox.overlaps(f))
            })
            .collect()
    }

    /// Groups same-label boxes around a seed and replaces each group by its union.
    ///
    /// The seed is the first unused box in input order. A later box joins the group
    /// when its center is within `distance` of the *seed's* center on both axes. The
    /// group's confidence is the maximum of its members.
    pub fn merge_nearby(detections: Vec<Detection>, distance: i64) -> Vec<Detection> {
        let mut used = vec![false; detections.len()];
        let mut merged = Vec::with_capacity(detections.len());

        for i in 0..detections.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            let seed = detections[i];
            let (seed_cx, seed_cy) = seed.bbox.center();
            let mut group = seed;

            for j in (i + 1)..detections.len() {
                if used[j] || detections[j].label != seed.label {
                    continue;
                }
                let (cx, cy) = detections[j].bbox.center();
                if (seed_cx - cx).abs() < distance && (seed_cy - cy).abs() < distance {
                    group.bbox = group.bbox.union(&detections[j].bbox);
                    group.confidence = group.confidence.max(detections[j].confidence);
                    used[j] = true;
                }
            }
            merged.push(group);
        }
        merged
    }

    fn faulty_point_boxes(detections: &[Detection]) -> Vec<crate::core_modules::geometry::BoundingBox> {
        detections
            .iter()
            .filter(|d| d.label == FaultLabel::PointOverloadFaulty)
            .map(|d| d.bbox)
            .collect()
    }
}
