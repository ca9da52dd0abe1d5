//! The per-image JSON record.
//!
//! The record is the re-editable source of truth for a run: the boxed image can be
//! regenerated from it alone. Field names are part of the external format.

use crate::core_modules::confidence_adjuster::FeedbackAudit;
use crate::core_modules::fault_label::RecordedLabel;
use crate::core_modules::geometry::BoundingBox;
use crate::core_modules::rule_classifier::Detection;
use crate::error::{InspectionError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One box as stored in the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxEntry {
    /// `[x, y, width, height]`. Kept as a list so hand-edited records with the wrong
    /// arity still load. Such entries are skipped when drawing.
    #[serde(rename = "box")]
    pub bbox: Vec<i64>,
    /// Kept verbatim, so a hand-typed label survives reading and writing.
    #[serde(rename = "type")]
    pub label: RecordedLabel,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl From<&Detection> for BoxEntry {
    fn from(d: &Detection) -> Self {
        Self {
            bbox: <[i64; 4]>::from(d.bbox).to_vec(),
            label: d.label.into(),
            confidence: Some(d.confidence),
        }
    }
}

/// Something the renderer can draw: a box, its label and an optional confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub bbox: BoundingBox,
    pub label: RecordedLabel,
    pub confidence: Option<f64>,
}

impl From<&Detection> for Annotation {
    fn from(d: &Detection) -> Self {
        Self {
            bbox: d.bbox,
            label: d.label.into(),
            confidence: Some(d.confidence),
        }
    }
}

impl BoxEntry {
    pub fn annotation(&self) -> Option<Annotation> {
        let [x, y, w, h]: [i64; 4] = self.bbox.as_slice().try_into().ok()?;
        Some(Annotation {
            bbox: BoundingBox::new(x, y, w, h),
            label: self.label.clone(),
            confidence: self.confidence,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionRecord {
    pub image: PathBuf,
    pub boxed_image: PathBuf,
    pub mask_image: Option<PathBuf>,
    pub filtered_image: Option<PathBuf>,
    /// Global label.
    pub label: RecordedLabel,
    #[serde(default)]
    pub boxes: Vec<BoxEntry>,
    #[serde(default)]
    pub feedback_adjustments: FeedbackAudit,
}

impl InspectionRecord {
    /// Drawable boxes, skipping entries that are not four integers.
    pub fn annotations(&self) -> Vec<Annotation> {
        self.boxes
            .iter()
            .filter_map(|entry| {
                let annotation = entry.annotation();
                if annotation.is_none() {
                    tracing::warn!(
                        image = %self.image.display(),
                        values = entry.bbox.len(),
                        "skipping record box without exactly 4 values"
                    );
                }
                annotation
            })
            .collect()
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| InspectionError::io(path, e))?;
        serde_json::from_str(&text).map_err(|source| InspectionError::Record {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(|source| InspectionError::Record {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text).map_err(|e| InspectionError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::confidence_adjuster::FeedbackAdjustment;
    use crate::core_modules::fault_label::FaultLabel;

    fn sample() -> InspectionRecord {
        let detections = [
            Detection::new(BoundingBox::new(1, 2, 3, 4), FaultLabel::PointOverloadFaulty, 0.812),
            Detection::new(BoundingBox::new(10, 20, 5, 5), FaultLabel::TinyPotentialSpot, 0.5),
        ];
        InspectionRecord {
            image: PathBuf::from("in/t1.jpg"),
            boxed_image: PathBuf::from("out/boxed/t1_boxed.jpg"),
            mask_image: Some(PathBuf::from("out/masks/t1_mask.png")),
            filtered_image: None,
            label: FaultLabel::Normal.into(),
            boxes: detections.iter().map(BoxEntry::from).collect(),
            feedback_adjustments: FeedbackAdjustment::neutral("none").audit(Vec::new()),
        }
    }

    #[test]
    fn record_uses_external_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["label"], "Normal");
        assert_eq!(json["filtered_image"], serde_json::Value::Null);
        assert_eq!(json["boxes"][0]["box"], serde_json::json!([1, 2, 3, 4]));
        assert_eq!(json["boxes"][0]["type"], "Point Overload (Faulty)");
        assert_eq!(json["boxes"][0]["confidence"], 0.812);
        assert_eq!(json["feedback_adjustments"]["applied"], false);
        assert_eq!(json["feedback_adjustments"]["source"], "none");
    }

    #[test]
    fn write_then_read_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t1.json");
        let record = sample();
        record.write(&path).unwrap();
        assert_eq!(InspectionRecord::read(&path).unwrap(), record);
    }

    #[test]
    fn malformed_boxes_are_skipped_when_drawing() {
        let json = r#"{
            "image": "a.png", "boxed_image": "a_boxed.png",
            "mask_image": null, "filtered_image": null, "label": "Unknown",
            "boxes": [
                {"box": [1, 2, 3], "type": "Tiny Faulty Spot", "confidence": 0.5},
                {"box": [1, 2, 3, 4], "type": "Hot Bolt"}
            ]
        }"#;
        let record: InspectionRecord = serde_json::from_str(json).unwrap();
        let annotations = record.annotations();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].label, RecordedLabel::Custom("Hot Bolt".to_string()));
        assert_eq!(annotations[0].confidence, None);
        assert_eq!(record.feedback_adjustments.source, "none");
    }

    #[test]
    fn hand_typed_labels_survive_a_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edited.json");
        let json = r#"{
            "image": "a.png", "boxed_image": "a_boxed.png",
            "mask_image": null, "filtered_image": null, "label": "Needs Review",
            "boxes": [{"box": [1, 2, 3, 4], "type": "Hotspot (Potential)", "confidence": 0.4}]
        }"#;
        std::fs::write(&path, json).unwrap();

        let record = InspectionRecord::read(&path).unwrap();
        record.write(&path).unwrap();
        let reread: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(reread["label"], "Needs Review");
        assert_eq!(reread["boxes"][0]["type"], "Hotspot (Potential)");
        assert!(record.annotations()[0].label.is_warning_colored());
    }
}
