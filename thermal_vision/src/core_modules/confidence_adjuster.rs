// THEORY:
// The `ConfidenceAdjuster` lets human review steer the heuristic scores without
// touching the rules. Annotators correct detections elsewhere, an offline tool
// condenses those corrections into per-label and global bias terms, and this
// module adds the biases to each final detection's confidence.
//
// Key architectural principles:
// 1.  **Never Fails**: The feedback file is optional and produced by another system.
//     A missing, unreadable or malformed file degrades to a neutral adjustment whose
//     `source` says why ("none" or "error"). Parsing reports a typed `FeedbackError`,
//     but `load` turns it into the audit's message instead of returning it.
// 2.  **Lenient Fields**: Individual fields are coerced rather than validated. Nulls
//     become defaults, numeric strings are parsed, and a `label_adjustments` that is
//     not an object is treated as empty.
// 3.  **Auditable**: Every adjusted box yields a `BoxAdjustment` that records the
//     original confidence, both components and the result. The audit is stored in the
//     output record next to the boxes.

use crate::core_modules::fault_label::{FaultLabel, RecordedLabel};
use crate::core_modules::rule_classifier::{round3, Detection};
use crate::error::FeedbackError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

pub const MIN_ADJUSTED_CONFIDENCE: f64 = 0.05;
pub const MAX_ADJUSTED_CONFIDENCE: f64 = 0.99;
pub const DEFAULT_FEEDBACK_SOURCE: &str = "annotation_feedback";

/// Optional per-label statistics copied into the audit when present.
const SOURCE_METRIC_KEYS: [&str; 4] = [
    "avg_count_delta",
    "avg_area_ratio",
    "avg_confidence_delta",
    "samples",
];

/// Bias for one label. The entry it was read from is kept whole and echoed into the
/// audit, unknown keys included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct LabelAdjustment {
    adjustment: f64,
    entry: Map<String, Value>,
}

impl LabelAdjustment {
    /// The coerced `adjustment` field. Unusable values count as zero.
    pub fn adjustment(&self) -> f64 {
        self.adjustment
    }

    pub fn entry(&self) -> &Map<String, Value> {
        &self.entry
    }

    /// The known statistics present in the entry, nulls skipped.
    pub fn source_metrics(&self) -> Map<String, Value> {
        SOURCE_METRIC_KEYS
            .iter()
            .filter_map(|key| match self.entry.get(*key) {
                Some(Value::Null) | None => None,
                Some(v) => Some((key.to_string(), v.clone())),
            })
            .collect()
    }
}

impl From<Map<String, Value>> for LabelAdjustment {
    fn from(entry: Map<String, Value>) -> Self {
        let adjustment = coerce_f64("adjustment", entry.get("adjustment")).unwrap_or_else(|error| {
            tracing::warn!(%error, "treating label adjustment as zero");
            0.0
        });
        Self { adjustment, entry }
    }
}

impl From<LabelAdjustment> for Map<String, Value> {
    fn from(adjustment: LabelAdjustment) -> Self {
        adjustment.entry
    }
}

/// Feedback-derived confidence biases for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackAdjustment {
    pub global_adjustment: f64,
    pub label_adjustments: BTreeMap<String, LabelAdjustment>,
    /// Passed through to the record untouched.
    pub label_feedback: Vec<Value>,
    pub learning_rate: f64,
    pub generated_at: Option<Value>,
    pub total_annotations_considered: i64,
    pub source: String,
    /// Why loading fell back to neutral, if it did.
    pub error: Option<String>,
}

impl Default for FeedbackAdjustment {
    fn default() -> Self {
        Self::neutral("none")
    }
}

impl FeedbackAdjustment {
    /// Zero-effect adjustment tagged with `source`.
    pub fn neutral(source: &str) -> Self {
        Self {
            global_adjustment: 0.0,
            label_adjustments: BTreeMap::new(),
            label_feedback: Vec::new(),
            learning_rate: 0.0,
            generated_at: None,
            total_annotations_considered: 0,
            source: source.to_string(),
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::neutral("error")
        }
    }

    /// Loads a feedback file. `None`, an empty path or the literal `none` mean
    /// "no feedback".
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::neutral("none");
        };
        let text = path.to_string_lossy();
        if matches!(text.trim(), "" | "none" | "None") {
            return Self::neutral("none");
        }

        let loaded = std::fs::read_to_string(path)
            .map_err(|source| FeedbackError::Read {
                path: path.to_path_buf(),
                source,
            })
            .and_then(|raw| Self::parse(&raw));
        match loaded {
            Ok(feedback) => {
                tracing::info!(
                    path = %path.display(),
                    global = feedback.global_adjustment,
                    labels = feedback.label_adjustments.len(),
                    "loaded feedback adjustments"
                );
                feedback
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to load feedback adjustments");
                Self::failed(error.to_string())
            }
        }
    }

    /// Parses feedback JSON text.
    pub fn parse(raw: &str) -> Result<Self, FeedbackError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, FeedbackError> {
        let Some(root) = value.as_object() else {
            return Err(FeedbackError::NotAnObject);
        };

        let label_adjustments = match root.get("label_adjustments") {
            Some(Value::Object(entries)) => entries
                .iter()
                .filter_map(|(label, entry)| match entry {
                    Value::Object(entry) => Some((label.clone(), LabelAdjustment::from(entry.clone()))),
                    _ => {
                        tracing::warn!(%label, "ignoring non-object label adjustment");
                        None
                    }
                })
                .collect(),
            _ => BTreeMap::new(),
        };

        let label_feedback = match root.get("label_feedback") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let source = match root.get("source") {
            Some(Value::String(s)) => s.clone(),
            None | Some(Value::Null) => DEFAULT_FEEDBACK_SOURCE.to_string(),
            Some(other) => other.to_string(),
        };

        Ok(Self {
            global_adjustment: coerce_f64("global_adjustment", root.get("global_adjustment"))?,
            label_adjustments,
            label_feedback,
            learning_rate: coerce_f64("learning_rate", root.get("learning_rate"))?,
            generated_at: root.get("generated_at").filter(|v| !v.is_null()).cloned(),
            total_annotations_considered: coerce_f64(
                "total_annotations_considered",
                root.get("total_annotations_considered"),
            )? as i64,
            source,
            error: None,
        })
    }

    /// Bias for one label, zero when the label has no entry.
    pub fn label_adjustment(&self, label: FaultLabel) -> Option<&LabelAdjustment> {
        self.label_adjustments.get(label.as_str())
    }

    /// Rewrites each detection's confidence in place and returns the per-box audit.
    pub fn apply(&self, detections: &mut [Detection]) -> Vec<BoxAdjustment> {
        detections
            .iter_mut()
            .map(|detection| {
                let entry = self.label_adjustment(detection.label);
                let label_component = entry.map_or(0.0, LabelAdjustment::adjustment);
                let total = self.global_adjustment + label_component;
                let adjusted = round3(
                    (detection.confidence + total)
                        .clamp(MIN_ADJUSTED_CONFIDENCE, MAX_ADJUSTED_CONFIDENCE),
                );

                let audit = BoxAdjustment {
                    label: detection.label.into(),
                    original_confidence: round3(detection.confidence),
                    adjustment: round6(total),
                    components: AdjustmentComponents {
                        global: round6(self.global_adjustment),
                        label: round6(label_component),
                    },
                    adjusted_confidence: adjusted,
                    source_metrics: entry.map(LabelAdjustment::source_metrics).unwrap_or_default(),
                };
                detection.confidence = adjusted;
                audit
            })
            .collect()
    }

    /// Builds the record section for this run.
    pub fn audit(&self, per_box: Vec<BoxAdjustment>) -> FeedbackAudit {
        FeedbackAudit {
            applied: !per_box.is_empty() || self.global_adjustment.abs() > 1e-9,
            global_adjustment: round6(self.global_adjustment),
            learning_rate: self.learning_rate,
            generated_at: self.generated_at.clone(),
            source: self.source.clone(),
            total_annotations_considered: self.total_annotations_considered,
            label_adjustments: self.label_adjustments.clone(),
            label_feedback: self.label_feedback.clone(),
            per_box,
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentComponents {
    pub global: f64,
    pub label: f64,
}

/// Audit entry for one adjusted detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxAdjustment {
    pub label: RecordedLabel,
    pub original_confidence: f64,
    pub adjustment: f64,
    pub components: AdjustmentComponents,
    pub adjusted_confidence: f64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub source_metrics: Map<String, Value>,
}

/// The `feedback_adjustments` section of an output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAudit {
    pub applied: bool,
    pub global_adjustment: f64,
    pub learning_rate: f64,
    pub generated_at: Option<Value>,
    pub source: String,
    pub total_annotations_considered: i64,
    #[serde(default)]
    pub label_adjustments: BTreeMap<String, LabelAdjustment>,
    #[serde(default)]
    pub label_feedback: Vec<Value>,
    #[serde(default)]
    pub per_box: Vec<BoxAdjustment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for FeedbackAudit {
    fn default() -> Self {
        FeedbackAdjustment::default().audit(Vec::new())
    }
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Missing, null, false and empty-string values read as 0. Numbers pass through and
/// numeric strings are parsed. Anything else is an error naming `field`.
fn coerce_f64(field: &str, value: Option<&Value>) -> Result<f64, FeedbackError> {
    let not_a_number = |value: &Value| FeedbackError::NotANumber {
        field: field.to_string(),
        value: value.to_string(),
    };
    match value {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Bool(b)) => Ok(if *b { 1.0 } else { 0.0 }),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| FeedbackError::OutOfRange {
            field: field.to_string(),
            value: n.to_string(),
        }),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(0.0),
        Some(v @ Value::String(s)) => s.trim().parse::<f64>().map_err(|_| not_a_number(v)),
        Some(other) => Err(not_a_number(other)),
    }
}
