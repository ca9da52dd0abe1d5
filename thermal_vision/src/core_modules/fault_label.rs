// THEORY:
// `FaultLabel` is the vocabulary shared by every stage after region extraction. The
// classifier emits it, the resolver filters on it, the feedback file is keyed by its
// display string, and the renderer picks colors from it.
//
// Key architectural principles:
// 1.  **Closed Set, Exact Strings**: Each variant has exactly one display string. That
//     string is what lands in the JSON record and what feedback files use as keys, so
//     `as_str` and `FromStr` must round-trip for every variant.
// 2.  **Predicates Instead of Substrings**: Rules such as "Faulty labels get a base
//     confidence of 0.7" used to be phrased as substring tests on the label text. Each
//     family is now an explicit predicate. A predicate holds for a variant exactly when
//     the old substring test held for its display string. That is why `TinyFaultySpot`
//     is faulty as well as tiny, and why the strip labels are wire labels but neither
//     faulty nor potential.
// 3.  **Records Keep What They Are Given**: A hand-edited record may name a label
//     outside the closed set. `RecordedLabel` keeps such a string verbatim and answers
//     the color question with the substring rule the predicates mirror, so editing and
//     redrawing a record never rewrites the user's text.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Every label the classifier can produce, either as a global verdict or on a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FaultLabel {
    Normal,
    FullWireOverload,
    PointOverloadFaulty,
    PointOverloadPotential,
    LooseJointFaulty,
    LooseJointPotential,
    TinyFaultySpot,
    TinyPotentialSpot,
    WireOverloadRedStrip,
    WireOverloadYellowStrip,
    WireOverloadOrangeStrip,
    Unknown,
}

impl FaultLabel {
    pub const ALL: [FaultLabel; 12] = [
        FaultLabel::Normal,
        FaultLabel::FullWireOverload,
        FaultLabel::PointOverloadFaulty,
        FaultLabel::PointOverloadPotential,
        FaultLabel::LooseJointFaulty,
        FaultLabel::LooseJointPotential,
        FaultLabel::TinyFaultySpot,
        FaultLabel::TinyPotentialSpot,
        FaultLabel::WireOverloadRedStrip,
        FaultLabel::WireOverloadYellowStrip,
        FaultLabel::WireOverloadOrangeStrip,
        FaultLabel::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FaultLabel::Normal => "Normal",
            FaultLabel::FullWireOverload => "Full Wire Overload",
            FaultLabel::PointOverloadFaulty => "Point Overload (Faulty)",
            FaultLabel::PointOverloadPotential => "Point Overload (Potential)",
            FaultLabel::LooseJointFaulty => "Loose Joint (Faulty)",
            FaultLabel::LooseJointPotential => "Loose Joint (Potential)",
            FaultLabel::TinyFaultySpot => "Tiny Faulty Spot",
            FaultLabel::TinyPotentialSpot => "Tiny Potential Spot",
            FaultLabel::WireOverloadRedStrip => "Wire Overload (Red Strip)",
            FaultLabel::WireOverloadYellowStrip => "Wire Overload (Yellow Strip)",
            FaultLabel::WireOverloadOrangeStrip => "Wire Overload (Orange Strip)",
            FaultLabel::Unknown => "Unknown",
        }
    }

    /// Labels that confirm a fault ("Faulty" in the display string).
    pub fn is_faulty(&self) -> bool {
        matches!(
            self,
            FaultLabel::PointOverloadFaulty
                | FaultLabel::LooseJointFaulty
                | FaultLabel::TinyFaultySpot
        )
    }

    /// Labels that flag a possible fault ("Potential" in the display string).
    pub fn is_potential(&self) -> bool {
        matches!(
            self,
            FaultLabel::PointOverloadPotential
                | FaultLabel::LooseJointPotential
                | FaultLabel::TinyPotentialSpot
        )
    }

    pub fn is_tiny(&self) -> bool {
        matches!(self, FaultLabel::TinyFaultySpot | FaultLabel::TinyPotentialSpot)
    }

    /// "Wire" or "Full" in the display string.
    pub fn is_wire_or_full(&self) -> bool {
        matches!(
            self,
            FaultLabel::FullWireOverload
                | FaultLabel::WireOverloadRedStrip
                | FaultLabel::WireOverloadYellowStrip
                | FaultLabel::WireOverloadOrangeStrip
        )
    }

    pub fn is_loose_joint(&self) -> bool {
        matches!(self, FaultLabel::LooseJointFaulty | FaultLabel::LooseJointPotential)
    }

    /// Rendered in yellow rather than red.
    pub fn is_warning_colored(&self) -> bool {
        self.is_potential() || *self == FaultLabel::FullWireOverload
    }
}

impl fmt::Display for FaultLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the known display strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLabel(pub String);

impl fmt::Display for UnknownLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized fault label {:?}", self.0)
    }
}

impl std::error::Error for UnknownLabel {}

impl FromStr for FaultLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FaultLabel::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| UnknownLabel(s.to_string()))
    }
}

impl Serialize for FaultLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FaultLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A label as stored in a record: one of ours, or whatever text a person typed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordedLabel {
    Known(FaultLabel),
    Custom(String),
}

impl RecordedLabel {
    pub fn parse(raw: &str) -> Self {
        match raw.parse() {
            Ok(label) => RecordedLabel::Known(label),
            Err(_) => RecordedLabel::Custom(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecordedLabel::Known(label) => label.as_str(),
            RecordedLabel::Custom(text) => text,
        }
    }

    pub fn known(&self) -> Option<FaultLabel> {
        match self {
            RecordedLabel::Known(label) => Some(*label),
            RecordedLabel::Custom(_) => None,
        }
    }

    /// Same answer as [`FaultLabel::is_warning_colored`] for known labels.
    pub fn is_warning_colored(&self) -> bool {
        match self {
            RecordedLabel::Known(label) => label.is_warning_colored(),
            RecordedLabel::Custom(text) => {
                text.contains("Potential") || text.contains("Full Wire Overload")
            }
        }
    }
}

impl From<FaultLabel> for RecordedLabel {
    fn from(label: FaultLabel) -> Self {
        RecordedLabel::Known(label)
    }
}

impl PartialEq<FaultLabel> for RecordedLabel {
    fn eq(&self, other: &FaultLabel) -> bool {
        self.known() == Some(*other)
    }
}

impl fmt::Display for RecordedLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RecordedLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RecordedLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(RecordedLabel::parse(&raw))
    }
}
