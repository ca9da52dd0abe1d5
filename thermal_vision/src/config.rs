//! Configuration for the inspection pipeline.
//!
//! All tunables live here, grouped by the stage that reads them. Every field has a
//! default, so a partial JSON file (or `{}`) is a valid configuration:
//!
//! ```no_run
//! use thermal_vision::config::PipelineConfig;
//! use std::path::Path;
//!
//! let config = PipelineConfig::from_json_file(Path::new("inspection.json"))?;
//! # Ok::<(), thermal_vision::InspectionError>(())
//! ```
//!
//! Output directories are deliberately *not* part of `PipelineConfig`. They are an
//! [`OutputLayout`] handed to the pipeline by the caller, who decides when they are
//! created.

use crate::core_modules::detection_resolver::ResolverParams;
use crate::error::{InspectionError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MIN_SENSITIVITY: f64 = 0.1;
pub const MAX_SENSITIVITY: f64 = 2.0;
pub const DEFAULT_INFER_SIZE: u32 = 256;
pub const DEFAULT_BINARIZE_THRESHOLD: u8 = 128;

/// Detection strictness. Higher values produce more, smaller boxes.
///
/// Always inside `[0.1, 2.0]`. Out-of-range input is clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Sensitivity(f64);

impl Sensitivity {
    pub fn new(value: f64) -> Self {
        let clamped = if value.is_nan() {
            1.0
        } else {
            value.clamp(MIN_SENSITIVITY, MAX_SENSITIVITY)
        };
        if clamped != value {
            tracing::warn!(
                requested = value,
                applied = clamped,
                "sensitivity outside [{MIN_SENSITIVITY}, {MAX_SENSITIVITY}], clamping"
            );
        }
        Self(clamped)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self(1.0)
    }
}

impl From<f64> for Sensitivity {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<Sensitivity> for f64 {
    fn from(s: Sensitivity) -> Self {
        s.0
    }
}

/// Inclusive HSV box, hue in half-degrees (0..180).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    #[inline]
    pub fn contains(&self, hue: u8, saturation: u8, value: u8) -> bool {
        (self.lower[0]..=self.upper[0]).contains(&hue)
            && (self.lower[1]..=self.upper[1]).contains(&saturation)
            && (self.lower[2]..=self.upper[2]).contains(&value)
    }
}

/// Color bands used by the region extractor. Red is the union of its two ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorRanges {
    pub blue: HsvRange,
    pub black: HsvRange,
    pub yellow: HsvRange,
    pub orange: HsvRange,
    pub red_low: HsvRange,
    pub red_high: HsvRange,
}

impl Default for ColorRanges {
    fn default() -> Self {
        Self {
            blue: HsvRange::new([90, 50, 20], [130, 255, 255]),
            black: HsvRange::new([0, 0, 0], [180, 255, 50]),
            yellow: HsvRange::new([20, 130, 130], [35, 255, 255]),
            orange: HsvRange::new([10, 100, 100], [25, 255, 255]),
            red_low: HsvRange::new([0, 100, 100], [10, 255, 255]),
            red_high: HsvRange::new([160, 100, 100], [180, 255, 255]),
        }
    }
}

/// Drawing parameters for boxed images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// TrueType/OpenType font for label text. Overrides the bundled DejaVu Sans.
    pub font_path: Option<PathBuf>,
    pub line_thickness: u32,
    /// Pixel height of per-box label text.
    pub box_label_scale: f32,
    /// Pixel height of the global label drawn when there are no boxes.
    pub global_label_scale: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            line_thickness: 2,
            box_label_scale: 18.0,
            global_label_scale: 30.0,
        }
    }
}

/// Complete configuration for one inspection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Square side the original is resized to before it is handed to the model.
    pub infer_size: u32,
    pub sensitivity: Sensitivity,
    /// Normalized anomaly values strictly above this are relevant.
    pub binarize_threshold: u8,
    pub color_ranges: ColorRanges,
    /// Fixed resolver parameters. `None` derives them from `sensitivity`.
    pub resolver: Option<ResolverParams>,
    pub render: RenderConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            infer_size: DEFAULT_INFER_SIZE,
            sensitivity: Sensitivity::default(),
            binarize_threshold: DEFAULT_BINARIZE_THRESHOLD,
            color_ranges: ColorRanges::default(),
            resolver: None,
            render: RenderConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| InspectionError::io(path, e))?;
        serde_json::from_str(&text).map_err(|source| InspectionError::Record {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_sensitivity(mut self, sensitivity: f64) -> Self {
        self.sensitivity = Sensitivity::new(sensitivity);
        self
    }

    /// Resolver parameters in effect for this configuration.
    pub fn resolver_params(&self) -> ResolverParams {
        self.resolver
            .unwrap_or_else(|| ResolverParams::for_sensitivity(self.sensitivity))
    }
}

/// Where a run writes its artifacts.
///
/// The library never creates these directories on its own. Call [`OutputLayout::ensure`]
/// (or create them yourself) before running the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLayout {
    /// Normalized, upsampled anomaly maps (`<base>_mask.png`). `None` skips them.
    pub masks: Option<PathBuf>,
    /// Filtered images (`<base>_filtered.png`). `None` skips them.
    pub filtered: Option<PathBuf>,
    /// Boxed images and JSON records.
    pub boxed: PathBuf,
}

impl OutputLayout {
    /// The conventional `masks/`, `filtered/`, `boxed/` tree under one root.
    pub fn under(root: &Path) -> Self {
        Self {
            masks: Some(root.join("masks")),
            filtered: Some(root.join("filtered")),
            boxed: root.join("boxed"),
        }
    }

    pub fn ensure(&self) -> Result<()> {
        let dirs = self
            .masks
            .iter()
            .chain(self.filtered.iter())
            .chain(std::iter::once(&self.boxed));
        for dir in dirs {
            std::fs::create_dir_all(dir).map_err(|e| InspectionError::io(dir, e))?;
        }
        Ok(())
    }
}
