// THEORY:
// The `MaskProjector` is the bridge between the anomaly model's world and the
// original image's world. The model scores a small, fixed-resolution copy of the
// image; everything downstream works at the original resolution.
//
// Key architectural principles:
// 1.  **Whole-Tensor Normalization**: The raw score surface has no fixed scale, so it
//     is min-max stretched to 0..255 before anything else. The stretch uses the min
//     and max of the *entire* tensor, including any extra leading planes, and only
//     then is a single 2-D plane selected.
// 2.  **Projection**: The normalized plane is upsampled bilinearly to the original
//     dimensions and binarized. The result is the `RelevanceMask`.
// 3.  **Filtering, Not Cropping**: The `FilteredImage` keeps the original geometry and
//     blacks out irrelevant pixels. Box coordinates computed on it are therefore
//     already in original-image space.
// 4.  **No Hidden I/O**: Projection is pure. Persisting the mask and filtered image is
//     a separate call that only writes where the caller's `OutputLayout` says.

use crate::config::OutputLayout;
use crate::error::{InspectionError, Result};
use image::imageops::FilterType;
use image::{GrayImage, Luma, RgbImage};
use std::path::{Path, PathBuf};

const NORMALIZATION_EPSILON: f64 = 1e-8;

/// A per-cell anomaly score tensor as returned by the model.
///
/// Row-major. At least two axes. Extra leading axes (batch, channel) are allowed and
/// are reduced to a single plane during projection.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyMap {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl AnomalyMap {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        if shape.len() < 2 {
            return Err(InspectionError::InvalidAnomalyMap {
                reason: format!("expected at least 2 axes, got shape {shape:?}"),
            });
        }
        let expected: usize = shape.iter().product();
        if expected == 0 || expected != data.len() {
            return Err(InspectionError::InvalidAnomalyMap {
                reason: format!(
                    "shape {shape:?} needs {expected} values, got {}",
                    data.len()
                ),
            });
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(InspectionError::InvalidAnomalyMap {
                reason: "map contains non-finite values".to_string(),
            });
        }
        Ok(Self { shape, data })
    }

    /// A plain `height x width` map.
    pub fn from_plane(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        Self::new(vec![height, width], data)
    }

    /// Treats an 8-bit grayscale heatmap as the score surface.
    pub fn from_gray_image(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            shape: vec![height as usize, width as usize],
            data: image.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &[f32] {
        &self.data
    }

    /// (height, width) of the plane that projection will use.
    ///
    /// Size-1 axes are squeezed first. If more than two axes remain, the leading ones
    /// are indexed at 0, which in row-major order is the first `height * width` values.
    pub fn plane_dims(&self) -> (usize, usize) {
        let squeezed: Vec<usize> = self.shape.iter().copied().filter(|&d| d != 1).collect();
        let dims = if squeezed.len() >= 2 {
            &squeezed[squeezed.len() - 2..]
        } else {
            &self.shape[self.shape.len() - 2..]
        };
        (dims[0], dims[1])
    }

    /// Min-max stretch of the whole tensor to 0..255 (truncating), then plane selection.
    pub fn normalized_plane(&self) -> GrayImage {
        let (min, max) = self
            .data
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v as f64), hi.max(v as f64))
            });
        let range = max - min + NORMALIZATION_EPSILON;

        let (height, width) = self.plane_dims();
        let plane: Vec<u8> = self.data[..height * width]
            .iter()
            .map(|&v| (255.0 * (v as f64 - min) / range) as u8)
            .collect();

        // Length is height * width by construction.
        GrayImage::from_raw(width as u32, height as u32, plane)
            .unwrap_or_else(|| GrayImage::new(width as u32, height as u32))
    }
}

/// Full-resolution binary mask of pixels worth classifying.
#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceMask {
    mask: GrayImage,
}

impl RelevanceMask {
    pub fn from_normalized(normalized: &GrayImage, threshold: u8) -> Self {
        let mask = GrayImage::from_fn(normalized.width(), normalized.height(), |x, y| {
            if normalized.get_pixel(x, y).0[0] > threshold {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        Self { mask }
    }

    #[inline]
    pub fn is_relevant(&self, x: u32, y: u32) -> bool {
        self.mask.get_pixel(x, y).0[0] > 0
    }

    pub fn relevant_count(&self) -> usize {
        self.mask.as_raw().iter().filter(|&&v| v > 0).count()
    }
}

/// Output of projecting one anomaly map onto one original image.
#[derive(Debug, Clone)]
pub struct ProjectedMask {
    /// Normalized anomaly plane resized to the original dimensions.
    pub normalized: GrayImage,
    pub relevance: RelevanceMask,
    /// Original pixels where relevant, black elsewhere.
    pub filtered: RgbImage,
}

/// Where `persist` wrote its artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionArtifacts {
    pub mask_path: Option<PathBuf>,
    pub filtered_path: Option<PathBuf>,
}

pub struct MaskProjector {
    threshold: u8,
}

impl MaskProjector {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    pub fn project(&self, map: &AnomalyMap, original: &RgbImage) -> ProjectedMask {
        let (width, height) = original.dimensions();
        let plane = map.normalized_plane();
        let normalized = image::imageops::resize(&plane, width, height, FilterType::Triangle);
        let relevance = RelevanceMask::from_normalized(&normalized, self.threshold);

        let filtered = RgbImage::from_fn(width, height, |x, y| {
            if relevance.is_relevant(x, y) {
                *original.get_pixel(x, y)
            } else {
                image::Rgb([0, 0, 0])
            }
        });

        tracing::debug!(
            width,
            height,
            relevant = relevance.relevant_count(),
            "projected anomaly map"
        );

        ProjectedMask {
            normalized,
            relevance,
            filtered,
        }
    }
}

impl ProjectedMask {
    /// Writes `<base>_mask.png` and `<base>_filtered.png` into the layout's directories.
    /// Directories set to `None` are skipped.
    pub fn persist(&self, base: &str, layout: &OutputLayout) -> Result<ProjectionArtifacts> {
        let mut artifacts = ProjectionArtifacts::default();

        if let Some(dir) = &layout.masks {
            let path = dir.join(format!("{base}_mask.png"));
            save_png(&self.normalized, &path)?;
            artifacts.mask_path = Some(path);
        }
        if let Some(dir) = &layout.filtered {
            let path = dir.join(format!("{base}_filtered.png"));
            save_png(&self.filtered, &path)?;
            artifacts.filtered_path = Some(path);
        }
        Ok(artifacts)
    }
}

fn save_png<P>(image: &image::ImageBuffer<P, Vec<u8>>, path: &Path) -> Result<()>
where
    P: image::PixelWithColorType<Subpixel = u8>,
{
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| InspectionError::image_save(path, e))
}
