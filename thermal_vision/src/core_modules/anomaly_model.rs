//! The seam between the pipeline and the anomaly detector.
//!
//! The detector itself (weights, device, preprocessing beyond resizing) lives
//! outside this crate. Anything that can turn an RGB image into a score surface can
//! implement [`AnomalyModel`], including a plain closure.

use crate::core_modules::mask_projector::AnomalyMap;
use crate::error::Result;
use image::RgbImage;
use std::path::Path;

/// What a model hands back for one image.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// The model exposes its anomaly map directly.
    Map(AnomalyMap),
    /// Positional outputs. The map, if any, is the second element.
    Tuple(Vec<AnomalyMap>),
    /// The model produced no usable surface.
    Empty,
}

impl ModelOutput {
    pub fn into_anomaly_map(self) -> Option<AnomalyMap> {
        match self {
            ModelOutput::Map(map) => Some(map),
            ModelOutput::Tuple(elements) if elements.len() > 1 => elements.into_iter().nth(1),
            ModelOutput::Tuple(_) | ModelOutput::Empty => None,
        }
    }
}

pub trait AnomalyModel: Send + Sync {
    /// Scores `image`, which has already been resized to the configured inference
    /// size. `source` is the original file, for models that key off it.
    fn infer(&self, source: &Path, image: &RgbImage) -> Result<ModelOutput>;
}

impl<F> AnomalyModel for F
where
    F: Fn(&Path, &RgbImage) -> Result<ModelOutput> + Send + Sync,
{
    fn infer(&self, source: &Path, image: &RgbImage) -> Result<ModelOutput> {
        self(source, image)
    }
}
