//! A stand-in anomaly model that serves precomputed heatmaps from disk.
//!
//! For an input `t1.jpg` the store looks in its directory for, in order:
//! `t1.json` (`{"shape": [...], "data": [...]}`) and then `t1.png` (8-bit grayscale,
//! brighter is more anomalous). When neither exists the model reports no map and the
//! pipeline classifies the original image.

use image::RgbImage;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thermal_vision::{AnomalyMap, AnomalyModel, InspectionError, ModelOutput, Result};

#[derive(Debug, Deserialize)]
struct TensorFile {
    shape: Vec<usize>,
    data: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct MapStore {
    dir: Option<PathBuf>,
}

impl MapStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    fn load_json(path: &Path) -> Result<AnomalyMap> {
        let text = std::fs::read_to_string(path).map_err(|e| InspectionError::io(path, e))?;
        let tensor: TensorFile = serde_json::from_str(&text)
            .map_err(|e| InspectionError::model(path.display().to_string(), e))?;
        AnomalyMap::new(tensor.shape, tensor.data)
    }

    fn load_image(path: &Path) -> Result<AnomalyMap> {
        let gray = image::open(path)
            .map_err(|e| InspectionError::image_load(path, e))?
            .to_luma8();
        Ok(AnomalyMap::from_gray_image(&gray))
    }
}

impl AnomalyModel for MapStore {
    fn infer(&self, source: &Path, _image: &RgbImage) -> Result<ModelOutput> {
        let (Some(dir), Some(stem)) = (&self.dir, source.file_stem()) else {
            return Ok(ModelOutput::Empty);
        };
        let stem = stem.to_string_lossy();

        let json = dir.join(format!("{stem}.json"));
        if json.is_file() {
            return Ok(ModelOutput::Map(Self::load_json(&json)?));
        }
        let png = dir.join(format!("{stem}.png"));
        // Inputs and maps may share a folder; never read the input back as its own map.
        if png.is_file() && !same_file(&png, source) {
            return Ok(ModelOutput::Map(Self::load_image(&png)?));
        }

        tracing::debug!(image = %source.display(), dir = %dir.display(), "no precomputed heatmap");
        Ok(ModelOutput::Empty)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::path::absolute(a), std::path::absolute(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
