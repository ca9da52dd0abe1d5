// THEORY:
// The `pipeline` module is the top-level API for inspecting one image. It wires the
// six stages together in their fixed forward order:
//
//   projector -> extractor -> classifier -> resolver -> adjuster -> renderer
//
// Key architectural principles:
// 1.  **Pure Core, Thin Shell**: `analyze` is the whole algorithm and does no I/O. It
//     takes an image and an optional anomaly map and returns detections. `run` is
//     the shell around it: load, infer, analyze, persist.
// 2.  **Graceful Model Fallback**: A model that returns no anomaly surface is not an
//     error. The pipeline warns and classifies the unfiltered original instead, and
//     the record reports no mask or filtered image.
// 3.  **Caller-Owned Outputs**: Every file the pipeline writes goes to a directory
//     named in the caller's `OutputLayout`. The pipeline never creates directories.
// 4.  **Shareable**: An `InspectionPipeline` holds no per-image state, so one instance
//     can serve many worker threads at once (see `parallel_pipeline`).

use crate::config::{OutputLayout, PipelineConfig};
use crate::core_modules::anomaly_model::AnomalyModel;
use crate::core_modules::confidence_adjuster::{BoxAdjustment, FeedbackAdjustment, FeedbackAudit};
use crate::core_modules::detection_resolver::detection_resolver;
use crate::core_modules::fault_label::FaultLabel;
use crate::core_modules::mask_projector::{AnomalyMap, MaskProjector, ProjectedMask};
use crate::core_modules::record::{Annotation, BoxEntry, InspectionRecord};
use crate::core_modules::region_extractor::region_extractor;
use crate::core_modules::renderer::Renderer;
use crate::core_modules::rule_classifier::{rule_classifier, Detection};
use crate::error::{InspectionError, Result};
use image::imageops::FilterType;
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Result of the pure analysis stage for one image.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// `None` when the model produced no anomaly surface.
    pub projection: Option<ProjectedMask>,
    pub global_label: FaultLabel,
    /// Final detections, confidences already adjusted.
    pub detections: Vec<Detection>,
    pub per_box: Vec<BoxAdjustment>,
}

/// The final output of one image's run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub image_path: PathBuf,
    pub global_label: FaultLabel,
    pub boxed_image_path: PathBuf,
    pub mask_path: Option<PathBuf>,
    pub filtered_path: Option<PathBuf>,
    pub record_path: PathBuf,
    pub detections: Vec<Detection>,
    pub feedback_record: FeedbackAudit,
}

/// The main, top-level struct for inspecting images.
pub struct InspectionPipeline<M> {
    model: M,
    config: PipelineConfig,
    feedback: FeedbackAdjustment,
    projector: MaskProjector,
    renderer: Renderer,
}

impl<M: AnomalyModel> InspectionPipeline<M> {
    /// Fails only if the configured label font cannot be loaded.
    pub fn new(model: M, config: PipelineConfig, feedback: FeedbackAdjustment) -> Result<Self> {
        let renderer = Renderer::new(config.render.clone())?;
        let projector = MaskProjector::new(config.binarize_threshold);
        Ok(Self {
            model,
            config,
            feedback,
            projector,
            renderer,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn feedback(&self) -> &FeedbackAdjustment {
        &self.feedback
    }

    /// Runs stages 1-5 on an in-memory image. No I/O.
    pub fn analyze(&self, original: &RgbImage, map: Option<&AnomalyMap>) -> Analysis {
        // --- 1. Mask Projection ---
        let projection = map.map(|m| self.projector.project(m, original));
        let classified = projection.as_ref().map_or(original, |p| &p.filtered);

        // --- 2. Region Extraction ---
        let stats = region_extractor::extract(classified, &self.config.color_ranges);

        // --- 3. Rule Classification ---
        let classification = rule_classifier::classify(classified, &stats, self.config.sensitivity);

        // --- 4. Detection Resolution ---
        let params = self.config.resolver_params();
        let mut detections = detection_resolver::resolve(classification.candidates, &params);

        // --- 5. Confidence Adjustment ---
        let per_box = self.feedback.apply(&mut detections);

        Analysis {
            projection,
            global_label: classification.global_label,
            detections,
            per_box,
        }
    }

    /// Inspects one image file end to end and writes its artifacts under `layout`.
    pub fn run(&self, image_path: &Path, layout: &OutputLayout) -> Result<PipelineResult> {
        let image_path = std::path::absolute(image_path)
            .map_err(|e| InspectionError::io(image_path, e))?;
        let original = image::open(&image_path)
            .map_err(|e| InspectionError::image_load(&image_path, e))?
            .to_rgb8();
        let base = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());

        let map = self.infer(&image_path, &original)?;
        if map.is_none() {
            tracing::warn!(image = %image_path.display(), "model returned no anomaly map, classifying the original");
        }

        let analysis = self.analyze(&original, map.as_ref());

        let artifacts = match &analysis.projection {
            Some(projection) => projection.persist(&base, layout)?,
            None => Default::default(),
        };

        let annotations: Vec<Annotation> = analysis.detections.iter().map(Annotation::from).collect();
        let boxed_image_path = self.renderer.render_to(
            &original,
            &annotations,
            &analysis.global_label.into(),
            &layout.boxed,
            &image_path,
        )?;

        let feedback_record = self.feedback.audit(analysis.per_box);
        let record = InspectionRecord {
            image: image_path.clone(),
            boxed_image: absolute_or_self(&boxed_image_path),
            mask_image: artifacts.mask_path.as_deref().map(absolute_or_self),
            filtered_image: artifacts.filtered_path.as_deref().map(absolute_or_self),
            label: analysis.global_label.into(),
            boxes: analysis.detections.iter().map(BoxEntry::from).collect(),
            feedback_adjustments: feedback_record.clone(),
        };
        let record_path = layout.boxed.join(format!("{base}.json"));
        record.write(&record_path)?;

        tracing::info!(
            image = %image_path.display(),
            label = %analysis.global_label,
            boxes = analysis.detections.len(),
            feedback_applied = feedback_record.applied,
            "inspected image"
        );

        Ok(PipelineResult {
            image_path,
            global_label: analysis.global_label,
            boxed_image_path,
            mask_path: artifacts.mask_path,
            filtered_path: artifacts.filtered_path,
            record_path,
            detections: analysis.detections,
            feedback_record,
        })
    }

    fn infer(&self, image_path: &Path, original: &RgbImage) -> Result<Option<AnomalyMap>> {
        let size = self.config.infer_size;
        let resized = image::imageops::resize(original, size, size, FilterType::CatmullRom);
        Ok(self.model.infer(image_path, &resized)?.into_anomaly_map())
    }
}

fn absolute_or_self(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
