use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use thermal_vision::core_modules::renderer::{RED, YELLOW};
use thermal_vision::{
    AnomalyMap, AnomalyModel, BatchRunner, BatchSummary, FaultLabel, FeedbackAdjustment,
    InspectionError, InspectionPipeline, InspectionRecord, ModelOutput, OutputLayout,
    PipelineConfig, Renderer, Result,
};

/// Returns no anomaly surface, so the original image is classified as is.
struct NoMap;

impl AnomalyModel for NoMap {
    fn infer(&self, _source: &Path, _image: &RgbImage) -> Result<ModelOutput> {
        Ok(ModelOutput::Empty)
    }
}

/// Returns a flat map, which normalizes to zero everywhere.
struct FlatMap;

impl AnomalyModel for FlatMap {
    fn infer(&self, _source: &Path, image: &RgbImage) -> Result<ModelOutput> {
        let (w, h) = image.dimensions();
        let plane = AnomalyMap::from_plane(w as usize, h as usize, vec![0.5; (w * h) as usize])?;
        Ok(ModelOutput::Tuple(vec![plane.clone(), plane]))
    }
}

fn workspace() -> (tempfile::TempDir, OutputLayout) {
    let dir = tempfile::tempdir().unwrap();
    let layout = OutputLayout::under(&dir.path().join("out"));
    layout.ensure().unwrap();
    (dir, layout)
}

fn write_image(dir: &Path, name: &str, color: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(64, 48, Rgb(color)).save(&path).unwrap();
    path
}

#[test]
fn red_image_is_a_full_wire_overload() {
    let (dir, layout) = workspace();
    let image = write_image(dir.path(), "t1.png", [255, 0, 0]);
    let pipeline =
        InspectionPipeline::new(NoMap, PipelineConfig::default(), FeedbackAdjustment::default())
            .unwrap();

    let result = pipeline.run(&image, &layout).unwrap();

    assert_eq!(result.global_label, FaultLabel::FullWireOverload);
    assert_eq!(result.detections.len(), 1);
    let detection = result.detections[0];
    assert_eq!(<[i64; 4]>::from(detection.bbox), [0, 0, 64, 48]);
    approx::assert_relative_eq!(detection.confidence, 0.94);
    assert!(result.mask_path.is_none());
    assert!(result.filtered_path.is_none());
    assert_eq!(result.boxed_image_path, layout.boxed.join("t1_boxed.png"));
    assert_eq!(result.record_path, layout.boxed.join("t1.json"));

    let record = InspectionRecord::read(&result.record_path).unwrap();
    assert_eq!(record.label, FaultLabel::FullWireOverload);
    assert_eq!(record.boxes.len(), 1);
    assert_eq!(record.boxes[0].bbox, vec![0, 0, 64, 48]);
    assert_eq!(record.mask_image, None);
    assert!(record.image.is_absolute());
    assert!(record.feedback_adjustments.applied);
    assert_eq!(record.feedback_adjustments.source, "none");
}

#[test]
fn blue_image_is_normal() {
    let (dir, layout) = workspace();
    let image = write_image(dir.path(), "cold.png", [0, 0, 255]);
    let pipeline =
        InspectionPipeline::new(NoMap, PipelineConfig::default(), FeedbackAdjustment::default())
            .unwrap();

    let result = pipeline.run(&image, &layout).unwrap();

    assert_eq!(result.global_label, FaultLabel::Normal);
    assert!(result.detections.is_empty());
    assert!(!result.feedback_record.applied);
    assert!(result.boxed_image_path.is_file());
}

#[test]
fn boxed_image_always_carries_label_text() {
    let (dir, layout) = workspace();
    let cold = RgbImage::from_pixel(200, 100, Rgb([0, 0, 255]));
    let image = dir.path().join("cold_wide.png");
    cold.save(&image).unwrap();
    let pipeline =
        InspectionPipeline::new(NoMap, PipelineConfig::default(), FeedbackAdjustment::default())
            .unwrap();

    let result = pipeline.run(&image, &layout).unwrap();

    let boxed = image::open(&result.boxed_image_path).unwrap().to_rgb8();
    let changed = boxed
        .pixels()
        .zip(cold.pixels())
        .filter(|(a, b)| a != b)
        .count();
    assert!(changed > 50, "only {changed} pixels changed");
}

#[test]
fn flat_anomaly_map_writes_mask_and_filters_everything() {
    let (dir, layout) = workspace();
    let image = write_image(dir.path(), "flat.png", [255, 0, 0]);
    let pipeline =
        InspectionPipeline::new(FlatMap, PipelineConfig::default(), FeedbackAdjustment::default())
            .unwrap();

    let result = pipeline.run(&image, &layout).unwrap();

    assert_eq!(result.global_label, FaultLabel::Normal);
    assert!(result.detections.is_empty());
    let mask = result.mask_path.clone().unwrap();
    let filtered = result.filtered_path.clone().unwrap();
    assert_eq!(mask, layout.masks.clone().unwrap().join("flat_mask.png"));
    assert!(mask.is_file());
    assert!(filtered.is_file());

    let filtered_image = image::open(&filtered).unwrap().to_rgb8();
    assert_eq!(filtered_image.dimensions(), (64, 48));
    assert!(filtered_image.pixels().all(|p| *p == Rgb([0, 0, 0])));
}

#[test]
fn feedback_shifts_confidence_and_is_audited() {
    let (dir, layout) = workspace();
    let image = write_image(dir.path(), "t2.png", [255, 0, 0]);
    let feedback = FeedbackAdjustment::parse(
        r#"{
            "global_adjustment": -0.1,
            "label_adjustments": {
                "Full Wire Overload": {"adjustment": 0.01, "samples": 12}
            },
            "learning_rate": 0.05,
            "source": "review-batch-7"
        }"#,
    )
    .unwrap();
    let pipeline = InspectionPipeline::new(NoMap, PipelineConfig::default(), feedback).unwrap();

    let result = pipeline.run(&image, &layout).unwrap();

    approx::assert_relative_eq!(result.detections[0].confidence, 0.85);
    let audit = &result.feedback_record;
    assert!(audit.applied);
    assert_eq!(audit.source, "review-batch-7");
    assert_eq!(audit.per_box.len(), 1);
    approx::assert_relative_eq!(audit.per_box[0].original_confidence, 0.94);
    approx::assert_relative_eq!(audit.per_box[0].adjustment, -0.09);
    assert_eq!(audit.per_box[0].source_metrics["samples"], 12);

    let record = InspectionRecord::read(&result.record_path).unwrap();
    approx::assert_relative_eq!(record.boxes[0].confidence.unwrap(), 0.85);
}

#[test]
fn redraw_reproduces_the_boxed_image() {
    let (dir, layout) = workspace();
    let image = write_image(dir.path(), "t3.png", [255, 0, 0]);
    let pipeline =
        InspectionPipeline::new(NoMap, PipelineConfig::default(), FeedbackAdjustment::default())
            .unwrap();
    let result = pipeline.run(&image, &layout).unwrap();
    let before = std::fs::read(&result.boxed_image_path).unwrap();

    let renderer = Renderer::new(PipelineConfig::default().render).unwrap();
    let redrawn = renderer.redraw_record(&result.record_path).unwrap();

    assert_eq!(redrawn, result.boxed_image_path);
    assert_eq!(std::fs::read(&redrawn).unwrap(), before);
}

#[test]
fn edited_record_redraws_with_new_boxes() {
    let (dir, layout) = workspace();
    let image = write_image(dir.path(), "t4.png", [0, 0, 255]);
    let pipeline =
        InspectionPipeline::new(NoMap, PipelineConfig::default(), FeedbackAdjustment::default())
            .unwrap();
    let result = pipeline.run(&image, &layout).unwrap();

    let mut record = InspectionRecord::read(&result.record_path).unwrap();
    let mut value = serde_json::to_value(&record).unwrap();
    value["boxes"] = serde_json::json!([
        {"box": [5, 25, 10, 10], "type": "Point Overload (Faulty)", "confidence": 0.7},
        {"box": [1, 2], "type": "Point Overload (Faulty)"}
    ]);
    record = serde_json::from_value(value).unwrap();
    record.write(&result.record_path).unwrap();

    let renderer = Renderer::new(PipelineConfig::default().render).unwrap();
    let redrawn = renderer.redraw_directory(&layout.boxed).unwrap();
    assert_eq!(redrawn.len(), 1);
    let boxed = image::open(redrawn[0].1.as_ref().unwrap()).unwrap().to_rgb8();
    assert_eq!(*boxed.get_pixel(5, 25), RED);
    assert_eq!(*boxed.get_pixel(15, 35), RED);
}

#[test]
fn hand_typed_potential_label_redraws_yellow() {
    let (dir, layout) = workspace();
    let image = write_image(dir.path(), "t5.png", [0, 0, 255]);
    let pipeline =
        InspectionPipeline::new(NoMap, PipelineConfig::default(), FeedbackAdjustment::default())
            .unwrap();
    let result = pipeline.run(&image, &layout).unwrap();

    let mut value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&result.record_path).unwrap()).unwrap();
    value["boxes"] = serde_json::json!([
        {"box": [5, 25, 10, 10], "type": "Hotspot (Potential)", "confidence": 0.4}
    ]);
    std::fs::write(&result.record_path, value.to_string()).unwrap();

    let record = InspectionRecord::read(&result.record_path).unwrap();
    assert_eq!(record.boxes[0].label.as_str(), "Hotspot (Potential)");
    record.write(&result.record_path).unwrap();

    let renderer = Renderer::new(PipelineConfig::default().render).unwrap();
    let redrawn = renderer.redraw_record(&result.record_path).unwrap();
    let boxed = image::open(&redrawn).unwrap().to_rgb8();
    assert_eq!(*boxed.get_pixel(5, 25), YELLOW);
    assert_eq!(*boxed.get_pixel(15, 35), YELLOW);

    let written = std::fs::read_to_string(&result.record_path).unwrap();
    assert!(written.contains("\"Hotspot (Potential)\""));
}

#[tokio::test]
async fn batch_keeps_going_past_bad_inputs() {
    let (dir, layout) = workspace();
    let red = write_image(dir.path(), "a.png", [255, 0, 0]);
    let blue = write_image(dir.path(), "b.png", [0, 0, 255]);
    let broken = dir.path().join("c.png");
    std::fs::write(&broken, b"not an image").unwrap();

    let pipeline =
        InspectionPipeline::new(NoMap, PipelineConfig::default(), FeedbackAdjustment::default())
            .unwrap();
    let items = BatchRunner::new(pipeline)
        .with_workers(2)
        .run(vec![red, broken, blue], layout.clone())
        .await;

    assert_eq!(
        BatchSummary::of(&items),
        BatchSummary {
            succeeded: 2,
            failed: 1
        }
    );
    assert_eq!(
        items[0].outcome.as_ref().unwrap().global_label,
        FaultLabel::FullWireOverload
    );
    assert!(matches!(items[1].outcome, Err(InspectionError::ImageLoad { .. })));
    assert_eq!(items[2].outcome.as_ref().unwrap().global_label, FaultLabel::Normal);
    assert!(layout.boxed.join("a.json").is_file());
    assert!(layout.boxed.join("b.json").is_file());
}
