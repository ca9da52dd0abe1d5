// THEORY:
// This file is the main entry point for the `thermal_vision` library crate. It
// defines the public API exposed to drivers such as `thermal_tester`.
//
// The primary goal is to export the `InspectionPipeline` and its companions
// (`PipelineConfig`, `OutputLayout`, `PipelineResult`, `BatchRunner`) as the
// high-level interface. The stage modules in `core_modules` stay public so each
// stage can be used and tested on its own, but a driver should not need them
// beyond the `AnomalyModel` trait and the record types.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use crate::config::{OutputLayout, PipelineConfig, Sensitivity};
pub use crate::core_modules::anomaly_model::{AnomalyModel, ModelOutput};
pub use crate::core_modules::confidence_adjuster::FeedbackAdjustment;
pub use crate::core_modules::fault_label::{FaultLabel, RecordedLabel};
pub use crate::core_modules::geometry::BoundingBox;
pub use crate::core_modules::mask_projector::AnomalyMap;
pub use crate::core_modules::record::InspectionRecord;
pub use crate::core_modules::renderer::Renderer;
pub use crate::core_modules::rule_classifier::Detection;
pub use crate::error::{FeedbackError, InspectionError, Result};
pub use crate::parallel_pipeline::{BatchItem, BatchRunner, BatchSummary};
pub use crate::pipeline::{Analysis, InspectionPipeline, PipelineResult};
