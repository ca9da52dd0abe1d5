pub mod anomaly_model;
pub mod confidence_adjuster;
pub mod detection_resolver;
pub mod fault_label;
pub mod geometry;
pub mod hsv_pixel;
pub mod mask_projector;
pub mod record;
pub mod region_extractor;
pub mod renderer;
pub mod rule_classifier;
