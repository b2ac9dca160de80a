mod action_detector;
mod cycle_assembler;
mod frame_classifier;
mod frame_extractor;
mod report_generator;
mod telemetry_enricher;

pub use action_detector::detect_events;
pub use cycle_assembler::{CycleAssembler, statistics as cycle_statistics};
pub use frame_classifier::FrameClassifier;
pub use frame_extractor::FrameExtractor;
pub use report_generator::{NarrativeMode, ReportGenerator, ReportRequest};
pub use telemetry_enricher::{TelemetryEnricher, derive_source_id, parse_joystick, parse_metrics};
