pub mod progress;
pub mod stages;
pub mod types;

pub use progress::{Progress, ProgressCallback};
pub use types::{
    ActivityLabel, Classification, Completeness, Cycle, CycleStatistics, Event, EventKind, Frame,
    JoystickRecord, PipelineResult, ReportArtifact, TelemetryRecord,
};
