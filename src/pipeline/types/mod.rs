mod classification;
mod cycle;
mod event;
mod frame;
mod result;
mod telemetry;

pub use classification::{ActivityLabel, Classification};
pub use cycle::{Completeness, Cycle, CycleStatistics, PhaseDurations};
pub use event::{Event, EventKind};
pub use frame::{Frame, ImageEncoding};
pub use result::{PipelineResult, ReportArtifact};
pub use telemetry::{ControlUsage, JoystickRecord, SiRow, TelemetryRecord};
