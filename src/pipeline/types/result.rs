use super::{Cycle, CycleStatistics, JoystickRecord, TelemetryRecord};

/// Rendered report bytes plus their MIME type.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

impl ReportArtifact {
    pub fn markdown(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: "text/markdown",
        }
    }

    pub fn html(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: "text/html",
        }
    }

    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Everything a finished run produced, returned by value from the
/// coordinator. A hard failure returns an error instead; there is no
/// partially filled result.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub source_id: String,
    pub frames_extracted: usize,
    pub max_frames: Option<usize>,
    pub events_count: usize,
    pub cycles: Vec<Cycle>,
    pub statistics: CycleStatistics,
    pub telemetry: TelemetryRecord,
    pub joystick: JoystickRecord,
    pub report: ReportArtifact,
}
