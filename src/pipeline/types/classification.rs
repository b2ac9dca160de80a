use std::fmt;

/// The fixed set of activities the vision model may report.
///
/// Anything else coming back over the wire is coerced to `Idle` with a note
/// on the classification, so downstream stages only ever see these five.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityLabel {
    Digging,
    SwingToDump,
    Dumping,
    SwingToDig,
    Idle,
}

impl ActivityLabel {
    pub const ALL: [ActivityLabel; 5] = [
        ActivityLabel::Digging,
        ActivityLabel::SwingToDump,
        ActivityLabel::Dumping,
        ActivityLabel::SwingToDig,
        ActivityLabel::Idle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLabel::Digging => "digging",
            ActivityLabel::SwingToDump => "swing_to_dump",
            ActivityLabel::Dumping => "dumping",
            ActivityLabel::SwingToDig => "swing_to_dig",
            ActivityLabel::Idle => "idle",
        }
    }

    /// Strict parse against the five permitted labels.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "digging" => Some(ActivityLabel::Digging),
            "swing_to_dump" => Some(ActivityLabel::SwingToDump),
            "dumping" => Some(ActivityLabel::Dumping),
            "swing_to_dig" => Some(ActivityLabel::SwingToDig),
            "idle" => Some(ActivityLabel::Idle),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame paired with its activity label.
///
/// Exactly one classification exists per extracted frame once stage 2
/// completes; a failed model call yields `Idle` with confidence 0 and a
/// failure note so the sequence stays complete.
#[derive(Debug, Clone)]
pub struct Classification {
    pub frame_index: usize,
    pub timestamp: f64,
    pub label: ActivityLabel,
    pub confidence: f64,
    pub note: Option<String>,
}

impl Classification {
    pub fn new(frame_index: usize, timestamp: f64, label: ActivityLabel, confidence: f64) -> Self {
        Self {
            frame_index,
            timestamp,
            label,
            confidence,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Fallback record for a frame whose model call could not be completed.
    pub fn failed(frame_index: usize, timestamp: f64, cause: impl Into<String>) -> Self {
        Self {
            frame_index,
            timestamp,
            label: ActivityLabel::Idle,
            confidence: 0.0,
            note: Some(cause.into()),
        }
    }
}
