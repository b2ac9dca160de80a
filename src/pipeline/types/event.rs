use std::fmt;

use super::ActivityLabel;

/// State transitions that matter to cycle assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DigStart,
    DigEnd,
    DumpStart,
    DumpEnd,
    ReturnToDig,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DigStart => "dig_start",
            EventKind::DigEnd => "dig_end",
            EventKind::DumpStart => "dump_start",
            EventKind::DumpEnd => "dump_end",
            EventKind::ReturnToDig => "return_to_dig",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition between two consecutive classifications with different
/// labels. The timestamp and frame index are those of the second
/// classification; ordering is by timestamp, ties broken by frame index.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: f64,
    pub frame_index: usize,
    pub from: ActivityLabel,
    pub to: ActivityLabel,
}

impl Event {
    pub fn new(
        kind: EventKind,
        timestamp: f64,
        frame_index: usize,
        from: ActivityLabel,
        to: ActivityLabel,
    ) -> Self {
        Self {
            kind,
            timestamp,
            frame_index,
            from,
            to,
        }
    }
}
