//! Stage 3: compress the dense label stream into sparse transition events.

use tracing::debug;

use crate::pipeline::types::{ActivityLabel, Classification, Event, EventKind};

/// Single pass over ordered classifications. The label before the first
/// frame is taken to be `idle`, so a video that opens mid-dig emits a
/// `dig_start` at its first frame.
///
/// Pure function; degenerate inputs simply produce no events.
pub fn detect_events(classifications: &[Classification]) -> Vec<Event> {
    let mut events = Vec::new();
    let mut prev = ActivityLabel::Idle;

    for c in classifications {
        let cur = c.label;
        if cur != prev {
            for kind in transition_events(prev, cur) {
                debug!(
                    "event {} at {:.3}s ({} -> {})",
                    kind, c.timestamp, prev, cur
                );
                events.push(Event::new(kind, c.timestamp, c.frame_index, prev, cur));
            }
        }
        prev = cur;
    }

    events
}

/// Events triggered by one label transition, in emission order.
///
/// `swing_to_dig -> digging` both closes the running cycle and opens the
/// next one, so it yields `return_to_dig` followed by `dig_start` at the
/// same timestamp.
fn transition_events(prev: ActivityLabel, cur: ActivityLabel) -> Vec<EventKind> {
    use ActivityLabel::*;

    let mut kinds = Vec::with_capacity(2);
    match (prev, cur) {
        (SwingToDig, Digging) => {
            kinds.push(EventKind::ReturnToDig);
            kinds.push(EventKind::DigStart);
        }
        (_, Digging) => kinds.push(EventKind::DigStart),
        (Digging, SwingToDump | Idle) => kinds.push(EventKind::DigEnd),
        (_, Dumping) => kinds.push(EventKind::DumpStart),
        (Dumping, SwingToDig | Idle) => kinds.push(EventKind::DumpEnd),
        (SwingToDig, Idle) => kinds.push(EventKind::ReturnToDig),
        _ => {}
    }
    kinds
}
