//! Stage 4: group events into validated cycles and derive statistics.

use tracing::{debug, warn};

use crate::config::CycleSettings;
use crate::pipeline::types::{
    Completeness, Cycle, CycleStatistics, Event, EventKind, PhaseDurations,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InDig,
    InSwingOut,
    InDump,
    InSwingBack,
}

/// Cycle being accumulated; phase boundaries fill in as events arrive.
#[derive(Debug, Clone)]
struct OpenCycle {
    start: f64,
    dig_end: Option<f64>,
    dump_start: Option<f64>,
    dump_end: Option<f64>,
    last_observed: f64,
}

impl OpenCycle {
    fn new(start: f64) -> Self {
        Self {
            start,
            dig_end: None,
            dump_start: None,
            dump_end: None,
            last_observed: start,
        }
    }
}

/// Groups the event stream into complete and partial cycles.
///
/// The completeness thresholds default to 5 s (complete) and 3 s (partial)
/// and are configuration, not constants, so tuning them does not require a
/// code change.
#[derive(Debug, Clone)]
pub struct CycleAssembler {
    complete_min_secs: f64,
    partial_min_secs: f64,
}

impl CycleAssembler {
    pub fn new(settings: &CycleSettings) -> Self {
        Self {
            complete_min_secs: settings.complete_min_secs,
            partial_min_secs: settings.partial_min_secs,
        }
    }

    /// Pure over the event stream: replaying the same events yields the
    /// same cycles.
    pub fn assemble(&self, events: &[Event]) -> Vec<Cycle> {
        let mut cycles: Vec<Cycle> = Vec::new();
        let mut state = State::Idle;
        let mut open: Option<OpenCycle> = None;

        for event in events {
            // A dig_start that flushes the running cycle is not part of it:
            // the partial ends at the last event observed before it.
            if event.kind != EventKind::DigStart {
                if let Some(cycle) = open.as_mut() {
                    cycle.last_observed = event.timestamp;
                }
            }

            match (state, event.kind) {
                (State::Idle, EventKind::DigStart) => {
                    open = Some(OpenCycle::new(event.timestamp));
                    state = State::InDig;
                }
                (State::InDig, EventKind::DigEnd) => {
                    if let Some(cycle) = open.as_mut() {
                        cycle.dig_end = Some(event.timestamp);
                    }
                    state = State::InSwingOut;
                }
                (State::InSwingOut, EventKind::DumpStart) => {
                    if let Some(cycle) = open.as_mut() {
                        cycle.dump_start = Some(event.timestamp);
                    }
                    state = State::InDump;
                }
                (State::InDump, EventKind::DumpEnd) => {
                    if let Some(cycle) = open.as_mut() {
                        cycle.dump_end = Some(event.timestamp);
                    }
                    state = State::InSwingBack;
                }
                (State::InSwingBack, EventKind::ReturnToDig) => {
                    if let Some(cycle) = open.take() {
                        self.close(&mut cycles, cycle, event.timestamp, true);
                    }
                    state = State::Idle;
                }
                // A new dig while a cycle is still open: flush the old one
                // as partial if it qualifies, then start over.
                (_, EventKind::DigStart) => {
                    if let Some(cycle) = open.take() {
                        self.flush_partial(&mut cycles, cycle);
                    }
                    open = Some(OpenCycle::new(event.timestamp));
                    state = State::InDig;
                }
                (_, kind) => {
                    debug!("ignoring {} in state {:?}", kind, state);
                }
            }
        }

        // Incomplete tail at end of stream.
        if let Some(cycle) = open.take() {
            self.flush_partial(&mut cycles, cycle);
        }

        cycles
    }

    fn close(&self, cycles: &mut Vec<Cycle>, cycle: OpenCycle, end: f64, normal_path: bool) {
        let duration = end - cycle.start;
        let phases = Self::phases(&cycle, Some(end));

        if normal_path && duration >= self.complete_min_secs && phases.all_positive() {
            let number = cycles.len() + 1;
            cycles.push(Cycle {
                number,
                start: cycle.start,
                end,
                duration,
                phases,
                completeness: Completeness::Complete,
                note: Some(Self::observations(&phases, Completeness::Complete)),
            });
            return;
        }

        // Did not qualify as complete; fall back to the partial rule.
        self.flush_partial(cycles, cycle);
    }

    fn flush_partial(&self, cycles: &mut Vec<Cycle>, cycle: OpenCycle) {
        let end = cycle.last_observed;
        let duration = end - cycle.start;

        // A partial cycle needs at least its dig phase bounded and enough
        // observed time to be meaningful.
        if cycle.dig_end.is_none() || duration < self.partial_min_secs {
            debug!(
                "discarding cycle at {:.3}s: duration {:.3}s, dig bounded: {}",
                cycle.start,
                duration,
                cycle.dig_end.is_some()
            );
            return;
        }

        let phases = Self::phases(&cycle, None);
        let number = cycles.len() + 1;
        cycles.push(Cycle {
            number,
            start: cycle.start,
            end,
            duration,
            phases,
            completeness: Completeness::Partial,
            note: Some(Self::observations(&phases, Completeness::Partial)),
        });
    }

    /// Phase durations from consecutive bounded events; unobserved phases
    /// stay zero.
    fn phases(cycle: &OpenCycle, end: Option<f64>) -> PhaseDurations {
        let mut phases = PhaseDurations::default();
        if let Some(dig_end) = cycle.dig_end {
            phases.dig = dig_end - cycle.start;
            if let Some(dump_start) = cycle.dump_start {
                phases.swing_to_dump = dump_start - dig_end;
                if let Some(dump_end) = cycle.dump_end {
                    phases.dump = dump_end - dump_start;
                    if let Some(end) = end {
                        phases.return_to_dig = end - dump_end;
                    }
                }
            }
        }
        phases
    }

    fn observations(phases: &PhaseDurations, completeness: Completeness) -> String {
        let mut notes: Vec<&str> = Vec::new();
        if completeness == Completeness::Partial {
            notes.push("incomplete cycle");
        }
        if phases.dig > 0.0 && phases.dig < 3.0 {
            notes.push("quick dig");
        } else if phases.dig > 8.0 {
            notes.push("extended dig");
        }
        if !phases.all_positive() {
            notes.push("missing phases");
        }
        if notes.is_empty() {
            notes.push("normal cycle");
        }
        notes.join(", ")
    }
}

/// Aggregate statistics over the kept cycles.
///
/// Variance uses the numerically stable two-pass form and the population
/// formula (divide by N); zero or one cycle has a deviation of zero.
pub fn statistics(cycles: &[Cycle]) -> CycleStatistics {
    if cycles.is_empty() {
        return CycleStatistics::default();
    }

    let count = cycles.len();
    let durations: Vec<f64> = cycles.iter().map(|c| c.duration).collect();

    let sum: f64 = durations.iter().sum();
    let specific = sum / count as f64;

    let approximate = (cycles[count - 1].end - cycles[0].start) / count as f64;

    // Gaps between cycles can only add time, so approximate >= specific up
    // to float error; clamp the difference at zero.
    let idle = (approximate - specific).max(0.0);
    if approximate - specific < -1e-6 {
        warn!(
            "approximate average {:.3} below specific {:.3}; overlapping cycles?",
            approximate, specific
        );
    }

    let min = durations.iter().copied().fold(f64::INFINITY, f64::min);
    let max = durations.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let std_deviation = if count > 1 {
        let sum_sq: f64 = durations.iter().map(|d| (d - specific).powi(2)).sum();
        (sum_sq / count as f64).sqrt()
    } else {
        0.0
    };

    CycleStatistics {
        count,
        specific_average: specific,
        approximate_average: approximate,
        idle_per_cycle: idle,
        min_duration: min,
        max_duration: max,
        std_deviation,
    }
}

impl CycleAssembler {
    /// Assemble and summarize in one step.
    pub fn run(&self, events: &[Event]) -> (Vec<Cycle>, CycleStatistics) {
        let cycles = self.assemble(events);
        let stats = statistics(&cycles);
        (cycles, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::ActivityLabel;

    fn assembler() -> CycleAssembler {
        CycleAssembler {
            complete_min_secs: 5.0,
            partial_min_secs: 3.0,
        }
    }

    fn ev(kind: EventKind, t: f64) -> Event {
        Event::new(
            kind,
            t,
            (t * 3.0) as usize,
            ActivityLabel::Idle,
            ActivityLabel::Idle,
        )
    }

    fn full_cycle(base: f64) -> Vec<Event> {
        vec![
            ev(EventKind::DigStart, base),
            ev(EventKind::DigEnd, base + 8.0),
            ev(EventKind::DumpStart, base + 18.0),
            ev(EventKind::DumpEnd, base + 22.0),
            ev(EventKind::ReturnToDig, base + 30.0),
        ]
    }

    #[test]
    fn single_complete_cycle() {
        let (cycles, stats) = assembler().run(&full_cycle(10.0));
        assert_eq!(cycles.len(), 1);
        let c = &cycles[0];
        assert_eq!(c.number, 1);
        assert_eq!(c.completeness, Completeness::Complete);
        assert!((c.duration - 30.0).abs() < 1e-9);
        assert!((c.phases.total() - c.duration).abs() < 1e-3);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.std_deviation, 0.0);
        assert_eq!(c.note.as_deref(), Some("normal cycle"));
    }

    #[test]
    fn short_normal_path_cycle_downgrades_to_partial() {
        let events = vec![
            ev(EventKind::DigStart, 0.0),
            ev(EventKind::DigEnd, 1.0),
            ev(EventKind::DumpStart, 2.0),
            ev(EventKind::DumpEnd, 3.0),
            ev(EventKind::ReturnToDig, 4.0),
        ];
        let cycles = assembler().assemble(&events);
        // 4 s: below the complete threshold but above the partial one.
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].completeness, Completeness::Partial);
    }

    #[test]
    fn very_short_cycle_is_discarded() {
        let events = vec![
            ev(EventKind::DigStart, 0.0),
            ev(EventKind::DigEnd, 1.0),
            ev(EventKind::DumpStart, 1.5),
            ev(EventKind::DumpEnd, 2.0),
            ev(EventKind::ReturnToDig, 2.5),
        ];
        assert!(assembler().assemble(&events).is_empty());
    }

    #[test]
    fn dig_start_mid_cycle_flushes_a_partial_then_opens_anew() {
        let mut events = vec![
            ev(EventKind::DigStart, 0.0),
            ev(EventKind::DigEnd, 4.0),
            ev(EventKind::DumpStart, 6.0),
            // No dump_end: operator went straight back to digging.
            ev(EventKind::DigStart, 9.0),
        ];
        events.extend(full_cycle(9.0));
        // full_cycle repeats the dig_start at 9.0; drop the duplicate.
        events.remove(4);

        let cycles = assembler().assemble(&events);
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].completeness, Completeness::Partial);
        // Ends at the dump_start observed before the new dig, not at 9.0.
        assert!((cycles[0].end - 6.0).abs() < 1e-9);
        assert_eq!(cycles[0].phases.return_to_dig, 0.0);
        assert_eq!(cycles[1].completeness, Completeness::Complete);
        assert_eq!(cycles[1].number, 2);
    }

    #[test]
    fn truncated_tail_becomes_a_partial_cycle() {
        let mut events = full_cycle(0.0);
        events.extend(vec![
            ev(EventKind::DigStart, 30.0),
            ev(EventKind::DigEnd, 38.0),
            ev(EventKind::DumpStart, 48.0),
            ev(EventKind::DumpEnd, 52.0),
            // Video ends during the swing back.
        ]);
        let cycles = assembler().assemble(&events);
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[1].completeness, Completeness::Partial);
        assert_eq!(cycles[1].phases.return_to_dig, 0.0);
        assert!((cycles[1].end - 52.0).abs() < 1e-9);
        assert!(cycles[1].note.as_deref().unwrap().contains("incomplete cycle"));
    }

    #[test]
    fn tail_without_dig_end_is_discarded() {
        let mut events = full_cycle(0.0);
        events.push(ev(EventKind::DigStart, 30.0));
        let cycles = assembler().assemble(&events);
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn unexpected_events_are_ignored() {
        let events = vec![
            ev(EventKind::DumpEnd, 0.0),
            ev(EventKind::ReturnToDig, 1.0),
            ev(EventKind::DigStart, 2.0),
            ev(EventKind::DumpStart, 3.0), // not valid while in dig
            ev(EventKind::DigEnd, 10.0),
            ev(EventKind::DumpStart, 12.0),
            ev(EventKind::DumpEnd, 14.0),
            ev(EventKind::ReturnToDig, 20.0),
        ];
        let cycles = assembler().assemble(&events);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].completeness, Completeness::Complete);
        assert!((cycles[0].duration - 18.0).abs() < 1e-9);
    }

    #[test]
    fn empty_input_gives_empty_cycles_and_zeroed_statistics() {
        let (cycles, stats) = assembler().run(&[]);
        assert!(cycles.is_empty());
        assert_eq!(stats, CycleStatistics::default());
    }

    #[test]
    fn statistics_follow_the_two_average_definitions() {
        // Three 30 s cycles separated by 15 s gaps.
        let mut events = Vec::new();
        for i in 0..3 {
            events.extend(full_cycle(i as f64 * 45.0));
        }
        let (cycles, stats) = assembler().run(&events);
        assert_eq!(cycles.len(), 3);
        assert_eq!(stats.count, 3);
        assert!((stats.specific_average - 30.0).abs() < 1e-9);
        // Span 0..120 over three cycles.
        assert!((stats.approximate_average - 40.0).abs() < 1e-9);
        assert!((stats.idle_per_cycle - 10.0).abs() < 1e-9);
        assert!(stats.approximate_average >= stats.specific_average);
        assert!(stats.idle_per_cycle >= 0.0);
        assert_eq!(stats.std_deviation, 0.0);
        assert_eq!(stats.min_duration, 30.0);
        assert_eq!(stats.max_duration, 30.0);
    }

    #[test]
    fn standard_deviation_uses_the_population_formula() {
        let mk = |start: f64, dur: f64| Cycle {
            number: 1,
            start,
            end: start + dur,
            duration: dur,
            phases: PhaseDurations::default(),
            completeness: Completeness::Complete,
            note: None,
        };
        let cycles = vec![mk(0.0, 28.0), mk(28.0, 25.0), mk(53.0, 31.0)];
        let stats = statistics(&cycles);
        let mean = (28.0 + 25.0 + 31.0) / 3.0;
        let expected =
            (((28.0f64 - mean).powi(2) + (25.0 - mean).powi(2) + (31.0 - mean).powi(2)) / 3.0)
                .sqrt();
        assert!((stats.std_deviation - expected).abs() < 1e-9);
    }

    #[test]
    fn replaying_the_same_events_yields_identical_cycles() {
        let mut events = Vec::new();
        for i in 0..3 {
            events.extend(full_cycle(i as f64 * 30.0));
        }
        let a = assembler().assemble(&events);
        let b = assembler().assemble(&events);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.number, y.number);
            assert_eq!(x.start, y.start);
            assert_eq!(x.end, y.end);
            assert_eq!(x.completeness, y.completeness);
        }
    }
}
