/// Whether a cycle closed through the full dig/swing/dump/return path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    Complete,
    Partial,
}

impl Completeness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completeness::Complete => "complete",
            Completeness::Partial => "partial",
        }
    }
}

/// Durations of the four sub-segments of a cycle, in seconds. Phases that
/// were never observed (partial cycles) are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseDurations {
    pub dig: f64,
    pub swing_to_dump: f64,
    pub dump: f64,
    pub return_to_dig: f64,
}

impl PhaseDurations {
    pub fn total(&self) -> f64 {
        self.dig + self.swing_to_dump + self.dump + self.return_to_dig
    }

    pub fn all_positive(&self) -> bool {
        self.dig > 0.0 && self.swing_to_dump > 0.0 && self.dump > 0.0 && self.return_to_dig > 0.0
    }
}

/// One unit of work: dig, swing out, dump, swing back.
#[derive(Debug, Clone)]
pub struct Cycle {
    /// 1-based, assigned in the order cycles close.
    pub number: usize,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    pub phases: PhaseDurations,
    pub completeness: Completeness,
    pub note: Option<String>,
}

/// Aggregates over the kept cycles of a run.
///
/// The specific average is pure work time per cycle; the approximate average
/// spans first start to last end and so includes inter-cycle gaps. Idle per
/// cycle is their difference and can never be negative.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleStatistics {
    pub count: usize,
    pub specific_average: f64,
    pub approximate_average: f64,
    pub idle_per_cycle: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    pub std_deviation: f64,
}

impl CycleStatistics {
    /// Share of elapsed time spent idle between cycles, in percent.
    pub fn idle_percentage(&self) -> f64 {
        if self.approximate_average > 0.0 {
            self.idle_per_cycle / self.approximate_average * 100.0
        } else {
            0.0
        }
    }

    /// Consistency band from the coefficient of variation.
    pub fn consistency_label(&self) -> &'static str {
        if self.specific_average <= 0.0 {
            return "Low";
        }
        let cv = self.std_deviation / self.specific_average;
        if cv < 0.15 {
            "High"
        } else if cv < 0.30 {
            "Moderate"
        } else {
            "Low"
        }
    }

    /// Efficiency band from the idle-time percentage.
    pub fn efficiency_label(&self) -> &'static str {
        let idle = self.idle_percentage();
        if idle < 5.0 {
            "Excellent"
        } else if idle < 15.0 {
            "Good"
        } else if idle < 30.0 {
            "Fair"
        } else {
            "Needs Improvement"
        }
    }
}
