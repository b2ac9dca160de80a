use std::sync::Arc;

/// A progress emission, already normalized to the run-wide 0-100 scale.
#[derive(Debug, Clone)]
pub struct Progress {
    pub stage: &'static str,
    pub message: String,
    pub percent: u8,
}

/// Best-effort observer. Failures inside the callback are the caller's
/// problem; the pipeline never aborts because of one.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Fixed stage weights summing to 100.
const STAGE_WEIGHTS: [(&str, u8); 6] = [
    ("frame_extraction", 10),
    ("frame_classification", 25),
    ("action_detection", 5),
    ("cycle_assembly", 20),
    ("telemetry_enrichment", 10),
    ("report_generation", 30),
];

/// Maps stage-local completion fractions onto the single run-wide scale.
#[derive(Debug, Clone)]
pub struct ProgressScaler {
    callback: Option<ProgressCallback>,
}

impl ProgressScaler {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self { callback }
    }

    /// Emit progress for `stage`, `fraction` being stage-local in [0, 1].
    pub fn emit(&self, stage: &'static str, fraction: f64, message: impl Into<String>) {
        let Some(callback) = &self.callback else {
            return;
        };
        callback(Progress {
            stage,
            message: message.into(),
            percent: Self::percent(stage, fraction),
        });
    }

    /// Stage-scoped emitter that can be handed into a stage.
    pub fn for_stage(&self, stage: &'static str) -> StageProgress {
        StageProgress {
            scaler: self.clone(),
            stage,
        }
    }

    fn percent(stage: &str, fraction: f64) -> u8 {
        let fraction = fraction.clamp(0.0, 1.0);
        let mut base = 0u32;
        for (name, weight) in STAGE_WEIGHTS {
            if name == stage {
                let scaled = base as f64 + fraction * f64::from(weight);
                return scaled.round().min(100.0) as u8;
            }
            base += u32::from(weight);
        }
        // Unknown stage names report the overall floor rather than panic.
        0
    }
}

/// Progress emitter bound to one stage.
#[derive(Clone)]
pub struct StageProgress {
    scaler: ProgressScaler,
    stage: &'static str,
}

impl StageProgress {
    pub fn emit(&self, fraction: f64, message: impl Into<String>) {
        self.scaler.emit(self.stage, fraction, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collect() -> (ProgressCallback, Arc<Mutex<Vec<Progress>>>) {
        let seen: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));
        (callback, seen)
    }

    #[test]
    fn weights_stack_across_stages() {
        let (callback, seen) = collect();
        let scaler = ProgressScaler::new(Some(callback));

        scaler.emit("frame_extraction", 0.0, "start");
        scaler.emit("frame_extraction", 1.0, "done");
        scaler.emit("frame_classification", 0.5, "halfway");
        scaler.emit("report_generation", 1.0, "done");

        let seen = seen.lock().unwrap();
        let percents: Vec<u8> = seen.iter().map(|p| p.percent).collect();
        // extraction spans 0-10, classification 10-35, report ends at 100.
        assert_eq!(percents, vec![0, 10, 23, 100]);
    }

    #[test]
    fn fractions_are_clamped() {
        let (callback, seen) = collect();
        let scaler = ProgressScaler::new(Some(callback));
        scaler.emit("frame_extraction", 7.0, "overshoot");
        scaler.emit("frame_extraction", -3.0, "undershoot");
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].percent, 10);
        assert_eq!(seen[1].percent, 0);
    }

    #[test]
    fn silent_without_a_callback() {
        // Just must not panic.
        ProgressScaler::new(None).emit("frame_extraction", 0.5, "ignored");
    }
}
