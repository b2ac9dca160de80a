/// External simulator telemetry matched to the video by its derived
/// identifier. Absence is normal: `found` is false and every metric zero.
///
/// Individual metrics missing from a located report stay zero without
/// clearing `found`, as long as at least one metric parsed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryRecord {
    pub found: bool,
    pub fuel_burned_litres: f64,
    pub time_swinging_left_secs: f64,
    pub time_swinging_right_secs: f64,
    pub productivity_m3_per_hr: Option<f64>,
}

impl TelemetryRecord {
    pub fn not_found() -> Self {
        Self::default()
    }
}

/// Joystick control statistics matched by the same derived identifier,
/// read from the operator's `stats.json`. Like the PDF telemetry, a
/// missing or unreadable file is normal and never fails the run.
#[derive(Debug, Clone, PartialEq)]
pub struct JoystickRecord {
    pub found: bool,
    /// Bimanual coordination score, three decimals.
    pub bcs_score: f64,
    pub si_matrix: Vec<SiRow>,
    pub control_usage: ControlUsage,
}

/// One row of the simultaneity-index matrix: how often the named control
/// moved together with swing, arm and bucket inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct SiRow {
    pub control: String,
    pub swing: f64,
    pub arm: f64,
    pub bucket: f64,
}

/// Share of operating time spent moving one or more controls at once, in
/// percent. Single-control usage is 100 by definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlUsage {
    pub single_control: f64,
    pub dual_control: f64,
    pub triple_control: f64,
    pub full_control: f64,
}

impl Default for ControlUsage {
    fn default() -> Self {
        Self {
            single_control: 100.0,
            dual_control: 0.0,
            triple_control: 0.0,
            full_control: 0.0,
        }
    }
}

impl JoystickRecord {
    pub fn not_found() -> Self {
        Self::default()
    }
}

impl Default for JoystickRecord {
    fn default() -> Self {
        Self {
            found: false,
            bcs_score: 0.0,
            si_matrix: Vec::new(),
            control_usage: ControlUsage::default(),
        }
    }
}
