//! Stage 5: attach external telemetry matched by the derived source id.
//!
//! Two adapters: the simulation-report PDF and the joystick `stats.json`.
//! Nothing in here can fail the pipeline: a missing file, unreadable file
//! or unparseable content all produce a record with `found = false`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::pipeline::types::{ControlUsage, JoystickRecord, SiRow, TelemetryRecord};

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z]?\d+[A-Za-z]?)").unwrap());

static FUEL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Fuel\s+Burned\s+([\d.]+)\s*L").unwrap());

static PRODUCTIVITY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Productivity\s+([\d.]+)\s*m³?/hr").unwrap());

static SWING_LEFT_SECS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Time\s+Spent\s+Swinging\s+Left\s+([\d.]+)\s*sec").unwrap());

static SWING_LEFT_CLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Time\s+Spent\s+Swinging\s+Left\s+((?:\d{1,2}:)?\d{1,2}:\d{2})").unwrap());

static SWING_RIGHT_SECS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Time\s+Spent\s+Swinging\s+Right\s+([\d.]+)\s*sec").unwrap());

static SWING_RIGHT_CLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Time\s+Spent\s+Swinging\s+Right\s+((?:\d{1,2}:)?\d{1,2}:\d{2})").unwrap());

/// Identifier used to pair a video with its telemetry PDF: the filename
/// stem, narrowed to its first alphanumeric id group when one is present
/// (`B6.mp4` -> `B6`, `session_12.mp4` -> `12`).
pub fn derive_source_id(source: &str) -> String {
    let stem = Path::new(source)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(source);
    ID_PATTERN
        .captures(stem)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| stem.to_string())
}

pub struct TelemetryEnricher {
    dir: PathBuf,
    joystick_dir: PathBuf,
}

impl TelemetryEnricher {
    pub fn new(dir: impl Into<PathBuf>, joystick_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            joystick_dir: joystick_dir.into(),
        }
    }

    /// Look up `<dir>/<id>.pdf` and parse its metrics. PDF extraction runs
    /// on the blocking pool; `pdf-extract` can panic on malformed files, so
    /// the panic is contained to that task.
    pub async fn enrich(&self, source_id: &str) -> TelemetryRecord {
        let pdf_path = self.dir.join(format!("{source_id}.pdf"));
        if !pdf_path.exists() {
            info!("no telemetry report at {}", pdf_path.display());
            return TelemetryRecord::not_found();
        }

        let text = match tokio::task::spawn_blocking(move || pdf_extract::extract_text(&pdf_path))
            .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!("telemetry PDF unreadable: {e}");
                return TelemetryRecord::not_found();
            }
            Err(e) => {
                warn!("telemetry extraction task failed: {e}");
                return TelemetryRecord::not_found();
            }
        };

        let record = parse_metrics(&text);
        if record.found {
            info!(
                "telemetry for {source_id}: fuel {:.2} L, left {:.0} s, right {:.0} s",
                record.fuel_burned_litres,
                record.time_swinging_left_secs,
                record.time_swinging_right_secs
            );
        } else {
            warn!("telemetry PDF for {source_id} contained no recognizable metrics");
        }
        record
    }

    /// Look up `<joystick_dir>/<id>/stats.json` and deserialize the
    /// control statistics.
    pub async fn enrich_joystick(&self, source_id: &str) -> JoystickRecord {
        let stats_path = self.joystick_dir.join(source_id).join("stats.json");
        let raw = match tokio::fs::read_to_string(&stats_path).await {
            Ok(raw) => raw,
            Err(e) => {
                info!("no joystick statistics at {}: {e}", stats_path.display());
                return JoystickRecord::not_found();
            }
        };

        match parse_joystick(&raw) {
            Ok(record) => {
                info!("joystick statistics for {source_id}: BCS {:.3}", record.bcs_score);
                record
            }
            Err(e) => {
                warn!("joystick stats.json unparseable: {e}");
                JoystickRecord::not_found()
            }
        }
    }
}

/// Raw layout of the operator's `stats.json`: the SI simultaneity matrix,
/// the bimanual coordination score and multi-control usage percentages.
#[derive(Debug, Deserialize)]
struct StatsFile {
    #[serde(rename = "SI", default)]
    si: HashMap<String, HashMap<String, Option<f64>>>,
    #[serde(rename = "BCS", default)]
    bcs: f64,
    #[serde(default)]
    control_usage: HashMap<String, f64>,
}

/// Rows of the SI matrix, in display order.
const SI_CONTROLS: [&str; 3] = ["Boom", "Arm", "Bucket"];

/// Deserialize joystick statistics. Absent or null matrix cells read as
/// zero; single-control usage is 100% by definition.
pub fn parse_joystick(raw: &str) -> Result<JoystickRecord, serde_json::Error> {
    let stats: StatsFile = serde_json::from_str(raw)?;

    let cell = |control: &str, column: &str| -> f64 {
        let value = stats
            .si
            .get(control)
            .and_then(|row| row.get(column))
            .copied()
            .flatten()
            .unwrap_or(0.0);
        round3(value)
    };

    let si_matrix = SI_CONTROLS
        .iter()
        .map(|&control| SiRow {
            control: control.to_string(),
            swing: cell(control, "Swing"),
            arm: cell(control, "Arm"),
            bucket: cell(control, "Bucket"),
        })
        .collect();

    let usage = |key: &str| stats.control_usage.get(key).copied().unwrap_or(0.0);

    Ok(JoystickRecord {
        found: true,
        bcs_score: round3(stats.bcs),
        si_matrix,
        control_usage: ControlUsage {
            single_control: 100.0,
            dual_control: usage("2_controls"),
            triple_control: usage("3_controls"),
            full_control: usage("4_controls"),
        },
    })
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Extract the labelled metrics from PDF text. Missing individual metrics
/// stay zero; `found` is set as soon as any one of them parses.
pub fn parse_metrics(text: &str) -> TelemetryRecord {
    let mut record = TelemetryRecord::not_found();

    if let Some(value) = capture_f64(&FUEL_PATTERN, text) {
        record.fuel_burned_litres = value;
        record.found = true;
    }

    if let Some(value) = capture_f64(&PRODUCTIVITY_PATTERN, text) {
        record.productivity_m3_per_hr = Some(value);
        record.found = true;
    }

    if let Some(secs) = capture_duration(&SWING_LEFT_SECS, &SWING_LEFT_CLOCK, text) {
        record.time_swinging_left_secs = secs;
        record.found = true;
    }

    if let Some(secs) = capture_duration(&SWING_RIGHT_SECS, &SWING_RIGHT_CLOCK, text) {
        record.time_swinging_right_secs = secs;
        record.found = true;
    }

    record
}

fn capture_f64(pattern: &Regex, text: &str) -> Option<f64> {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Time metrics come as plain seconds ("44 sec") or clock form
/// ("00:01:01" / "01:05"); try seconds first.
fn capture_duration(secs_pattern: &Regex, clock_pattern: &Regex, text: &str) -> Option<f64> {
    if let Some(secs) = capture_f64(secs_pattern, text) {
        return Some(secs);
    }
    clock_pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| clock_to_seconds(m.as_str()))
}

fn clock_to_seconds(clock: &str) -> Option<f64> {
    let parts: Vec<&str> = clock.split(':').collect();
    let nums: Option<Vec<u32>> = parts.iter().map(|p| p.parse().ok()).collect();
    let nums = nums?;
    match nums.as_slice() {
        [h, m, s] => Some(f64::from(h * 3600 + m * 60 + s)),
        [m, s] => Some(f64::from(m * 60 + s)),
        _ => None,
    }
}
