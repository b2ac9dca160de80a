//! Deterministic report rendering: a fixed template filled with computed
//! blocks. Byte-identical output for identical inputs.

use crate::pipeline::types::{Cycle, CycleStatistics, JoystickRecord, TelemetryRecord};

/// Everything the deterministic renderer needs. The generation date is an
/// input (not read from the clock here) so rendering stays a pure function.
pub struct ReportInput<'a> {
    pub source_id: &'a str,
    pub generated_on: &'a str,
    pub cycles: &'a [Cycle],
    pub statistics: &'a CycleStatistics,
    pub telemetry: &'a TelemetryRecord,
    pub joystick: &'a JoystickRecord,
    pub extra_note: Option<&'a str>,
}

/// Render `template` by substituting the computed blocks. Fails if the
/// template still contains unresolved placeholders afterwards.
pub fn render(template: &str, input: &ReportInput<'_>) -> Result<String, String> {
    let rendered = template
        .replace("{{source_id}}", input.source_id)
        .replace("{{date}}", input.generated_on)
        .replace("{{cycle_table}}", &cycle_table(input.cycles))
        .replace("{{statistics}}", &statistics_block(input.statistics))
        .replace("{{telemetry}}", &telemetry_block(input.telemetry))
        .replace("{{joystick}}", &joystick_block(input.joystick))
        .replace("{{notes}}", &notes_block(input.extra_note));

    if let Some(pos) = rendered.find("{{") {
        let tail: String = rendered[pos..].chars().take(40).collect();
        return Err(format!("unresolved placeholder near '{tail}'"));
    }
    Ok(rendered)
}

/// `MM:SS` with seconds rounded to the nearest integer.
pub fn format_mmss(seconds: f64) -> String {
    let total = seconds.round().max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Durations render in seconds with one decimal place.
pub fn format_secs(seconds: f64) -> String {
    format!("{seconds:.1}s")
}

fn cycle_table(cycles: &[Cycle]) -> String {
    if cycles.is_empty() {
        return "No cycle data available for analysis.".to_string();
    }

    let mut table = String::from(
        "| Cycle | Start | End | Duration | Dig | Swing to Dump | Dump | Return | Status | Notes |\n\
         |-------|-------|-----|----------|-----|---------------|------|--------|--------|-------|\n",
    );
    for cycle in cycles {
        table.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
            cycle.number,
            format_mmss(cycle.start),
            format_mmss(cycle.end),
            format_secs(cycle.duration),
            format_secs(cycle.phases.dig),
            format_secs(cycle.phases.swing_to_dump),
            format_secs(cycle.phases.dump),
            format_secs(cycle.phases.return_to_dig),
            cycle.completeness.as_str(),
            cycle.note.as_deref().unwrap_or("-"),
        ));
    }
    table
}

fn statistics_block(stats: &CycleStatistics) -> String {
    if stats.count == 0 {
        return "No cycles were detected in this video.".to_string();
    }
    format!(
        "- **Total Cycles**: {}\n\
         - **Approximate Average Cycle Time**: {:.2} seconds (includes idle time)\n\
         - **Specific Average Cycle Time**: {:.2} seconds (work time only)\n\
         - **Idle Time per Cycle**: {:.2} seconds ({:.1}% of total time)\n\
         - **Minimum Cycle Time**: {:.1} seconds\n\
         - **Maximum Cycle Time**: {:.1} seconds\n\
         - **Standard Deviation**: {:.2} seconds\n\
         - **Consistency**: {} (based on coefficient of variation)\n\
         - **Efficiency**: {} (based on idle time percentage)",
        stats.count,
        stats.approximate_average,
        stats.specific_average,
        stats.idle_per_cycle,
        stats.idle_percentage(),
        stats.min_duration,
        stats.max_duration,
        stats.std_deviation,
        stats.consistency_label(),
        stats.efficiency_label(),
    )
}

fn telemetry_block(telemetry: &TelemetryRecord) -> String {
    if !telemetry.found {
        return String::new();
    }
    let mut block = format!(
        "## Simulator Telemetry\n\n\
         - **Fuel Burned**: {:.2} L\n\
         - **Time Spent Swinging Left**: {:.0} s\n\
         - **Time Spent Swinging Right**: {:.0} s\n",
        telemetry.fuel_burned_litres,
        telemetry.time_swinging_left_secs,
        telemetry.time_swinging_right_secs,
    );
    if let Some(productivity) = telemetry.productivity_m3_per_hr {
        block.push_str(&format!("- **Productivity**: {productivity:.2} m³/hr\n"));
    }
    block
}

fn joystick_block(joystick: &JoystickRecord) -> String {
    if !joystick.found {
        return String::new();
    }
    let usage = &joystick.control_usage;
    let mut block = format!(
        "## Joystick Analytics\n\n\
         - **BCS Score**: {:.3}\n\
         - **Control Usage**: single {:.1}%, dual {:.1}%, triple {:.1}%, full {:.1}%\n",
        joystick.bcs_score,
        usage.single_control,
        usage.dual_control,
        usage.triple_control,
        usage.full_control,
    );
    if !joystick.si_matrix.is_empty() {
        block.push_str(
            "\n| Control | Swing | Arm | Bucket |\n\
             |---------|-------|-----|--------|\n",
        );
        for row in &joystick.si_matrix {
            block.push_str(&format!(
                "| {} | {:.3} | {:.3} | {:.3} |\n",
                row.control, row.swing, row.arm, row.bucket,
            ));
        }
    }
    block
}

fn notes_block(note: Option<&str>) -> String {
    match note {
        Some(note) => format!("\n> {note}\n"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Completeness, PhaseDurations};

    fn sample_cycles() -> Vec<Cycle> {
        (0..3)
            .map(|i| {
                let start = i as f64 * 45.0 + 1.0;
                Cycle {
                    number: i + 1,
                    start,
                    end: start + 30.0,
                    duration: 30.0,
                    phases: PhaseDurations {
                        dig: 8.0,
                        swing_to_dump: 10.0,
                        dump: 4.0,
                        return_to_dig: 8.0,
                    },
                    completeness: Completeness::Complete,
                    note: Some("normal cycle".into()),
                }
            })
            .collect()
    }

    fn sample_stats() -> CycleStatistics {
        CycleStatistics {
            count: 3,
            specific_average: 30.0,
            approximate_average: 40.0,
            idle_per_cycle: 10.0,
            min_duration: 30.0,
            max_duration: 30.0,
            std_deviation: 0.0,
        }
    }

    const TEMPLATE: &str = "# Report for {{source_id}} ({{date}})\n\n{{cycle_table}}\n{{statistics}}\n{{telemetry}}{{joystick}}{{notes}}";

    #[test]
    fn mmss_rounds_to_the_nearest_second() {
        assert_eq!(format_mmss(0.0), "00:00");
        assert_eq!(format_mmss(7.4), "00:07");
        assert_eq!(format_mmss(7.5), "00:08");
        assert_eq!(format_mmss(61.0), "01:01");
        assert_eq!(format_mmss(600.0), "10:00");
        assert_eq!(format_mmss(3661.0), "61:01");
    }

    #[test]
    fn rendering_twice_is_byte_identical() {
        let cycles = sample_cycles();
        let stats = sample_stats();
        let telemetry = TelemetryRecord {
            found: true,
            fuel_burned_litres: 1.41,
            time_swinging_left_secs: 44.0,
            time_swinging_right_secs: 43.0,
            productivity_m3_per_hr: None,
        };
        let input = ReportInput {
            source_id: "B6",
            generated_on: "2025-06-01",
            cycles: &cycles,
            statistics: &stats,
            telemetry: &telemetry,
            joystick: &JoystickRecord::not_found(),
            extra_note: None,
        };
        let first = render(TEMPLATE, &input).unwrap();
        let second = render(TEMPLATE, &input).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert!(first.contains("| 1 | 00:01 | 00:31 | 30.0s |"));
        assert!(first.contains("**Fuel Burned**: 1.41 L"));
        assert!(first.contains("**Time Spent Swinging Left**: 44 s"));
    }

    #[test]
    fn missing_telemetry_renders_no_block() {
        let cycles = sample_cycles();
        let stats = sample_stats();
        let telemetry = TelemetryRecord::not_found();
        let input = ReportInput {
            source_id: "B6",
            generated_on: "2025-06-01",
            cycles: &cycles,
            statistics: &stats,
            telemetry: &telemetry,
            joystick: &JoystickRecord::not_found(),
            extra_note: None,
        };
        let rendered = render(TEMPLATE, &input).unwrap();
        assert!(!rendered.contains("Simulator Telemetry"));
    }

    #[test]
    fn empty_run_renders_the_no_data_lines() {
        let stats = CycleStatistics::default();
        let telemetry = TelemetryRecord::not_found();
        let input = ReportInput {
            source_id: "empty",
            generated_on: "2025-06-01",
            cycles: &[],
            statistics: &stats,
            telemetry: &telemetry,
            joystick: &JoystickRecord::not_found(),
            extra_note: None,
        };
        let rendered = render(TEMPLATE, &input).unwrap();
        assert!(rendered.contains("No cycle data available"));
        assert!(rendered.contains("No cycles were detected"));
    }

    #[test]
    fn unresolved_placeholders_are_an_error() {
        let input = ReportInput {
            source_id: "B6",
            generated_on: "2025-06-01",
            cycles: &[],
            statistics: &CycleStatistics::default(),
            telemetry: &TelemetryRecord::not_found(),
            joystick: &JoystickRecord::not_found(),
            extra_note: None,
        };
        let err = render("{{cycle_table}} {{mystery_block}}", &input).unwrap_err();
        assert!(err.contains("mystery_block"));
    }

    #[test]
    fn joystick_block_renders_scores_and_matrix() {
        use crate::pipeline::types::{ControlUsage, SiRow};
        let joystick = JoystickRecord {
            found: true,
            bcs_score: 0.872,
            si_matrix: vec![SiRow {
                control: "Boom".into(),
                swing: 0.123,
                arm: 0.04,
                bucket: 0.0,
            }],
            control_usage: ControlUsage {
                single_control: 100.0,
                dual_control: 12.5,
                triple_control: 3.2,
                full_control: 0.4,
            },
        };
        let input = ReportInput {
            source_id: "B6",
            generated_on: "2025-06-01",
            cycles: &[],
            statistics: &CycleStatistics::default(),
            telemetry: &TelemetryRecord::not_found(),
            joystick: &joystick,
            extra_note: None,
        };
        let rendered = render(TEMPLATE, &input).unwrap();
        assert!(rendered.contains("**BCS Score**: 0.872"));
        assert!(rendered.contains("single 100.0%, dual 12.5%, triple 3.2%, full 0.4%"));
        assert!(rendered.contains("| Boom | 0.123 | 0.040 | 0.000 |"));

        // Absent statistics render no joystick block at all.
        let empty_input = ReportInput {
            source_id: "B6",
            generated_on: "2025-06-01",
            cycles: &[],
            statistics: &CycleStatistics::default(),
            telemetry: &TelemetryRecord::not_found(),
            joystick: &JoystickRecord::not_found(),
            extra_note: None,
        };
        let rendered = render(TEMPLATE, &empty_input).unwrap();
        assert!(!rendered.contains("Joystick Analytics"));
    }

    #[test]
    fn extra_note_is_appended_as_a_quote() {
        let input = ReportInput {
            source_id: "B6",
            generated_on: "2025-06-01",
            cycles: &[],
            statistics: &CycleStatistics::default(),
            telemetry: &TelemetryRecord::not_found(),
            joystick: &JoystickRecord::not_found(),
            extra_note: Some("narrative generation unavailable"),
        };
        let rendered = render(TEMPLATE, &input).unwrap();
        assert!(rendered.contains("> narrative generation unavailable"));
    }

    /// Parse the rendered cycle table back and recompute the statistics:
    /// they must agree with the report's statistics block within 0.1 s.
    #[test]
    fn table_round_trips_through_the_statistics_formulas() {
        let cycles = sample_cycles();
        let stats = sample_stats();
        let input = ReportInput {
            source_id: "B6",
            generated_on: "2025-06-01",
            cycles: &cycles,
            statistics: &stats,
            telemetry: &TelemetryRecord::not_found(),
            joystick: &JoystickRecord::not_found(),
            extra_note: None,
        };
        let rendered = render(TEMPLATE, &input).unwrap();

        let mut parsed: Vec<(f64, f64, f64)> = Vec::new();
        for line in rendered.lines() {
            let cells: Vec<&str> = line.split('|').map(str::trim).collect();
            if cells.len() < 6 || cells[1].parse::<usize>().is_err() {
                continue;
            }
            let mmss = |s: &str| -> f64 {
                let (m, sec) = s.split_once(':').unwrap();
                m.parse::<f64>().unwrap() * 60.0 + sec.parse::<f64>().unwrap()
            };
            let duration: f64 = cells[4].trim_end_matches('s').parse().unwrap();
            parsed.push((mmss(cells[2]), mmss(cells[3]), duration));
        }

        assert_eq!(parsed.len(), 3);
        let count = parsed.len() as f64;
        let specific: f64 = parsed.iter().map(|(_, _, d)| d).sum::<f64>() / count;
        let approximate = (parsed.last().unwrap().1 - parsed.first().unwrap().0) / count;
        assert!((specific - stats.specific_average).abs() < 0.1);
        assert!((approximate - stats.approximate_average).abs() < 0.1);
    }
}
