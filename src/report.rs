use std::fmt::Write;

use chrono::{Datelike, NaiveDate};

use crate::aggregate::{aggregate_by_series, quarter_label, quarter_of};
use crate::conformance::is_conformant;
use crate::lateness::{days_late, late_submissions};
use crate::models::{approved_only, MeasurementKind, MeasurementRecord, PerformanceTier};
use crate::narrative::summarize;
use crate::performance::{classify_all_rolling, classify_range, failure_streak, kpi_breakdown};

const TIER_ORDER: [PerformanceTier; 5] = [
    PerformanceTier::TopPerformer,
    PerformanceTier::Stable,
    PerformanceTier::NeedsImprovement,
    PerformanceTier::Critical,
    PerformanceTier::Undefined,
];

fn headline_value(record: &MeasurementRecord) -> String {
    match record.kind() {
        MeasurementKind::Time => {
            let time = record.metric.time();
            let unit = record
                .metric
                .time_unit()
                .map(|u| format!(" {u}"))
                .unwrap_or_default();
            format!(
                "{:.2}{unit} (target {:.2}{unit})",
                time.and_then(|t| t.actual).unwrap_or(0.0),
                time.and_then(|t| t.target).unwrap_or(0.0)
            )
        }
        MeasurementKind::Percentage => {
            let pct = record.metric.percentage();
            format!(
                "{:.2}% (target {:.2}%)",
                pct.and_then(|p| p.actual).unwrap_or(0.0),
                pct.and_then(|p| p.target).unwrap_or(0.0)
            )
        }
    }
}

/// Markdown report for a scope. `records` should already be narrowed to the
/// scope; drafts are dropped here before any conformance figure is computed.
pub fn build_report(
    scope: Option<&str>,
    today: NaiveDate,
    from: NaiveDate,
    to: NaiveDate,
    records: &[MeasurementRecord],
) -> String {
    let approved = approved_only(records);
    let in_range: Vec<MeasurementRecord> = approved
        .iter()
        .filter(|record| record.month >= from && record.month <= to)
        .cloned()
        .collect();

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all sections");

    let _ = writeln!(output, "# KPI Conformance Report");
    let _ = writeln!(
        output,
        "Generated for {} on {} (records from {} to {})",
        scope_label, today, from, to
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Section Health (rolling 3/6/9 months)");
    let health = classify_all_rolling(&approved, today);
    for tier in TIER_ORDER {
        let sections: Vec<String> = health
            .iter()
            .filter(|perf| perf.tier == tier && perf.tier != PerformanceTier::Undefined)
            .map(|perf| match perf.last_failure {
                Some(last) if perf.failure_count_3mo > 0 => format!(
                    "{} ({} in 3 months, last {})",
                    perf.section,
                    perf.failure_count_3mo,
                    last.format("%b %Y")
                ),
                _ => perf.section.to_string(),
            })
            .collect();
        if !sections.is_empty() {
            let _ = writeln!(output, "- {}: {}", tier, sections.join("; "));
        }
    }
    if health.iter().all(|perf| perf.tier == PerformanceTier::Undefined) {
        let _ = writeln!(output, "No approved records yet.");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Leaderboard ({} to {})", from, to);
    let mut standings: Vec<_> = classify_range(&approved, from, to)
        .into_iter()
        .filter(|perf| perf.tier != PerformanceTier::Undefined)
        .collect();
    standings.sort_by(|a, b| {
        a.failure_count
            .cmp(&b.failure_count)
            .then_with(|| b.record_count.cmp(&a.record_count))
    });

    if standings.is_empty() {
        let _ = writeln!(output, "No records in this range.");
    } else {
        for perf in standings.iter() {
            let _ = writeln!(
                output,
                "- {} [{}]: {} non-conformances across {} records",
                perf.section, perf.tier, perf.failure_count, perf.record_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## KPI Conformance");
    let breakdown = kpi_breakdown(&in_range);
    if breakdown.is_empty() {
        let _ = writeln!(output, "No records in this range.");
    } else {
        for kpi in breakdown.iter() {
            let _ = writeln!(
                output,
                "- {}: {:.1}% conformant ({}/{})",
                kpi.kpi_name, kpi.rate, kpi.conformant, kpi.total
            );
        }
        let streak = failure_streak(&in_range);
        if streak > 0 {
            let _ = writeln!(
                output,
                "- Current failure streak: {} consecutive records",
                streak
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Analysis");
    let kpi_label = match breakdown.as_slice() {
        [only] => only.kpi_name.as_str(),
        _ => "General Operational KPI",
    };
    let _ = writeln!(output, "{}", summarize(&in_range, scope_label, kpi_label));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Quarterly Roll-up");
    let quarters = aggregate_by_series(&in_range);
    if quarters.is_empty() {
        let _ = writeln!(output, "No records in this range.");
    }
    for quarter in quarters.iter() {
        let _ = writeln!(
            output,
            "- {} / {} / {} {}: {} census {} [{}]",
            quarter.section,
            quarter.kpi_name,
            quarter.department,
            quarter_label(quarter.month.year(), quarter_of(quarter.month)),
            headline_value(quarter),
            quarter.census,
            if is_conformant(quarter) { "pass" } else { "fail" }
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Late Submissions");
    let late = late_submissions(&approved, from, to);
    if late.is_empty() {
        let _ = writeln!(output, "All submissions in this range were on time.");
    } else {
        for record in late.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} / {} ({}): {} days late",
                record.section,
                record.kpi_name,
                record.month.format("%b %Y"),
                days_late(record)
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::tests::pct_record;
    use crate::models::{RecordStatus, Section};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn monthly(section: Section, m: u32, actual: f64) -> MeasurementRecord {
        let mut record = pct_record("Timeliness", 90.0, actual);
        record.id = format!("{}-{m}", section.code());
        record.section = section;
        record.month = date(2024, m, 1);
        record.due_date = Some(date(2024, m + 1, 5));
        record.date_submitted = Some(date(2024, m + 1, 5));
        record
    }

    #[test]
    fn report_covers_every_heading() {
        let mut late = monthly(Section::Lab, 3, 80.0);
        late.date_submitted = Some(date(2024, 4, 12));
        let records = vec![
            monthly(Section::Lab, 1, 95.0),
            monthly(Section::Lab, 2, 92.0),
            late,
        ];

        let report = build_report(
            Some("Laboratory"),
            date(2024, 4, 20),
            date(2024, 1, 1),
            date(2024, 12, 31),
            &records,
        );

        assert!(report.contains("# KPI Conformance Report"));
        assert!(report.contains("## Section Health"));
        assert!(report.contains("- Needs Improvement: Laboratory (1 in 3 months, last Mar 2024)"));
        assert!(report.contains("- Laboratory [Needs Improvement]: 1 non-conformances across 3 records"));
        assert!(report.contains("- Timeliness: 66.7% conformant (2/3)"));
        assert!(report.contains("66.67% conformance rate"));
        assert!(report.contains(
            "- Laboratory / Timeliness / Overall 2024-Q1: 89.00% (target 90.00%) census 300 [fail]"
        ));
        assert!(report.contains("- Laboratory / Timeliness (Mar 2024): 7 days late"));
    }

    #[test]
    fn drafts_do_not_reach_conformance_sections() {
        let mut draft = monthly(Section::Er, 2, 10.0);
        draft.status = RecordStatus::Draft;

        let report = build_report(
            None,
            date(2024, 4, 20),
            date(2024, 1, 1),
            date(2024, 12, 31),
            &[draft],
        );
        assert!(report.contains("No approved records yet."));
        assert!(report.contains(crate::narrative::NO_DATA_MESSAGE));
    }

    #[test]
    fn late_drafts_stay_out_of_the_report() {
        let mut draft = monthly(Section::Lab, 1, 95.0);
        draft.date_submitted = Some(date(2024, 2, 20));
        draft.status = RecordStatus::Draft;

        let report = build_report(
            None,
            date(2024, 4, 20),
            date(2024, 1, 1),
            date(2024, 12, 31),
            &[draft],
        );
        assert!(report.contains("All submissions in this range were on time."));
        assert!(!report.contains("days late"));
    }

    #[test]
    fn quarterly_roll_up_keeps_sections_apart() {
        let mut lab = monthly(Section::Lab, 1, 100.0);
        lab.census = 10;
        let mut radiology = monthly(Section::Radiology, 1, 50.0);
        radiology.census = 1000;

        let report = build_report(
            None,
            date(2024, 4, 20),
            date(2024, 1, 1),
            date(2024, 12, 31),
            &[lab, radiology],
        );
        assert!(report.contains(
            "- Laboratory / Timeliness / Overall 2024-Q1: 100.00% (target 90.00%) census 10 [pass]"
        ));
        assert!(report.contains(
            "- Radiology / Timeliness / Overall 2024-Q1: 50.00% (target 90.00%) census 1000 [fail]"
        ));
        assert!(!report.contains("census 1010"));
    }
}
