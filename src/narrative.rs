use std::collections::HashSet;

use chrono::NaiveDate;

use crate::conformance::{is_conformant, is_lower_better};
use crate::models::{MeasurementKind, MeasurementRecord};

pub const NO_DATA_MESSAGE: &str = "No data available for analysis in the selected range.";

pub const MIXED_UNITS_MESSAGE: &str = "Specific averages are not calculated because the selected records contain mixed measurement units (e.g., Time vs. Percentage). Please filter by a specific KPI to see detailed averages.";

const TREND_EPSILON: f64 = 0.01;

fn month_label(date: NaiveDate) -> String {
    date.format("%b %Y").to_string()
}

/// Plain-language summary of a filtered series: conformance rate, value
/// range, best and worst months, and direction of travel.
pub fn summarize(records: &[MeasurementRecord], section_label: &str, kpi_label: &str) -> String {
    if records.is_empty() {
        return NO_DATA_MESSAGE.to_string();
    }

    let mut sorted: Vec<&MeasurementRecord> = records.iter().collect();
    sorted.sort_by_key(|record| record.month);

    let total = sorted.len();
    let first = sorted[0];
    let latest = sorted[total - 1];

    let passed = sorted.iter().filter(|record| is_conformant(record)).count();
    let success_rate = passed as f64 / total as f64 * 100.0;

    let mut parts = vec![format!(
        "Based on the {total} records displayed for {kpi_label} in {section_label} from {} to {}, the section achieved a {success_rate:.2}% conformance rate against targets.",
        month_label(first.month),
        month_label(latest.month),
    )];

    let kinds: HashSet<MeasurementKind> = sorted.iter().map(|record| record.kind()).collect();
    let time_units: HashSet<_> = sorted
        .iter()
        .filter(|record| record.kind() == MeasurementKind::Time)
        .map(|record| record.metric.time_unit())
        .collect();

    if kinds.len() > 1 || time_units.len() > 1 {
        parts.push(MIXED_UNITS_MESSAGE.to_string());
        return parts.join(" ");
    }

    let is_time = kinds.contains(&MeasurementKind::Time);
    let unit_display = if is_time {
        format!(
            " {}",
            latest
                .metric
                .time_unit()
                .map(|unit| unit.as_str())
                .unwrap_or_default()
        )
    } else {
        "%".to_string()
    };

    let value_of = |record: &MeasurementRecord| -> Option<f64> {
        if is_time {
            record.metric.time().and_then(|time| time.actual)
        } else {
            record.metric.percentage().and_then(|pct| pct.actual)
        }
    };

    let values: Vec<(usize, f64)> = sorted
        .iter()
        .enumerate()
        .filter_map(|(index, record)| value_of(*record).map(|value| (index, value)))
        .collect();

    if values.is_empty() {
        return parts.join(" ");
    }

    let sum: f64 = values.iter().map(|(_, value)| value).sum();
    let average = sum / values.len() as f64;
    let min = values.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
    let max = values.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);

    parts.push(format!(
        "The data shows an average performance of {average:.2}{unit_display}, ranging from a low of {min:.2}{unit_display} to a high of {max:.2}{unit_display}."
    ));

    let lower_better = is_lower_better(latest);

    if values.len() > 1 {
        let (mut best, mut worst) = (values[0], values[0]);
        for &(index, value) in &values[1..] {
            let (better, poorer) = if lower_better {
                (value < best.1, value > worst.1)
            } else {
                (value > best.1, value < worst.1)
            };
            if better {
                best = (index, value);
            }
            if poorer {
                worst = (index, value);
            }
        }

        if best.0 != worst.0 {
            let best_month = month_label(sorted[best.0].month);
            let worst_month = month_label(sorted[worst.0].month);
            let sentence = if lower_better {
                format!(
                    "The best performance (lowest value) occurred in {best_month} ({:.2}{unit_display}), while the worst was in {worst_month} ({:.2}{unit_display}).",
                    best.1, worst.1
                )
            } else {
                format!(
                    "The highest performance occurred in {best_month} ({:.2}{unit_display}), while the lowest was in {worst_month} ({:.2}{unit_display}).",
                    best.1, worst.1
                )
            };
            parts.push(sentence);
        }

        let start = value_of(first).unwrap_or(0.0);
        let end = value_of(latest).unwrap_or(0.0);
        let diff = end - start;

        if diff.abs() > TREND_EPSILON {
            let direction = match (lower_better, diff < 0.0) {
                (true, true) => "improving (value decreasing)",
                (true, false) => "declining (value increasing)",
                (false, false) => "improving (value increasing)",
                (false, true) => "declining (value decreasing)",
            };
            parts.push(format!(
                "Comparing the start and end of this period, the trend is {direction}."
            ));
        }
    }

    parts.join(" ")
}
