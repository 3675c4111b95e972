use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use crate::models::{
    MeasurementRecord, Metric, PercentageMetric, RecordStatus, Section, TimeMetric,
};

/// Calendar quarter (1-4) of a date.
pub fn quarter_of(date: NaiveDate) -> u32 {
    date.month0() / 3 + 1
}

pub fn quarter_start(year: i32, quarter: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, (quarter.clamp(1, 4) - 1) * 3 + 1, 1)
}

pub fn quarter_label(year: i32, quarter: u32) -> String {
    format!("{year}-Q{quarter}")
}

/// Folds monthly records into one synthetic record per calendar quarter.
///
/// Expects a series already narrowed to one section/KPI/department; the first
/// record seen in each quarter supplies the descriptive fields. Time and
/// percentage figures are averaged over the records that carry them.
pub fn aggregate_by_quarter(records: &[MeasurementRecord]) -> Vec<MeasurementRecord> {
    let mut grouped: BTreeMap<(i32, u32), Vec<&MeasurementRecord>> = BTreeMap::new();

    for record in records {
        grouped
            .entry((record.month.year(), quarter_of(record.month)))
            .or_default()
            .push(record);
    }

    grouped
        .into_iter()
        .filter_map(|((year, quarter), members)| fold_quarter(year, quarter, &members))
        .collect()
}

/// Splits a mixed series by section, KPI and department, then rolls each
/// part up with [`aggregate_by_quarter`]. Output is grouped by series and
/// sorted by quarter within each one.
pub fn aggregate_by_series(records: &[MeasurementRecord]) -> Vec<MeasurementRecord> {
    let mut series: BTreeMap<(Section, &str, &str), Vec<MeasurementRecord>> = BTreeMap::new();

    for record in records {
        series
            .entry((
                record.section,
                record.kpi_name.as_str(),
                record.department.as_str(),
            ))
            .or_default()
            .push(record.clone());
    }

    series
        .values()
        .flat_map(|members| aggregate_by_quarter(members))
        .collect()
}

fn fold_quarter(
    year: i32,
    quarter: u32,
    members: &[&MeasurementRecord],
) -> Option<MeasurementRecord> {
    let template = members.first()?;
    let month = quarter_start(year, quarter)?;
    let label = quarter_label(year, quarter);

    let census = members
        .iter()
        .fold(0u32, |total, record| total.saturating_add(record.census));

    let times: Vec<&TimeMetric> = members.iter().filter_map(|r| r.metric.time()).collect();
    let pcts: Vec<&PercentageMetric> = members
        .iter()
        .filter_map(|r| r.metric.percentage())
        .collect();

    let time = if times.is_empty() {
        None
    } else {
        Some(TimeMetric {
            target: mean(times.iter().map(|t| t.target)),
            actual: mean(times.iter().map(|t| t.actual)),
            unit: template.metric.time_unit(),
        })
    };
    let pct = PercentageMetric {
        target: Some(mean(pcts.iter().map(|p| p.target)).unwrap_or(0.0)),
        actual: Some(mean(pcts.iter().map(|p| p.actual)).unwrap_or(0.0)),
    };

    let metric = match time {
        Some(time) => Metric::Dual {
            primary: template.kind(),
            time,
            pct,
        },
        None => Metric::Percentage(pct),
    };

    let department = if template.department.is_empty() {
        "na"
    } else {
        template.department.as_str()
    };

    Some(MeasurementRecord {
        id: format!(
            "agg-{label}-{}-{}-{department}",
            template.section.label(),
            template.kpi_name
        ),
        section: template.section,
        kpi_name: template.kpi_name.clone(),
        department: template.department.clone(),
        metric,
        month,
        census,
        due_date: template.due_date,
        date_submitted: template.date_submitted,
        remarks: Some(format!("Aggregated for {label}")),
        status: RecordStatus::Approved,
    })
}

fn mean(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .flatten()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));

    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
