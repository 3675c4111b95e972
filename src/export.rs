use std::io::Write;

use chrono::Datelike;

use crate::aggregate::{quarter_label, quarter_of};
use crate::models::{MeasurementKind, MeasurementRecord, TimeUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Monthly,
    Quarterly,
}

fn measure_label(record: &MeasurementRecord) -> &'static str {
    match (record.kind(), record.metric.time_unit()) {
        (MeasurementKind::Percentage, _) => "-",
        (MeasurementKind::Time, Some(TimeUnit::Days)) => "Day",
        (MeasurementKind::Time, _) => "Time",
    }
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Writes a monthly or quarterly record table as CSV.
pub fn write_records_csv<W: Write>(
    writer: W,
    records: &[MeasurementRecord],
    period: Period,
) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record([
        "Section",
        "KPI",
        "Department",
        "Type",
        "Period",
        "Census",
        "Target Time",
        "Actual Time",
        "Target %",
        "Actual %",
        "Submitted",
        "Due Date",
    ])?;

    for record in records {
        let period_label = match period {
            Period::Monthly => record.month.to_string(),
            Period::Quarterly => quarter_label(record.month.year(), quarter_of(record.month)),
        };
        let time = record.metric.time();
        let pct = record.metric.percentage();

        csv.write_record([
            record.section.label().to_string(),
            record.kpi_name.clone(),
            record.department.clone(),
            measure_label(record).to_string(),
            period_label,
            record.census.to_string(),
            cell(time.and_then(|t| t.target)),
            cell(time.and_then(|t| t.actual)),
            cell(pct.and_then(|p| p.target)),
            cell(pct.and_then(|p| p.actual)),
            record
                .date_submitted
                .map(|d| d.to_string())
                .unwrap_or_default(),
            record.due_date.map(|d| d.to_string()).unwrap_or_default(),
        ])?;
    }

    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::aggregate::aggregate_by_quarter;
    use crate::conformance::tests::{pct_record, time_record};
    use crate::models::{Metric, TimeMetric};

    fn export(records: &[MeasurementRecord], period: Period) -> Vec<String> {
        let mut buffer = Vec::new();
        write_records_csv(&mut buffer, records, period).unwrap();
        String::from_utf8(buffer)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn monthly_rows_carry_the_reporting_month() {
        let mut record = pct_record("Timeliness", 90.0, 95.5);
        record.due_date = NaiveDate::from_ymd_opt(2024, 2, 5);
        record.date_submitted = NaiveDate::from_ymd_opt(2024, 2, 3);

        let lines = export(&[record], Period::Monthly);
        assert_eq!(
            lines[0],
            "Section,KPI,Department,Type,Period,Census,Target Time,Actual Time,Target %,Actual %,Submitted,Due Date"
        );
        assert_eq!(
            lines[1],
            "Laboratory,Timeliness,Overall,-,2024-01-01,100,,,90,95.5,2024-02-03,2024-02-05"
        );
    }

    #[test]
    fn quarterly_rows_use_quarter_labels() {
        let mut record = time_record(Some(30.0), Some(20.0));
        record.month = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        record.metric = Metric::Time(TimeMetric {
            unit: Some(TimeUnit::Days),
            ..*record.metric.time().unwrap()
        });

        let lines = export(&aggregate_by_quarter(&[record]), Period::Quarterly);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("Laboratory,Triage Response Time,Overall,Day,2024-Q2,100,30,20,0,0,"));
    }
}
