use crate::models::{MeasurementKind, MeasurementRecord};

/// Percentage KPIs where a smaller figure means better performance.
pub const LOWER_IS_BETTER_PCT_KPIS: [&str; 3] = ["reattendance rate", "overstaying", "overboarding"];

pub fn is_lower_better(record: &MeasurementRecord) -> bool {
    match record.kind() {
        MeasurementKind::Time => true,
        MeasurementKind::Percentage => {
            let name = record.kpi_name.trim().to_lowercase();
            LOWER_IS_BETTER_PCT_KPIS.contains(&name.as_str())
        }
    }
}

/// Judges a record against its target. A missing actual on a lower-is-better
/// KPI always fails; a higher-is-better record with no figures at all passes
/// against its implicit zero target.
pub fn is_conformant(record: &MeasurementRecord) -> bool {
    let time = record.metric.time();
    let pct = record.metric.percentage();

    if is_lower_better(record) {
        let (actual, target) = match record.kind() {
            MeasurementKind::Time => (
                time.and_then(|t| t.actual),
                time.and_then(|t| t.target),
            ),
            MeasurementKind::Percentage => (
                pct.and_then(|p| p.actual),
                pct.and_then(|p| p.target),
            ),
        };
        return actual.unwrap_or(f64::INFINITY) <= target.unwrap_or(0.0);
    }

    if !has_reported_value(record) {
        tracing::debug!(
            id = %record.id,
            kpi = %record.kpi_name,
            "record has no reported percentage; treated as meeting a zero target"
        );
    }

    let actual = pct.and_then(|p| p.actual).unwrap_or(0.0);
    let target = pct.and_then(|p| p.target).unwrap_or(0.0);
    actual >= target
}

/// Whether the record carries an actual figure for the metric it is judged on.
pub fn has_reported_value(record: &MeasurementRecord) -> bool {
    actual_value(record).is_some()
}

/// Actual figure for the record's primary kind.
pub fn actual_value(record: &MeasurementRecord) -> Option<f64> {
    match record.kind() {
        MeasurementKind::Time => record.metric.time().and_then(|t| t.actual),
        MeasurementKind::Percentage => record.metric.percentage().and_then(|p| p.actual),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::models::{Metric, PercentageMetric, RecordStatus, Section, TimeMetric, TimeUnit};

    pub(crate) fn pct_record(kpi: &str, target: f64, actual: f64) -> MeasurementRecord {
        MeasurementRecord {
            id: format!("rec-{kpi}-{actual}"),
            section: Section::Lab,
            kpi_name: kpi.to_string(),
            department: "Overall".to_string(),
            metric: Metric::Percentage(PercentageMetric {
                target: Some(target),
                actual: Some(actual),
            }),
            month: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            census: 100,
            due_date: None,
            date_submitted: None,
            remarks: None,
            status: RecordStatus::Approved,
        }
    }

    pub(crate) fn time_record(target: Option<f64>, actual: Option<f64>) -> MeasurementRecord {
        MeasurementRecord {
            metric: Metric::Time(TimeMetric {
                target,
                actual,
                unit: Some(TimeUnit::Minutes),
            }),
            ..pct_record("Triage Response Time", 0.0, 0.0)
        }
    }

    #[test]
    fn higher_percentage_passes_target() {
        let record = pct_record("Patient Satisfaction", 90.0, 95.0);
        assert!(!is_lower_better(&record));
        assert!(is_conformant(&record));
    }

    #[test]
    fn reattendance_rate_is_lower_better() {
        let record = pct_record("Reattendance Rate", 5.0, 8.0);
        assert!(is_lower_better(&record));
        assert!(!is_conformant(&record));

        let record = pct_record("  OVERBOARDING ", 5.0, 4.0);
        assert!(is_lower_better(&record));
        assert!(is_conformant(&record));
    }

    #[test]
    fn time_records_are_always_lower_better() {
        assert!(is_lower_better(&time_record(Some(30.0), Some(10.0))));
        assert!(is_conformant(&time_record(Some(30.0), Some(30.0))));
        assert!(!is_conformant(&time_record(Some(30.0), Some(31.0))));
    }

    #[test]
    fn missing_time_actual_fails() {
        assert!(!is_conformant(&time_record(Some(30.0), None)));
    }

    #[test]
    fn lower_better_percentage_without_actual_fails() {
        let mut record = pct_record("Overstaying", 10.0, 0.0);
        record.metric = Metric::Percentage(PercentageMetric {
            target: Some(10.0),
            actual: None,
        });
        assert!(is_lower_better(&record));
        assert!(!is_conformant(&record));
    }

    #[test]
    fn missing_time_target_compares_against_zero() {
        assert!(!is_conformant(&time_record(None, Some(5.0))));
        assert!(is_conformant(&time_record(None, Some(0.0))));
    }

    #[test]
    fn empty_percentage_record_passes_zero_target() {
        let mut record = pct_record("Patient Satisfaction", 0.0, 0.0);
        record.metric = Metric::Percentage(PercentageMetric::default());
        assert!(!has_reported_value(&record));
        assert!(is_conformant(&record));
    }

    #[test]
    fn dual_record_is_judged_on_its_primary_kind() {
        let mut record = pct_record("Admission", 90.0, 95.0);
        record.metric = Metric::Dual {
            primary: MeasurementKind::Time,
            time: TimeMetric {
                target: Some(30.0),
                actual: Some(45.0),
                unit: Some(TimeUnit::Minutes),
            },
            pct: PercentageMetric {
                target: Some(90.0),
                actual: Some(95.0),
            },
        };
        assert!(is_lower_better(&record));
        assert!(!is_conformant(&record));
    }

    #[test]
    fn raising_actual_never_breaks_conformance() {
        let mut previous = false;
        for step in 0..=40 {
            let actual = 70.0 + step as f64;
            let current = is_conformant(&pct_record("Patient Satisfaction", 90.0, actual));
            assert!(current || !previous, "conformance dropped at {actual}");
            previous = current;
        }
        assert!(previous);
    }
}
