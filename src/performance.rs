use std::collections::HashMap;

use chrono::{Datelike, Months, NaiveDate, Utc};

use crate::conformance::is_conformant;
use crate::models::{
    KpiConformance, MeasurementRecord, PerformanceTier, RangePerformance, Section,
    SectionPerformance,
};

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// First day of the month `months_back` months before `today`'s month.
pub fn window_start(today: NaiveDate, months_back: u32) -> NaiveDate {
    let month_start = today.with_day(1).unwrap_or(today);
    month_start
        .checked_sub_months(Months::new(months_back))
        .unwrap_or(NaiveDate::MIN)
}

/// Longitudinal health of a section from non-conformances in the trailing
/// 3, 6 and 9 months. Drafts are ignored.
pub fn classify_rolling(
    section: Section,
    records: &[MeasurementRecord],
    today: NaiveDate,
) -> SectionPerformance {
    let mut section_records: Vec<&MeasurementRecord> = records
        .iter()
        .filter(|record| record.is_approved() && record.section == section)
        .collect();

    if section_records.is_empty() {
        return SectionPerformance {
            section,
            tier: PerformanceTier::Undefined,
            failure_count_3mo: 0,
            last_failure: None,
        };
    }

    section_records.sort_by(|a, b| b.month.cmp(&a.month));

    let three_months_ago = window_start(today, 3);
    let six_months_ago = window_start(today, 6);
    let nine_months_ago = window_start(today, 9);

    let mut failures_3mo = 0;
    let mut failures_6mo = 0;
    let mut failures_9mo = 0;
    let mut last_failure = None;

    for record in section_records {
        if is_conformant(record) {
            continue;
        }

        last_failure.get_or_insert(record.month);
        if record.month >= three_months_ago {
            failures_3mo += 1;
        }
        if record.month >= six_months_ago {
            failures_6mo += 1;
        }
        if record.month >= nine_months_ago {
            failures_9mo += 1;
        }
    }

    SectionPerformance {
        section,
        tier: rolling_tier(failures_3mo, failures_6mo, failures_9mo),
        failure_count_3mo: failures_3mo,
        last_failure,
    }
}

pub fn rolling_tier(failures_3mo: usize, failures_6mo: usize, failures_9mo: usize) -> PerformanceTier {
    match (failures_3mo, failures_6mo, failures_9mo) {
        (f3, _, _) if f3 >= 2 => PerformanceTier::Critical,
        (1, _, _) => PerformanceTier::NeedsImprovement,
        (0, 0, 0) => PerformanceTier::TopPerformer,
        _ => PerformanceTier::Stable,
    }
}

pub fn classify_all_rolling(
    records: &[MeasurementRecord],
    today: NaiveDate,
) -> Vec<SectionPerformance> {
    Section::ALL
        .into_iter()
        .map(|section| classify_rolling(section, records, today))
        .collect()
}

/// Ad hoc comparison of every section over `[from, to]` by month. Has no
/// stable tier: any failure drops a section out of the top bucket.
pub fn classify_range(
    records: &[MeasurementRecord],
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<RangePerformance> {
    let mut counts: HashMap<Section, (usize, usize)> = HashMap::new();

    for record in records {
        if !record.is_approved() || record.month < from || record.month > to {
            continue;
        }
        let entry = counts.entry(record.section).or_insert((0, 0));
        entry.0 += 1;
        if !is_conformant(record) {
            entry.1 += 1;
        }
    }

    Section::ALL
        .into_iter()
        .map(|section| {
            let (record_count, failure_count) = counts.get(&section).copied().unwrap_or((0, 0));
            RangePerformance {
                section,
                tier: range_tier(record_count, failure_count),
                failure_count,
                record_count,
            }
        })
        .collect()
}

pub fn range_tier(record_count: usize, failure_count: usize) -> PerformanceTier {
    match (record_count, failure_count) {
        (0, _) => PerformanceTier::Undefined,
        (_, 0) => PerformanceTier::TopPerformer,
        (_, 1) => PerformanceTier::NeedsImprovement,
        _ => PerformanceTier::Critical,
    }
}

/// Conformance rate per KPI name, best first.
pub fn kpi_breakdown(records: &[MeasurementRecord]) -> Vec<KpiConformance> {
    let mut groups: HashMap<&str, (usize, usize)> = HashMap::new();

    for record in records {
        let entry = groups.entry(record.kpi_name.as_str()).or_insert((0, 0));
        entry.0 += 1;
        if is_conformant(record) {
            entry.1 += 1;
        }
    }

    let mut breakdown: Vec<KpiConformance> = groups
        .into_iter()
        .map(|(kpi_name, (total, conformant))| KpiConformance {
            kpi_name: kpi_name.to_string(),
            total,
            conformant,
            rate: conformant as f64 / total as f64 * 100.0,
        })
        .collect();

    breakdown.sort_by(|a, b| {
        b.rate
            .partial_cmp(&a.rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.kpi_name.cmp(&b.kpi_name))
    });
    breakdown
}

/// Consecutive non-conformant records ending at the most recent month.
pub fn failure_streak(records: &[MeasurementRecord]) -> usize {
    let mut sorted: Vec<&MeasurementRecord> = records.iter().collect();
    sorted.sort_by(|a, b| b.month.cmp(&a.month));
    sorted
        .into_iter()
        .take_while(|record| !is_conformant(record))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::tests::pct_record;
    use crate::models::RecordStatus;

    fn today_fixed() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 17).unwrap()
    }

    fn record(section: Section, month: (i32, u32), passing: bool) -> MeasurementRecord {
        let actual = if passing { 95.0 } else { 70.0 };
        let mut record = pct_record("Patient Satisfaction", 90.0, actual);
        record.section = section;
        record.month = NaiveDate::from_ymd_opt(month.0, month.1, 1).unwrap();
        record
    }

    #[test]
    fn window_starts_at_first_of_month() {
        assert_eq!(
            window_start(today_fixed(), 3),
            NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
        );
        assert_eq!(
            window_start(today_fixed(), 9),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert_eq!(
            window_start(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(), 6),
            NaiveDate::from_ymd_opt(2023, 8, 1).unwrap()
        );
    }

    #[test]
    fn two_recent_failures_are_critical() {
        let records = vec![
            record(Section::Lab, (2024, 8), false),
            record(Section::Lab, (2024, 9), true),
            record(Section::Lab, (2024, 10), false),
            record(Section::Lab, (2024, 7), true),
        ];
        let perf = classify_rolling(Section::Lab, &records, today_fixed());
        assert_eq!(perf.tier, PerformanceTier::Critical);
        assert_eq!(perf.failure_count_3mo, 2);
        assert_eq!(perf.last_failure, NaiveDate::from_ymd_opt(2024, 10, 1));
    }

    #[test]
    fn single_recent_failure_needs_improvement() {
        let records = vec![record(Section::Lab, (2024, 9), false)];
        let perf = classify_rolling(Section::Lab, &records, today_fixed());
        assert_eq!(perf.tier, PerformanceTier::NeedsImprovement);
        assert_eq!(perf.failure_count_3mo, 1);
    }

    #[test]
    fn failure_on_window_start_counts_as_recent() {
        let records = vec![record(Section::Lab, (2024, 7), false)];
        let perf = classify_rolling(Section::Lab, &records, today_fixed());
        assert_eq!(perf.failure_count_3mo, 1);
        assert_eq!(perf.tier, PerformanceTier::NeedsImprovement);

        let records = vec![record(Section::Lab, (2024, 6), false)];
        let perf = classify_rolling(Section::Lab, &records, today_fixed());
        assert_eq!(perf.failure_count_3mo, 0);
        assert_eq!(perf.tier, PerformanceTier::Stable);
    }

    #[test]
    fn older_failures_leave_section_stable() {
        let in_nine = vec![record(Section::Lab, (2024, 2), false)];
        let perf = classify_rolling(Section::Lab, &in_nine, today_fixed());
        assert_eq!(perf.tier, PerformanceTier::Stable);
        assert_eq!(perf.failure_count_3mo, 0);

        let in_six = vec![record(Section::Lab, (2024, 5), false)];
        let perf = classify_rolling(Section::Lab, &in_six, today_fixed());
        assert_eq!(perf.tier, PerformanceTier::Stable);
    }

    #[test]
    fn clean_history_is_top_performer() {
        let records = vec![
            record(Section::Lab, (2024, 9), true),
            record(Section::Lab, (2023, 1), false),
        ];
        let perf = classify_rolling(Section::Lab, &records, today_fixed());
        assert_eq!(perf.tier, PerformanceTier::TopPerformer);
        assert_eq!(perf.last_failure, NaiveDate::from_ymd_opt(2023, 1, 1));
    }

    #[test]
    fn drafts_and_other_sections_are_ignored() {
        let mut draft = record(Section::Lab, (2024, 9), false);
        draft.status = RecordStatus::Draft;
        let records = vec![draft, record(Section::Er, (2024, 9), false)];
        let perf = classify_rolling(Section::Lab, &records, today_fixed());
        assert_eq!(perf.tier, PerformanceTier::Undefined);
        assert_eq!(perf.failure_count_3mo, 0);
    }

    #[test]
    fn rolling_tiers_cover_every_count() {
        for f3 in 0..3 {
            for f6 in f3..4 {
                for f9 in f6..5 {
                    let tier = rolling_tier(f3, f6, f9);
                    assert_ne!(tier, PerformanceTier::Undefined);
                }
            }
        }
        assert_eq!(rolling_tier(0, 0, 1), PerformanceTier::Stable);
        assert_eq!(rolling_tier(0, 1, 1), PerformanceTier::Stable);
    }

    #[test]
    fn classify_all_returns_every_section() {
        let records = vec![record(Section::Er, (2024, 9), true)];
        let all = classify_all_rolling(&records, today_fixed());
        assert_eq!(all.len(), Section::ALL.len());
        let er = all.iter().find(|p| p.section == Section::Er).unwrap();
        assert_eq!(er.tier, PerformanceTier::TopPerformer);
    }

    #[test]
    fn range_policy_has_no_stable_tier() {
        let records = vec![
            record(Section::Lab, (2024, 2), true),
            record(Section::Er, (2024, 3), false),
            record(Section::Radiology, (2024, 3), false),
            record(Section::Radiology, (2024, 4), false),
            record(Section::Pharmacy, (2023, 4), false),
        ];
        let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let ranked = classify_range(&records, from, to);

        let tier = |section| ranked.iter().find(|p| p.section == section).unwrap().tier;
        assert_eq!(tier(Section::Lab), PerformanceTier::TopPerformer);
        assert_eq!(tier(Section::Er), PerformanceTier::NeedsImprovement);
        assert_eq!(tier(Section::Radiology), PerformanceTier::Critical);
        assert_eq!(tier(Section::Pharmacy), PerformanceTier::Undefined);
        assert!(ranked.iter().all(|p| p.tier != PerformanceTier::Stable));
    }

    #[test]
    fn breakdown_sorts_best_first() {
        let mut slow = record(Section::Lab, (2024, 1), false);
        slow.kpi_name = "Timeliness".to_string();
        let records = vec![
            slow,
            record(Section::Lab, (2024, 1), true),
            record(Section::Lab, (2024, 2), false),
        ];
        let breakdown = kpi_breakdown(&records);
        assert_eq!(breakdown[0].kpi_name, "Patient Satisfaction");
        assert!((breakdown[0].rate - 50.0).abs() < 1e-9);
        assert_eq!(breakdown[1].kpi_name, "Timeliness");
        assert_eq!(breakdown[1].conformant, 0);
    }

    #[test]
    fn streak_counts_trailing_failures() {
        let records = vec![
            record(Section::Lab, (2024, 1), false),
            record(Section::Lab, (2024, 2), true),
            record(Section::Lab, (2024, 4), false),
            record(Section::Lab, (2024, 3), false),
        ];
        assert_eq!(failure_streak(&records), 2);
        assert_eq!(failure_streak(&[]), 0);
    }
}
