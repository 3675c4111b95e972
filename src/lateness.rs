use std::io::Write;

use chrono::NaiveDate;

use crate::models::MeasurementRecord;

/// Approved records due within `[from, to]` that were submitted after their
/// due date, most recently submitted first. Drafts are never reported.
pub fn late_submissions(
    records: &[MeasurementRecord],
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<MeasurementRecord> {
    let mut late: Vec<MeasurementRecord> = records
        .iter()
        .filter(|record| record.is_approved())
        .filter(|record| match (record.due_date, record.date_submitted) {
            (Some(due), Some(submitted)) => due >= from && due <= to && submitted > due,
            _ => false,
        })
        .cloned()
        .collect();

    late.sort_by(|a, b| b.date_submitted.cmp(&a.date_submitted));
    late
}

pub fn days_late(record: &MeasurementRecord) -> i64 {
    match (record.due_date, record.date_submitted) {
        (Some(due), Some(submitted)) => (submitted - due).num_days().abs(),
        _ => 0,
    }
}

pub fn write_late_csv<W: Write>(writer: W, records: &[MeasurementRecord]) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record([
        "Section",
        "Department",
        "KPI",
        "Due Date",
        "Date Submitted",
        "Days Late",
    ])?;

    for record in records {
        let due = record.due_date.map(|d| d.to_string()).unwrap_or_default();
        let submitted = record
            .date_submitted
            .map(|d| d.to_string())
            .unwrap_or_default();
        csv.write_record([
            record.section.label(),
            record.department.as_str(),
            record.kpi_name.as_str(),
            due.as_str(),
            submitted.as_str(),
            days_late(record).to_string().as_str(),
        ])?;
    }

    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::tests::pct_record;
    use crate::models::RecordStatus;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn submitted(id: &str, due: NaiveDate, on: Option<NaiveDate>) -> MeasurementRecord {
        let mut record = pct_record("Timeliness", 90.0, 95.0);
        record.id = id.to_string();
        record.due_date = Some(due);
        record.date_submitted = on;
        record
    }

    #[test]
    fn picks_only_late_records_in_range() {
        let records = vec![
            submitted("on-time", date(2024, 2, 5), Some(date(2024, 2, 5))),
            submitted("late", date(2024, 2, 5), Some(date(2024, 2, 9))),
            submitted("later", date(2024, 3, 5), Some(date(2024, 3, 20))),
            submitted("out-of-range", date(2023, 12, 5), Some(date(2024, 1, 9))),
            submitted("missing", date(2024, 2, 5), None),
        ];

        let late = late_submissions(&records, date(2024, 1, 1), date(2024, 12, 31));
        let ids: Vec<&str> = late.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["later", "late"]);
        assert_eq!(days_late(&late[0]), 15);
        assert_eq!(days_late(&late[1]), 4);
    }

    #[test]
    fn csv_export_has_header_and_rows() {
        let records = vec![submitted("late", date(2024, 2, 5), Some(date(2024, 2, 9)))];
        let mut buffer = Vec::new();
        write_late_csv(&mut buffer, &records).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("Section,Department,KPI,Due Date,Date Submitted,Days Late")
        );
        assert_eq!(
            lines.next(),
            Some("Laboratory,Overall,Timeliness,2024-02-05,2024-02-09,4")
        );
    }

    #[test]
    fn late_drafts_are_not_listed() {
        let mut draft = submitted("draft", date(2024, 2, 5), Some(date(2024, 2, 20)));
        draft.status = RecordStatus::Draft;
        let records = vec![
            draft,
            submitted("late", date(2024, 2, 5), Some(date(2024, 2, 9))),
        ];

        let late = late_submissions(&records, date(2024, 1, 1), date(2024, 12, 31));
        let ids: Vec<&str> = late.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["late"]);
    }
}
