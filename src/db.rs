use std::io::Read;
use std::str::FromStr;

use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    KpiDefinition, MeasurementKind, MeasurementRecord, Metric, PercentageMetric, RecordStatus,
    Section, TimeMetric, TimeUnit,
};

const RECORD_COLUMNS: &str = "id, section, kpi_name, department, kpi_type, month, census, \
     target_time, actual_time, time_unit, target_pct, actual_pct, \
     due_date, date_submitted, remarks, status";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let definitions = vec![
        (
            Section::Er,
            "OSMAK-ER-QO-01",
            "Triage Response Time",
            "Emergency Medicine",
            MeasurementKind::Time,
            Some(5.0),
            None,
            Some(TimeUnit::Minutes),
            "Head Nurse",
        ),
        (
            Section::Er,
            "OSMAK-ER-QO-02",
            "Reattendance Rate",
            "Overall",
            MeasurementKind::Percentage,
            None,
            Some(5.0),
            None,
            "ER Chief",
        ),
        (
            Section::Lab,
            "OSMAK-LAB-QO-01",
            "Timeliness",
            "TAT in minutes",
            MeasurementKind::Percentage,
            None,
            Some(90.0),
            None,
            "Chief Medical Technologist",
        ),
    ];

    for (section, document, kpi_name, department, kind, target_time, target_pct, unit, responsible) in
        definitions
    {
        sqlx::query(
            r#"
            INSERT INTO kpi_dashboard.definitions
            (id, section, document_number, kpi_name, department, kpi_type,
             target_time, target_pct, time_unit, target, responsible)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (section, kpi_name, department) DO UPDATE
            SET target_time = EXCLUDED.target_time, target_pct = EXCLUDED.target_pct
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(section.label())
        .bind(document)
        .bind(kpi_name)
        .bind(department)
        .bind(kind.as_str())
        .bind(target_time)
        .bind(target_pct)
        .bind(unit.map(|u| u.as_str()))
        .bind(match (target_time, target_pct) {
            (Some(time), _) => format!("<= {time} minutes"),
            (_, Some(pct)) => format!("{pct}%"),
            _ => String::new(),
        })
        .bind(responsible)
        .execute(pool)
        .await?;
    }

    let month = |m| NaiveDate::from_ymd_opt(2026, m, 1).context("invalid date");
    let due = |m| NaiveDate::from_ymd_opt(2026, m + 1, 5).context("invalid date");

    let records = vec![
        ("seed-001", Section::Er, "Triage Response Time", "Emergency Medicine", Some((5.0, 4.0)), None, 1),
        ("seed-002", Section::Er, "Triage Response Time", "Emergency Medicine", Some((5.0, 7.5)), None, 2),
        ("seed-003", Section::Er, "Reattendance Rate", "Overall", None, Some((5.0, 3.2)), 1),
        ("seed-004", Section::Lab, "Timeliness", "TAT in minutes", None, Some((90.0, 96.0)), 1),
        ("seed-005", Section::Lab, "Timeliness", "TAT in minutes", None, Some((90.0, 88.0)), 2),
        ("seed-006", Section::Lab, "Timeliness", "TAT in minutes", None, Some((90.0, 93.5)), 3),
    ];

    for (source_key, section, kpi_name, department, time, pct, m) in records {
        let kind = if time.is_some() {
            MeasurementKind::Time
        } else {
            MeasurementKind::Percentage
        };
        let record = MeasurementRecord {
            id: Uuid::new_v4().to_string(),
            section,
            kpi_name: kpi_name.to_string(),
            department: department.to_string(),
            metric: Metric::from_parts(
                kind,
                TimeMetric {
                    target: time.map(|(t, _)| t),
                    actual: time.map(|(_, a)| a),
                    unit: time.map(|_| TimeUnit::Minutes),
                },
                PercentageMetric {
                    target: pct.map(|(t, _)| t),
                    actual: pct.map(|(_, a)| a),
                },
            ),
            month: month(m)?,
            census: 120 * m,
            due_date: Some(due(m)?),
            date_submitted: Some(due(m)? + chrono::Duration::days(i64::from(m) - 1)),
            remarks: None,
            status: RecordStatus::Approved,
        };
        insert_record(pool, &record, Some(source_key)).await?;
    }

    Ok(())
}

/// Parses an optional text column; blank text counts as absent.
fn parse_optional<T>(raw: Option<&str>) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::parse::<T>)
        .transpose()?)
}

fn record_from_row(row: &PgRow) -> anyhow::Result<MeasurementRecord> {
    let kind: MeasurementKind = row.get::<String, _>("kpi_type").parse()?;
    let time_unit: Option<TimeUnit> =
        parse_optional(row.get::<Option<String>, _>("time_unit").as_deref())?;

    let metric = Metric::from_parts(
        kind,
        TimeMetric {
            target: row.get("target_time"),
            actual: row.get("actual_time"),
            unit: time_unit,
        },
        PercentageMetric {
            target: row.get("target_pct"),
            actual: row.get("actual_pct"),
        },
    );

    Ok(MeasurementRecord {
        id: row.get("id"),
        section: row.get::<String, _>("section").parse()?,
        kpi_name: row.get("kpi_name"),
        department: row.get("department"),
        metric,
        month: row.get("month"),
        census: u32::try_from(row.get::<i32, _>("census")).unwrap_or(0),
        due_date: row.get("due_date"),
        date_submitted: row.get("date_submitted"),
        remarks: row.get("remarks"),
        status: row.get::<String, _>("status").parse()?,
    })
}

pub async fn fetch_records(pool: &PgPool) -> anyhow::Result<Vec<MeasurementRecord>> {
    let query = format!(
        "SELECT {RECORD_COLUMNS} FROM kpi_dashboard.records ORDER BY month, section, kpi_name"
    );
    let rows = sqlx::query(&query).fetch_all(pool).await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(record_from_row(&row)?);
    }

    tracing::debug!(count = records.len(), "fetched records");
    Ok(records)
}

/// Inserts a record; returns false when `source_key` was already imported.
pub async fn insert_record(
    pool: &PgPool,
    record: &MeasurementRecord,
    source_key: Option<&str>,
) -> anyhow::Result<bool> {
    let time = record.metric.time();
    let pct = record.metric.percentage();

    let result = sqlx::query(
        r#"
        INSERT INTO kpi_dashboard.records
        (id, section, kpi_name, department, kpi_type, month, census,
         target_time, actual_time, time_unit, target_pct, actual_pct,
         due_date, date_submitted, remarks, status, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(&record.id)
    .bind(record.section.label())
    .bind(&record.kpi_name)
    .bind(&record.department)
    .bind(record.kind().as_str())
    .bind(record.month)
    .bind(i32::try_from(record.census).unwrap_or(i32::MAX))
    .bind(time.and_then(|t| t.target))
    .bind(time.and_then(|t| t.actual))
    .bind(record.metric.time_unit().map(|u| u.as_str()))
    .bind(pct.and_then(|p| p.target))
    .bind(pct.and_then(|p| p.actual))
    .bind(record.due_date)
    .bind(record.date_submitted)
    .bind(&record.remarks)
    .bind(record.status.as_str())
    .bind(source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Rewrites a draft in place. Approved records are left untouched.
pub async fn update_draft(pool: &PgPool, record: &MeasurementRecord) -> anyhow::Result<bool> {
    let time = record.metric.time();
    let pct = record.metric.percentage();

    let result = sqlx::query(
        r#"
        UPDATE kpi_dashboard.records
        SET section = $2, kpi_name = $3, department = $4, kpi_type = $5, month = $6,
            census = $7, target_time = $8, actual_time = $9, time_unit = $10,
            target_pct = $11, actual_pct = $12, due_date = $13, date_submitted = $14,
            remarks = $15
        WHERE id = $1 AND status = 'DRAFT'
        "#,
    )
    .bind(&record.id)
    .bind(record.section.label())
    .bind(&record.kpi_name)
    .bind(&record.department)
    .bind(record.kind().as_str())
    .bind(record.month)
    .bind(i32::try_from(record.census).unwrap_or(i32::MAX))
    .bind(time.and_then(|t| t.target))
    .bind(time.and_then(|t| t.actual))
    .bind(record.metric.time_unit().map(|u| u.as_str()))
    .bind(pct.and_then(|p| p.target))
    .bind(pct.and_then(|p| p.actual))
    .bind(record.due_date)
    .bind(record.date_submitted)
    .bind(&record.remarks)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn fetch_record(pool: &PgPool, id: &str) -> anyhow::Result<Option<MeasurementRecord>> {
    let query = format!("SELECT {RECORD_COLUMNS} FROM kpi_dashboard.records WHERE id = $1");
    let row = sqlx::query(&query).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(record_from_row).transpose()
}

pub async fn delete_record(pool: &PgPool, id: &str) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM kpi_dashboard.records WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Promotes drafts to approved. With no ids every draft is promoted.
pub async fn approve_drafts(pool: &PgPool, ids: &[String]) -> anyhow::Result<u64> {
    let result = if ids.is_empty() {
        sqlx::query("UPDATE kpi_dashboard.records SET status = 'APPROVED' WHERE status = 'DRAFT'")
            .execute(pool)
            .await?
    } else {
        sqlx::query(
            "UPDATE kpi_dashboard.records SET status = 'APPROVED' \
             WHERE status = 'DRAFT' AND id = ANY($1)",
        )
        .bind(ids)
        .execute(pool)
        .await?
    };

    Ok(result.rows_affected())
}

pub async fn fetch_definitions(pool: &PgPool) -> anyhow::Result<Vec<KpiDefinition>> {
    let rows = sqlx::query(
        "SELECT id, section, document_number, quality_objective, kpi_name, definition, \
         formula, target, target_time, target_pct, time_unit, department, kpi_type, \
         responsible, schedule \
         FROM kpi_dashboard.definitions ORDER BY section, kpi_name",
    )
    .fetch_all(pool)
    .await?;

    let mut definitions = Vec::with_capacity(rows.len());
    for row in rows {
        definitions.push(KpiDefinition {
            id: row.get("id"),
            section: row.get::<String, _>("section").parse()?,
            document_number: row.get("document_number"),
            quality_objective: row.get("quality_objective"),
            kpi_name: row.get("kpi_name"),
            definition: row.get("definition"),
            formula: row.get("formula"),
            target: row.get("target"),
            target_time: row.get("target_time"),
            target_pct: row.get("target_pct"),
            time_unit: parse_optional(row.get::<Option<String>, _>("time_unit").as_deref())?,
            department: row.get("department"),
            kind: parse_optional(row.get::<Option<String>, _>("kpi_type").as_deref())?,
            responsible: row.get("responsible"),
            schedule: row.get("schedule"),
        });
    }

    Ok(definitions)
}

#[derive(serde::Deserialize)]
struct CsvRow {
    section: String,
    kpi_name: String,
    #[serde(default)]
    department: Option<String>,
    kpi_type: String,
    month: NaiveDate,
    census: Option<u32>,
    target_time: Option<f64>,
    actual_time: Option<f64>,
    time_unit: Option<String>,
    target_pct: Option<f64>,
    actual_pct: Option<f64>,
    due_date: Option<NaiveDate>,
    date_submitted: Option<NaiveDate>,
    remarks: Option<String>,
    status: Option<String>,
    source_key: Option<String>,
}

/// Reads record rows from CSV. Months are snapped to the first day and a
/// missing status imports as approved.
pub fn parse_records_csv<R: Read>(
    reader: R,
) -> anyhow::Result<Vec<(MeasurementRecord, Option<String>)>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut parsed = Vec::new();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("malformed CSV row {}", line + 1))?;

        let kind: MeasurementKind = row.kpi_type.parse()?;
        let unit = parse_optional::<TimeUnit>(row.time_unit.as_deref())?;
        let status = match row.status.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(status) => status.parse()?,
            None => RecordStatus::Approved,
        };

        let record = MeasurementRecord {
            id: Uuid::new_v4().to_string(),
            section: row.section.parse()?,
            kpi_name: row.kpi_name.trim().to_string(),
            department: row.department.unwrap_or_default().trim().to_string(),
            metric: Metric::from_parts(
                kind,
                TimeMetric {
                    target: row.target_time,
                    actual: row.actual_time,
                    unit,
                },
                PercentageMetric {
                    target: row.target_pct,
                    actual: row.actual_pct,
                },
            ),
            month: row.month.with_day(1).unwrap_or(row.month),
            census: row.census.unwrap_or(0),
            due_date: row.due_date,
            date_submitted: row.date_submitted,
            remarks: row.remarks.filter(|r| !r.trim().is_empty()),
            status,
        };
        parsed.push((record, row.source_key));
    }

    Ok(parsed)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let rows = parse_records_csv(file)?;
    let mut inserted = 0usize;

    for (record, source_key) in rows {
        let source_key = source_key.unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        if insert_record(pool, &record, Some(&source_key)).await? {
            inserted += 1;
        } else {
            tracing::debug!(source_key = %source_key, "skipping already imported row");
        }
    }

    Ok(inserted)
}
