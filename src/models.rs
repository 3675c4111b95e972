use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown section: {0}")]
    UnknownSection(String),
    #[error("unknown measurement kind: {0}")]
    UnknownKind(String),
    #[error("unknown time unit: {0}")]
    UnknownTimeUnit(String),
    #[error("unknown record status: {0}")]
    UnknownStatus(String),
}

/// Hospital sections that report KPIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Section {
    #[serde(rename = "Admitting Section")]
    Admitting,
    #[serde(rename = "Cardiovascular Diagnostics")]
    Cardio,
    #[serde(rename = "Cashier Management")]
    Cashier,
    #[serde(rename = "Claims")]
    Claims,
    #[serde(rename = "Emergency Room Complex")]
    Er,
    #[serde(rename = "Food and Nutrition Management")]
    Dietary,
    #[serde(rename = "General Services Section")]
    GeneralServices,
    #[serde(rename = "Health Records and Documents Management")]
    Records,
    #[serde(rename = "Housekeeping Laundry and Linen")]
    Housekeeping,
    #[serde(rename = "Industrial Clinic")]
    Industrial,
    #[serde(rename = "Information Technology")]
    It,
    #[serde(rename = "Laboratory")]
    Lab,
    #[serde(rename = "Medical Social Service")]
    Social,
    #[serde(rename = "Nursing Division")]
    Nursing,
    #[serde(rename = "Pathology")]
    Pathology,
    #[serde(rename = "Pharmacy")]
    Pharmacy,
    #[serde(rename = "Physical and Occupational Therapy")]
    PtOt,
    #[serde(rename = "Radiology")]
    Radiology,
    #[serde(rename = "Requisition Section")]
    Requisition,
    #[serde(rename = "Supply Management Section")]
    Supply,
    #[serde(rename = "Surgical Care Complex")]
    Surgical,
}

impl Section {
    pub const ALL: [Section; 21] = [
        Section::Admitting,
        Section::Cardio,
        Section::Cashier,
        Section::Claims,
        Section::Er,
        Section::Dietary,
        Section::GeneralServices,
        Section::Records,
        Section::Housekeeping,
        Section::Industrial,
        Section::It,
        Section::Lab,
        Section::Social,
        Section::Nursing,
        Section::Pathology,
        Section::Pharmacy,
        Section::PtOt,
        Section::Radiology,
        Section::Requisition,
        Section::Supply,
        Section::Surgical,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Section::Admitting => "Admitting Section",
            Section::Cardio => "Cardiovascular Diagnostics",
            Section::Cashier => "Cashier Management",
            Section::Claims => "Claims",
            Section::Er => "Emergency Room Complex",
            Section::Dietary => "Food and Nutrition Management",
            Section::GeneralServices => "General Services Section",
            Section::Records => "Health Records and Documents Management",
            Section::Housekeeping => "Housekeeping Laundry and Linen",
            Section::Industrial => "Industrial Clinic",
            Section::It => "Information Technology",
            Section::Lab => "Laboratory",
            Section::Social => "Medical Social Service",
            Section::Nursing => "Nursing Division",
            Section::Pathology => "Pathology",
            Section::Pharmacy => "Pharmacy",
            Section::PtOt => "Physical and Occupational Therapy",
            Section::Radiology => "Radiology",
            Section::Requisition => "Requisition Section",
            Section::Supply => "Supply Management Section",
            Section::Surgical => "Surgical Care Complex",
        }
    }

    /// Short code accepted on the command line.
    pub fn code(self) -> &'static str {
        match self {
            Section::Admitting => "ADMITTING",
            Section::Cardio => "CARDIO",
            Section::Cashier => "CASHIER",
            Section::Claims => "CLAIMS",
            Section::Er => "ER",
            Section::Dietary => "DIETARY",
            Section::GeneralServices => "GENERAL_SERVICES",
            Section::Records => "RECORDS",
            Section::Housekeeping => "HOUSEKEEPING",
            Section::Industrial => "INDUSTRIAL",
            Section::It => "IT",
            Section::Lab => "LAB",
            Section::Social => "SOCIAL",
            Section::Nursing => "NURSING",
            Section::Pathology => "PATHOLOGY",
            Section::Pharmacy => "PHARMACY",
            Section::PtOt => "PT_OT",
            Section::Radiology => "RADIOLOGY",
            Section::Requisition => "REQUISITION",
            Section::Supply => "SUPPLY",
            Section::Surgical => "SURGICAL",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Section {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Section::ALL
            .into_iter()
            .find(|section| {
                section.label().eq_ignore_ascii_case(trimmed)
                    || section.code().eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| ParseError::UnknownSection(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeasurementKind {
    Percentage,
    Time,
}

impl MeasurementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MeasurementKind::Percentage => "PERCENTAGE",
            MeasurementKind::Time => "TIME",
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasurementKind {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PERCENTAGE" | "PCT" | "%" => Ok(MeasurementKind::Percentage),
            "TIME" => Ok(MeasurementKind::Time),
            _ => Err(ParseError::UnknownKind(value.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Minutes => "Mins",
            TimeUnit::Hours => "Hours",
            TimeUnit::Days => "Days",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "min" | "mins" | "minute" | "minutes" => Ok(TimeUnit::Minutes),
            "h" | "hr" | "hrs" | "hour" | "hours" => Ok(TimeUnit::Hours),
            "d" | "day" | "days" => Ok(TimeUnit::Days),
            _ => Err(ParseError::UnknownTimeUnit(value.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentageMetric {
    pub target: Option<f64>,
    pub actual: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeMetric {
    pub target: Option<f64>,
    pub actual: Option<f64>,
    pub unit: Option<TimeUnit>,
}

/// Target/actual pairs a record carries. Dual-metric KPIs report both a
/// time and a percentage figure; `primary` decides which one is judged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Metric {
    Percentage(PercentageMetric),
    Time(TimeMetric),
    Dual {
        primary: MeasurementKind,
        time: TimeMetric,
        pct: PercentageMetric,
    },
}

impl Metric {
    /// Builds the variant from the flat columns used by the store and CSV files.
    pub fn from_parts(
        kind: MeasurementKind,
        time: TimeMetric,
        pct: PercentageMetric,
    ) -> Self {
        let has_time = time.target.is_some() || time.actual.is_some();
        let has_pct = pct.target.is_some() || pct.actual.is_some();

        match kind {
            MeasurementKind::Time if has_pct => Metric::Dual {
                primary: kind,
                time,
                pct,
            },
            MeasurementKind::Time => Metric::Time(time),
            MeasurementKind::Percentage if has_time => Metric::Dual {
                primary: kind,
                time,
                pct,
            },
            MeasurementKind::Percentage => Metric::Percentage(pct),
        }
    }

    pub fn kind(&self) -> MeasurementKind {
        match self {
            Metric::Percentage(_) => MeasurementKind::Percentage,
            Metric::Time(_) => MeasurementKind::Time,
            Metric::Dual { primary, .. } => *primary,
        }
    }

    pub fn time(&self) -> Option<&TimeMetric> {
        match self {
            Metric::Time(time) | Metric::Dual { time, .. } => Some(time),
            Metric::Percentage(_) => None,
        }
    }

    pub fn percentage(&self) -> Option<&PercentageMetric> {
        match self {
            Metric::Percentage(pct) | Metric::Dual { pct, .. } => Some(pct),
            Metric::Time(_) => None,
        }
    }

    pub fn time_unit(&self) -> Option<TimeUnit> {
        self.time().and_then(|time| time.unit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Draft,
    Approved,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Draft => "DRAFT",
            RecordStatus::Approved => "APPROVED",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(RecordStatus::Draft),
            "APPROVED" => Ok(RecordStatus::Approved),
            _ => Err(ParseError::UnknownStatus(value.trim().to_string())),
        }
    }
}

/// One reported data point for a KPI in a month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub id: String,
    pub section: Section,
    pub kpi_name: String,
    pub department: String,
    pub metric: Metric,
    /// First day of the reporting month.
    pub month: NaiveDate,
    pub census: u32,
    pub due_date: Option<NaiveDate>,
    pub date_submitted: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub status: RecordStatus,
}

impl MeasurementRecord {
    pub fn kind(&self) -> MeasurementKind {
        self.metric.kind()
    }

    pub fn is_approved(&self) -> bool {
        self.status == RecordStatus::Approved
    }
}

/// Keeps only records that may feed dashboard aggregates.
pub fn approved_only(records: &[MeasurementRecord]) -> Vec<MeasurementRecord> {
    records
        .iter()
        .filter(|record| record.is_approved())
        .cloned()
        .collect()
}

/// Narrows a record list the way the dashboard filters do.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub section: Option<Section>,
    pub kpi_name: Option<String>,
    pub department: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<RecordStatus>,
}

impl RecordFilter {
    pub fn matches(&self, record: &MeasurementRecord) -> bool {
        self.section.map_or(true, |s| record.section == s)
            && self
                .kpi_name
                .as_deref()
                .map_or(true, |k| record.kpi_name.eq_ignore_ascii_case(k))
            && self
                .department
                .as_deref()
                .map_or(true, |d| record.department.eq_ignore_ascii_case(d))
            && self.from.map_or(true, |from| record.month >= from)
            && self.to.map_or(true, |to| record.month <= to)
            && self.status.map_or(true, |status| record.status == status)
    }

    pub fn apply(&self, records: &[MeasurementRecord]) -> Vec<MeasurementRecord> {
        records
            .iter()
            .filter(|record| self.matches(record))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiDefinition {
    pub id: String,
    pub section: Section,
    pub document_number: String,
    pub quality_objective: String,
    pub kpi_name: String,
    pub definition: String,
    pub formula: String,
    pub target: String,
    pub target_time: Option<f64>,
    pub target_pct: Option<f64>,
    pub time_unit: Option<TimeUnit>,
    pub department: Option<String>,
    pub kind: Option<MeasurementKind>,
    pub responsible: String,
    pub schedule: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformanceTier {
    TopPerformer,
    Stable,
    NeedsImprovement,
    Critical,
    Undefined,
}

impl PerformanceTier {
    pub fn label(self) -> &'static str {
        match self {
            PerformanceTier::TopPerformer => "Top Performer",
            PerformanceTier::Stable => "Stable Performer",
            PerformanceTier::NeedsImprovement => "Needs Improvement",
            PerformanceTier::Critical => "Critical",
            PerformanceTier::Undefined => "New / Undefined",
        }
    }
}

impl fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Rolling-window health of one section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionPerformance {
    pub section: Section,
    pub tier: PerformanceTier,
    pub failure_count_3mo: usize,
    pub last_failure: Option<NaiveDate>,
}

/// Date-range standing of one section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangePerformance {
    pub section: Section,
    pub tier: PerformanceTier,
    pub failure_count: usize,
    pub record_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiConformance {
    pub kpi_name: String,
    pub total: usize,
    pub conformant: usize,
    pub rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_parse_from_label_or_code() {
        assert_eq!("Laboratory".parse::<Section>(), Ok(Section::Lab));
        assert_eq!("emergency room complex".parse::<Section>(), Ok(Section::Er));
        assert_eq!("pt_ot".parse::<Section>(), Ok(Section::PtOt));
        assert!(matches!(
            "Morgue".parse::<Section>(),
            Err(ParseError::UnknownSection(_))
        ));
    }

    #[test]
    fn every_section_round_trips_through_its_label() {
        for section in Section::ALL {
            assert_eq!(section.label().parse::<Section>(), Ok(section));
        }
    }

    #[test]
    fn time_units_parse_leniently() {
        assert_eq!("Mins".parse::<TimeUnit>(), Ok(TimeUnit::Minutes));
        assert_eq!("hrs".parse::<TimeUnit>(), Ok(TimeUnit::Hours));
        assert_eq!(" Days ".parse::<TimeUnit>(), Ok(TimeUnit::Days));
        assert!("weeks".parse::<TimeUnit>().is_err());
    }

    #[test]
    fn metric_from_parts_picks_dual_when_both_halves_present() {
        let time = TimeMetric {
            target: Some(30.0),
            actual: Some(25.0),
            unit: Some(TimeUnit::Minutes),
        };
        let pct = PercentageMetric {
            target: Some(90.0),
            actual: Some(92.0),
        };

        let metric = Metric::from_parts(MeasurementKind::Time, time, pct);
        assert_eq!(metric.kind(), MeasurementKind::Time);
        assert!(metric.time().is_some());
        assert!(metric.percentage().is_some());

        let metric = Metric::from_parts(MeasurementKind::Time, time, PercentageMetric::default());
        assert_eq!(metric, Metric::Time(time));
        assert!(metric.percentage().is_none());
    }

    #[test]
    fn filter_combines_criteria() {
        let record = MeasurementRecord {
            id: "r1".to_string(),
            section: Section::Lab,
            kpi_name: "Timeliness".to_string(),
            department: "Overall".to_string(),
            metric: Metric::Percentage(PercentageMetric::default()),
            month: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            census: 0,
            due_date: None,
            date_submitted: None,
            remarks: None,
            status: RecordStatus::Draft,
        };

        assert!(RecordFilter::default().matches(&record));
        let filter = RecordFilter {
            section: Some(Section::Lab),
            kpi_name: Some("timeliness".to_string()),
            from: NaiveDate::from_ymd_opt(2024, 1, 1),
            to: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..RecordFilter::default()
        };
        assert!(filter.matches(&record));

        let approved = RecordFilter {
            status: Some(RecordStatus::Approved),
            ..filter.clone()
        };
        assert!(!approved.matches(&record));
        assert!(approved_only(&[record]).is_empty());
    }

    #[test]
    fn metric_serializes_with_kind_tag() {
        let metric = Metric::Percentage(PercentageMetric {
            target: Some(90.0),
            actual: Some(95.0),
        });
        let json = serde_json::to_value(metric).unwrap();
        assert_eq!(json["kind"], "percentage");
        assert_eq!(json["actual"], 95.0);
    }
}
