use crate::models::{KpiDefinition, MeasurementKind, MeasurementRecord, Section, TimeUnit};

/// Where a submission's defaults were taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSource {
    Definition,
    PreviousRecord,
    Blank,
}

/// Kind, department, targets and unit to pre-fill a new submission with.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionTemplate {
    pub source: TemplateSource,
    pub kind: MeasurementKind,
    pub department: String,
    pub target_time: Option<f64>,
    pub target_pct: Option<f64>,
    pub time_unit: Option<TimeUnit>,
}

/// Values given explicitly on submission; each one wins over the template.
#[derive(Debug, Clone, Default)]
pub struct SubmissionOverrides {
    pub kind: Option<MeasurementKind>,
    pub department: Option<String>,
    pub target_time: Option<f64>,
    pub target_pct: Option<f64>,
    pub time_unit: Option<TimeUnit>,
}

/// A time target makes the KPI a time measurement, even when a percentage
/// target is also present.
pub fn infer_kind(target_time: Option<f64>) -> MeasurementKind {
    if target_time.is_some() {
        MeasurementKind::Time
    } else {
        MeasurementKind::Percentage
    }
}

/// Looks up defaults for `kpi_name` in `section`: the KPI definition first,
/// then the most recent record of that KPI, then a zero percentage target.
pub fn template_for(
    section: Section,
    kpi_name: &str,
    definitions: &[KpiDefinition],
    records: &[MeasurementRecord],
) -> SubmissionTemplate {
    if let Some(definition) = definitions
        .iter()
        .find(|d| d.section == section && d.kpi_name == kpi_name)
    {
        let time_unit = definition
            .target_time
            .map(|_| definition.time_unit.unwrap_or(TimeUnit::Minutes));
        return SubmissionTemplate {
            source: TemplateSource::Definition,
            kind: definition
                .kind
                .unwrap_or_else(|| infer_kind(definition.target_time)),
            department: definition
                .department
                .clone()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_default(),
            target_time: definition.target_time,
            target_pct: definition.target_pct,
            time_unit,
        };
    }

    let recent = records
        .iter()
        .filter(|r| r.section == section && r.kpi_name == kpi_name)
        .max_by_key(|r| r.month);

    match recent {
        Some(record) => SubmissionTemplate {
            source: TemplateSource::PreviousRecord,
            kind: record.kind(),
            department: record.department.clone(),
            target_time: record.metric.time().and_then(|t| t.target),
            target_pct: record.metric.percentage().and_then(|p| p.target),
            time_unit: record.metric.time_unit(),
        },
        None => SubmissionTemplate {
            source: TemplateSource::Blank,
            kind: MeasurementKind::Percentage,
            department: String::new(),
            target_time: None,
            target_pct: Some(0.0),
            time_unit: None,
        },
    }
}

impl SubmissionTemplate {
    /// Layers explicit values over the template. Without an explicit kind a
    /// blank template infers it from the resulting targets.
    pub fn with_overrides(self, overrides: SubmissionOverrides) -> Self {
        let target_time = overrides.target_time.or(self.target_time);
        let target_pct = overrides.target_pct.or(self.target_pct);
        let time_unit = overrides
            .time_unit
            .or(self.time_unit)
            .or_else(|| target_time.map(|_| TimeUnit::Minutes));

        let kind = match (overrides.kind, self.source) {
            (Some(kind), _) => kind,
            (None, TemplateSource::Blank) => infer_kind(target_time),
            (None, _) => self.kind,
        };

        Self {
            source: self.source,
            kind,
            department: overrides
                .department
                .filter(|d| !d.trim().is_empty())
                .unwrap_or(self.department),
            target_time,
            target_pct,
            time_unit,
        }
    }
}
