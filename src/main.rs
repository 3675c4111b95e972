use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{Datelike, Duration, Months, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

mod access;
mod aggregate;
mod cache;
mod config;
mod conformance;
mod db;
mod export;
mod lateness;
mod logging;
mod models;
mod narrative;
mod performance;
mod report;
mod submission;

use access::{AccessGate, PasswordGate};
use cache::{fetch_with_cache, FileCache, RecordCache, DEFINITIONS_KEY, RECORDS_KEY};
use config::Config;
use export::Period;
use models::{
    KpiDefinition, MeasurementKind, MeasurementRecord, Metric, PercentageMetric, RecordFilter,
    RecordStatus, Section, TimeMetric, TimeUnit,
};
use submission::SubmissionOverrides;

#[derive(Parser)]
#[command(name = "kpi-conformance")]
#[command(about = "Hospital KPI submissions, approvals and conformance reporting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct FilterArgs {
    /// Section label or short code (e.g. LAB, ER)
    #[arg(long)]
    section: Option<Section>,
    #[arg(long)]
    kpi: Option<String>,
    #[arg(long)]
    department: Option<String>,
    /// First month to include (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last month to include (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Bypass the local record cache
    #[arg(long)]
    refresh: bool,
}

impl FilterArgs {
    fn range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let from = self
            .from
            .or_else(|| NaiveDate::from_ymd_opt(today.year(), 1, 1))
            .unwrap_or(today);
        (from, self.to.unwrap_or(today))
    }

    fn to_filter(&self, status: Option<RecordStatus>) -> RecordFilter {
        RecordFilter {
            section: self.section,
            kpi_name: self.kpi.clone(),
            department: self.department.clone(),
            from: self.from,
            to: self.to,
            status,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import monthly records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Submit a monthly measurement as a draft. Kind, department, targets and
    /// unit default to the KPI definition, then to the latest record of the KPI.
    Submit {
        #[arg(long)]
        section: Section,
        #[arg(long)]
        kpi: String,
        #[arg(long)]
        department: Option<String>,
        /// TIME or PERCENTAGE; inferred from the targets when omitted
        #[arg(long)]
        kind: Option<MeasurementKind>,
        /// Reporting month; any day snaps to the first
        #[arg(long)]
        month: NaiveDate,
        #[arg(long, default_value_t = 0)]
        census: u32,
        #[arg(long)]
        target_pct: Option<f64>,
        #[arg(long)]
        actual_pct: Option<f64>,
        #[arg(long)]
        target_time: Option<f64>,
        #[arg(long)]
        actual_time: Option<f64>,
        #[arg(long)]
        time_unit: Option<TimeUnit>,
        #[arg(long)]
        due_date: Option<NaiveDate>,
        #[arg(long)]
        submitted: Option<NaiveDate>,
        #[arg(long)]
        remarks: Option<String>,
        #[arg(long)]
        password: String,
    },
    /// Change figures on a draft
    Edit {
        id: String,
        #[arg(long)]
        census: Option<u32>,
        #[arg(long)]
        actual_pct: Option<f64>,
        #[arg(long)]
        actual_time: Option<f64>,
        #[arg(long)]
        remarks: Option<String>,
        #[arg(long)]
        password: String,
    },
    /// Promote drafts to approved records (all drafts when no id is given)
    Approve {
        ids: Vec<String>,
        #[arg(long)]
        password: String,
    },
    /// Delete a record regardless of status
    Delete {
        id: String,
        #[arg(long)]
        password: String,
    },
    /// List records
    List {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        drafts: bool,
        #[arg(long)]
        json: bool,
        /// Write the table as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Roll approved monthly records up into quarters
    Quarterly {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        json: bool,
        /// Write the table as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Rolling 3/6/9-month health per section
    Classify {
        #[arg(long)]
        section: Option<Section>,
        /// Evaluate as of this date instead of today
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long)]
        refresh: bool,
        #[arg(long)]
        json: bool,
    },
    /// Rank sections by non-conformances within a date range
    Leaderboard {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        json: bool,
    },
    /// Describe a filtered series in plain language
    Summarize {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        quarterly: bool,
    },
    /// Records submitted after their due date
    Late {
        #[command(flatten)]
        filter: FilterArgs,
        /// Write the list as CSV instead of printing it
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Show KPI definitions
    Definitions {
        #[arg(long)]
        section: Option<Section>,
        #[arg(long)]
        refresh: bool,
    },
    /// Drop locally cached records and definitions
    ClearCache,
}

fn connect(config: &Config) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect_lazy(config.database_url()?)
        .context("failed to configure Postgres pool")
}

async fn load_records(
    pool: &PgPool,
    cache: &FileCache,
    config: &Config,
    refresh: bool,
) -> anyhow::Result<Vec<MeasurementRecord>> {
    if refresh {
        cache.invalidate(RECORDS_KEY)?;
    }
    fetch_with_cache(cache, RECORDS_KEY, config.cache_ttl, Utc::now(), || {
        db::fetch_records(pool)
    })
    .await
}

async fn load_definitions(
    pool: &PgPool,
    cache: &FileCache,
    config: &Config,
    refresh: bool,
) -> anyhow::Result<Vec<KpiDefinition>> {
    if refresh {
        cache.invalidate(DEFINITIONS_KEY)?;
    }
    fetch_with_cache(cache, DEFINITIONS_KEY, config.cache_ttl, Utc::now(), || {
        db::fetch_definitions(pool)
    })
    .await
}

fn write_csv(path: &Path, records: &[MeasurementRecord], period: Period) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    export::write_records_csv(file, records, period)?;
    println!("Wrote {} rows to {}.", records.len(), path.display());
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn describe(record: &MeasurementRecord) -> String {
    let pct = record
        .metric
        .percentage()
        .map(|p| {
            format!(
                " pct {:.2}/{:.2}",
                p.actual.unwrap_or(0.0),
                p.target.unwrap_or(0.0)
            )
        })
        .unwrap_or_default();
    let time = record
        .metric
        .time()
        .map(|t| {
            format!(
                " time {}/{} {}",
                t.actual.map_or("-".to_string(), |v| format!("{v:.2}")),
                t.target.map_or("-".to_string(), |v| format!("{v:.2}")),
                t.unit.map(|u| u.as_str()).unwrap_or_default()
            )
        })
        .unwrap_or_default();

    format!(
        "{} {} | {} | {} ({}){}{} census {} [{}] {}",
        record.month.format("%Y-%m"),
        record.section,
        record.kpi_name,
        record.department,
        record.kind(),
        pct,
        time,
        record.census,
        record.status,
        if conformance::is_conformant(record) { "pass" } else { "fail" }
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let cache = FileCache::new(&config.cache_dir);
    let gate = PasswordGate::new(config.master_key.clone());
    let today = performance::today();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&connect(&config)?).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&connect(&config)?).await?;
            cache.invalidate(RECORDS_KEY)?;
            cache.invalidate(DEFINITIONS_KEY)?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&connect(&config)?, &csv).await?;
            cache.invalidate(RECORDS_KEY)?;
            println!("Inserted {inserted} records from {}.", csv.display());
        }
        Commands::Submit {
            section,
            kpi,
            department,
            kind,
            month,
            census,
            target_pct,
            actual_pct,
            target_time,
            actual_time,
            time_unit,
            due_date,
            submitted,
            remarks,
            password,
        } => {
            gate.require_section(&password, section)?;
            let pool = connect(&config)?;
            let definitions = load_definitions(&pool, &cache, &config, false).await?;
            let known = load_records(&pool, &cache, &config, false).await?;
            let template = submission::template_for(section, &kpi, &definitions, &known);
            tracing::debug!(kpi = %kpi, source = ?template.source, "submission defaults resolved");
            let resolved = template.with_overrides(SubmissionOverrides {
                kind,
                department,
                target_time,
                target_pct,
                time_unit,
            });

            let month = month.with_day(1).unwrap_or(month);
            let due_date = match due_date {
                Some(date) => date,
                None => month
                    .checked_add_months(Months::new(1))
                    .map(|next| next + Duration::days(4))
                    .context("due date out of range")?,
            };

            let record = MeasurementRecord {
                id: Uuid::new_v4().to_string(),
                section,
                kpi_name: kpi,
                department: resolved.department,
                metric: Metric::from_parts(
                    resolved.kind,
                    TimeMetric {
                        target: resolved.target_time,
                        actual: actual_time,
                        unit: resolved.time_unit,
                    },
                    PercentageMetric {
                        target: resolved.target_pct,
                        actual: actual_pct,
                    },
                ),
                month,
                census,
                due_date: Some(due_date),
                date_submitted: Some(submitted.unwrap_or(today)),
                remarks,
                status: RecordStatus::Draft,
            };

            db::insert_record(&pool, &record, None).await?;
            cache.invalidate(RECORDS_KEY)?;
            tracing::info!(id = %record.id, section = %record.section, "draft submitted");
            println!("Draft {} saved: {}", record.id, describe(&record));
        }
        Commands::Edit {
            id,
            census,
            actual_pct,
            actual_time,
            remarks,
            password,
        } => {
            let pool = connect(&config)?;
            let mut record = db::fetch_record(&pool, &id)
                .await?
                .with_context(|| format!("no record with id {id}"))?;
            gate.require_section(&password, record.section)?;
            if record.status != RecordStatus::Draft {
                bail!("record {id} is already approved and can no longer be edited");
            }

            if let Some(census) = census {
                record.census = census;
            }
            if remarks.is_some() {
                record.remarks = remarks;
            }
            let time = record.metric.time().copied().map(|t| TimeMetric {
                actual: actual_time.or(t.actual),
                ..t
            });
            let pct = record.metric.percentage().copied().map(|p| PercentageMetric {
                actual: actual_pct.or(p.actual),
                ..p
            });
            record.metric = Metric::from_parts(
                record.kind(),
                time.unwrap_or_default(),
                pct.unwrap_or_default(),
            );

            if !db::update_draft(&pool, &record).await? {
                bail!("record {id} changed status while editing");
            }
            cache.invalidate(RECORDS_KEY)?;
            println!("Updated {}: {}", record.id, describe(&record));
        }
        Commands::Approve { ids, password } => {
            gate.require_master(&password)?;
            let approved = db::approve_drafts(&connect(&config)?, &ids).await?;
            cache.invalidate(RECORDS_KEY)?;
            tracing::info!(approved, "drafts approved");
            println!("Approved {approved} drafts.");
        }
        Commands::Delete { id, password } => {
            let pool = connect(&config)?;
            let record = db::fetch_record(&pool, &id)
                .await?
                .with_context(|| format!("no record with id {id}"))?;
            gate.require_section(&password, record.section)?;
            db::delete_record(&pool, &id).await?;
            cache.invalidate(RECORDS_KEY)?;
            println!("Deleted {id}.");
        }
        Commands::List {
            filter,
            drafts,
            json,
            csv,
        } => {
            let records = load_records(&connect(&config)?, &cache, &config, filter.refresh).await?;
            let status = if drafts {
                RecordStatus::Draft
            } else {
                RecordStatus::Approved
            };
            let records = filter.to_filter(Some(status)).apply(&records);

            if let Some(path) = csv {
                return write_csv(&path, &records, Period::Monthly);
            }
            if json {
                return print_json(&records);
            }
            if records.is_empty() {
                println!("No records match these filters.");
            }
            for record in records.iter() {
                println!("{} {}", record.id, describe(record));
            }
        }
        Commands::Quarterly { filter, json, csv } => {
            let records = load_records(&connect(&config)?, &cache, &config, filter.refresh).await?;
            let monthly = filter
                .to_filter(Some(RecordStatus::Approved))
                .apply(&records);
            let quarters = aggregate::aggregate_by_series(&monthly);

            if let Some(path) = csv {
                return write_csv(&path, &quarters, Period::Quarterly);
            }
            if json {
                return print_json(&quarters);
            }
            if quarters.is_empty() {
                println!("No approved records for this series.");
            }
            for quarter in quarters.iter() {
                println!("{}", describe(quarter));
            }
        }
        Commands::Classify {
            section,
            as_of,
            refresh,
            json,
        } => {
            let records = load_records(&connect(&config)?, &cache, &config, refresh).await?;
            let as_of = as_of.unwrap_or(today);
            let results = match section {
                Some(section) => vec![performance::classify_rolling(section, &records, as_of)],
                None => performance::classify_all_rolling(&records, as_of),
            };

            if json {
                return print_json(&results);
            }
            for perf in results.iter() {
                let last = perf
                    .last_failure
                    .map(|date| format!(", last failure {}", date.format("%b %Y")))
                    .unwrap_or_default();
                println!(
                    "- {}: {} ({} failures in 3 months{})",
                    perf.section, perf.tier, perf.failure_count_3mo, last
                );
            }
        }
        Commands::Leaderboard { filter, json } => {
            let records = load_records(&connect(&config)?, &cache, &config, filter.refresh).await?;
            let (from, to) = filter.range(today);
            let standings = performance::classify_range(&records, from, to);

            if json {
                return print_json(&standings);
            }
            println!("Section standings from {from} to {to}:");
            for perf in standings.iter() {
                println!(
                    "- {} [{}]: {} non-conformances in {} records",
                    perf.section, perf.tier, perf.failure_count, perf.record_count
                );
            }
        }
        Commands::Summarize { filter, quarterly } => {
            let records = load_records(&connect(&config)?, &cache, &config, filter.refresh).await?;
            let mut series = filter
                .to_filter(Some(RecordStatus::Approved))
                .apply(&records);
            if quarterly {
                series = aggregate::aggregate_by_series(&series);
            }

            let section_label = filter
                .section
                .map(|s| s.label().to_string())
                .unwrap_or_else(|| "all sections".to_string());
            let kpi_label = filter
                .kpi
                .clone()
                .unwrap_or_else(|| "General Operational KPI".to_string());
            println!("{}", narrative::summarize(&series, &section_label, &kpi_label));
        }
        Commands::Late { filter, out } => {
            let records = load_records(&connect(&config)?, &cache, &config, filter.refresh).await?;
            let (from, to) = filter.range(today);
            let scoped = RecordFilter {
                from: None,
                to: None,
                ..filter.to_filter(Some(RecordStatus::Approved))
            }
            .apply(&records);
            let late = lateness::late_submissions(&scoped, from, to);

            match out {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    lateness::write_late_csv(file, &late)?;
                    println!("Wrote {} late submissions to {}.", late.len(), path.display());
                }
                None if late.is_empty() => println!("No late submissions due between {from} and {to}."),
                None => {
                    for record in late.iter() {
                        println!(
                            "- {} / {} / {}: due {}, submitted {} ({} days late)",
                            record.section,
                            record.department,
                            record.kpi_name,
                            record.due_date.map(|d| d.to_string()).unwrap_or_default(),
                            record
                                .date_submitted
                                .map(|d| d.to_string())
                                .unwrap_or_default(),
                            lateness::days_late(record)
                        );
                    }
                }
            }
        }
        Commands::Report { filter, out } => {
            let records = load_records(&connect(&config)?, &cache, &config, filter.refresh).await?;
            let (from, to) = filter.range(today);
            let scoped = RecordFilter {
                from: None,
                to: None,
                ..filter.to_filter(None)
            }
            .apply(&records);
            let scope = filter.kpi.as_deref().or(filter.section.map(|s| s.label()));
            let report = report::build_report(scope, today, from, to, &scoped);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Definitions { section, refresh } => {
            let definitions =
                load_definitions(&connect(&config)?, &cache, &config, refresh).await?;

            for definition in definitions
                .iter()
                .filter(|d| section.map_or(true, |s| d.section == s))
            {
                println!(
                    "- {} / {} [{}]: target {} ({})",
                    definition.section,
                    definition.kpi_name,
                    definition.department.as_deref().unwrap_or("Overall"),
                    definition.target,
                    definition.responsible
                );
            }
        }
        Commands::ClearCache => {
            cache.invalidate(RECORDS_KEY)?;
            cache.invalidate(DEFINITIONS_KEY)?;
            println!("Cache cleared.");
        }
    }

    Ok(())
}
