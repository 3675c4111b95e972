use std::path::PathBuf;

use anyhow::Context;
use chrono::Duration;

pub const DEFAULT_MASTER_KEY: &str = "osmakqa123";
pub const DEFAULT_CACHE_TTL_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub master_key: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let cache_ttl_secs = match lookup("KPI_CACHE_TTL_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .with_context(|| format!("KPI_CACHE_TTL_SECS is not a number: {raw}"))?,
            None => DEFAULT_CACHE_TTL_SECS,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL"),
            cache_dir: lookup("KPI_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("kpi-conformance")),
            cache_ttl: Duration::try_seconds(cache_ttl_secs.max(0))
                .with_context(|| format!("KPI_CACHE_TTL_SECS is out of range: {cache_ttl_secs}"))?,
            master_key: lookup("KPI_MASTER_KEY").unwrap_or_else(|| DEFAULT_MASTER_KEY.to_string()),
        })
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}
