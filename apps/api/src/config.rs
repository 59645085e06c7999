use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::analysis::orchestrator::{default_pool_size, MAX_POOL_SIZE};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    /// Unset means completion events only go to the log.
    pub notify_webhook_url: Option<String>,
    pub analysis: AnalysisSettings,
}

/// Which classifier splits resume text into buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierKind {
    Heading,
    Llm,
}

impl FromStr for ClassifierKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heading" => Ok(ClassifierKind::Heading),
            "llm" => Ok(ClassifierKind::Llm),
            other => bail!("unknown classifier '{other}' (expected 'heading' or 'llm')"),
        }
    }
}

/// Tunables for the analysis pipeline.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub lock_ttl: Duration,
    pub lock_renew_interval: Duration,
    pub cancel_ttl: Duration,
    pub cancel_poll_interval: Duration,
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// `None` uses the core-count default.
    pub max_workers: Option<usize>,
    pub inference_timeout: Duration,
    pub llm_max_retries: u32,
    pub transient_retries: u32,
    pub classifier: ClassifierKind,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(300),
            lock_renew_interval: Duration::from_secs(60),
            cancel_ttl: Duration::from_secs(60),
            cancel_poll_interval: Duration::from_millis(1000),
            batch_size: 50,
            flush_interval: Duration::from_millis(2000),
            max_workers: None,
            inference_timeout: Duration::from_secs(30),
            llm_max_retries: 0,
            transient_retries: 0,
            classifier: ClassifierKind::Heading,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: env_or("PORT", 8080u16)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            notify_webhook_url: optional_env("NOTIFY_WEBHOOK_URL"),
            analysis: AnalysisSettings::from_env()?,
        })
    }
}

impl AnalysisSettings {
    pub fn from_env() -> Result<Self> {
        let defaults = AnalysisSettings::default();

        let settings = AnalysisSettings {
            lock_ttl: Duration::from_secs(env_or("ANALYSIS_LOCK_TTL_SECS", 300)?),
            lock_renew_interval: Duration::from_secs(env_or("ANALYSIS_LOCK_RENEW_SECS", 60)?),
            cancel_ttl: Duration::from_secs(env_or("ANALYSIS_CANCEL_TTL_SECS", 60)?),
            cancel_poll_interval: Duration::from_millis(env_or("ANALYSIS_CANCEL_POLL_MS", 1000)?),
            batch_size: env_or("ANALYSIS_BATCH_SIZE", defaults.batch_size)?,
            flush_interval: Duration::from_millis(env_or("ANALYSIS_FLUSH_INTERVAL_MS", 2000)?),
            max_workers: optional_env("ANALYSIS_MAX_WORKERS")
                .map(|v| v.parse::<usize>())
                .transpose()
                .context("ANALYSIS_MAX_WORKERS must be a positive integer")?,
            inference_timeout: Duration::from_secs(env_or("INFERENCE_TIMEOUT_SECS", 30)?),
            llm_max_retries: env_or("LLM_MAX_RETRIES", defaults.llm_max_retries)?,
            transient_retries: env_or("ANALYSIS_TRANSIENT_RETRIES", defaults.transient_retries)?,
            classifier: env_or("ANALYSIS_CLASSIFIER", defaults.classifier)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Worker pool size: the override if set, never above `MAX_POOL_SIZE`.
    pub fn pool_size(&self) -> usize {
        self.max_workers
            .map(|n| n.min(MAX_POOL_SIZE))
            .unwrap_or_else(default_pool_size)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("ANALYSIS_BATCH_SIZE must be at least 1");
        }
        if self.max_workers == Some(0) {
            bail!("ANALYSIS_MAX_WORKERS must be at least 1");
        }
        if self.lock_renew_interval >= self.lock_ttl {
            bail!(
                "ANALYSIS_LOCK_RENEW_SECS ({}s) must be shorter than ANALYSIS_LOCK_TTL_SECS ({}s)",
                self.lock_renew_interval.as_secs(),
                self.lock_ttl.as_secs()
            );
        }
        if self.cancel_poll_interval.is_zero() || self.flush_interval.is_zero() {
            bail!("ANALYSIS_CANCEL_POLL_MS and ANALYSIS_FLUSH_INTERVAL_MS must be positive");
        }
        Ok(())
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} has invalid value '{raw}': {e}")),
        None => Ok(default),
    }
}
