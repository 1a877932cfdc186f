use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub voting: VotingConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
            voting: VotingConfig::from_env()?,
        })
    }
}

/// Thresholds and periods that drive edit resolution.
///
/// Read fresh on every scheduler tick through [`ConfigHandle`]; an edit is
/// always evaluated against the values current at that tick, not the values
/// in force when it was proposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VotingConfig {
    /// Score at which a pending edit becomes a priority candidate.
    pub vote_promotion_threshold: i64,
    /// Score required before an edit may be applied.
    pub vote_application_threshold: i64,
    /// Minimum time a non-destructive edit stays open; also closes the
    /// evaluation window for every edit.
    pub voting_period: Duration,
    /// Minimum time a destroy/merge edit stays open before it may be accepted.
    pub min_destructive_voting_period: Duration,
    pub vote_cron_interval: Duration,
    /// How many times the creator may revise a pending edit's payload.
    pub edit_update_limit: i32,
    /// Transient apply failures tolerated before an accepted edit is rejected.
    pub max_apply_attempts: i32,
    pub transaction_timeout: Duration,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            vote_promotion_threshold: 10,
            vote_application_threshold: 3,
            voting_period: Duration::from_secs(4 * 24 * 60 * 60),
            min_destructive_voting_period: Duration::from_secs(2 * 24 * 60 * 60),
            vote_cron_interval: Duration::from_secs(5 * 60),
            edit_update_limit: 1,
            max_apply_attempts: 3,
            transaction_timeout: Duration::from_secs(10),
        }
    }
}

impl VotingConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            vote_promotion_threshold: env_or(
                "VOTE_PROMOTION_THRESHOLD",
                defaults.vote_promotion_threshold,
            )?,
            vote_application_threshold: env_or(
                "VOTE_APPLICATION_THRESHOLD",
                defaults.vote_application_threshold,
            )?,
            voting_period: env_secs_or("VOTING_PERIOD_SECS", defaults.voting_period)?,
            min_destructive_voting_period: env_secs_or(
                "MIN_DESTRUCTIVE_VOTING_PERIOD_SECS",
                defaults.min_destructive_voting_period,
            )?,
            vote_cron_interval: env_secs_or(
                "VOTE_CRON_INTERVAL_SECS",
                defaults.vote_cron_interval,
            )?,
            edit_update_limit: env_or("EDIT_UPDATE_LIMIT", defaults.edit_update_limit)?,
            max_apply_attempts: env_or("MAX_APPLY_ATTEMPTS", defaults.max_apply_attempts)?,
            transaction_timeout: env_secs_or(
                "TRANSACTION_TIMEOUT_SECS",
                defaults.transaction_timeout,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vote_application_threshold < 1 {
            bail!("VOTE_APPLICATION_THRESHOLD must be at least 1");
        }
        if self.vote_promotion_threshold < 1 {
            bail!("VOTE_PROMOTION_THRESHOLD must be at least 1");
        }
        if self.edit_update_limit < 0 {
            bail!("EDIT_UPDATE_LIMIT must not be negative");
        }
        if self.max_apply_attempts < 1 {
            bail!("MAX_APPLY_ATTEMPTS must be at least 1");
        }
        if self.vote_cron_interval.is_zero() {
            bail!("VOTE_CRON_INTERVAL_SECS must be positive");
        }
        if self.transaction_timeout.is_zero() {
            bail!("TRANSACTION_TIMEOUT_SECS must be positive");
        }
        Ok(())
    }

    /// End of the evaluation window for an edit.
    pub fn evaluation_window(&self, destructive: bool) -> Duration {
        self.voting_period.max(self.minimum_open_period(destructive))
    }

    /// How long an edit must stay open before it may be accepted.
    pub fn minimum_open_period(&self, destructive: bool) -> Duration {
        if destructive {
            self.min_destructive_voting_period
        } else {
            self.voting_period
        }
    }
}

/// Shared, runtime-replaceable voting configuration.
#[derive(Debug, Clone)]
pub struct ConfigHandle(Arc<RwLock<VotingConfig>>);

impl ConfigHandle {
    pub fn new(config: VotingConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    /// Snapshot of the values currently in force.
    pub fn current(&self) -> VotingConfig {
        match self.0.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, config: VotingConfig) -> Result<()> {
        config.validate()?;
        match self.0.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
        Ok(())
    }

    /// Re-read voting settings from the environment without restarting.
    ///
    /// Values in `.env` override the process environment, so edits to the
    /// file take effect even though the first load already exported them.
    pub fn reload_from_env(&self) -> Result<VotingConfig> {
        let _ = dotenvy::dotenv_override();
        self.reload()
    }

    /// Like [`reload_from_env`](Self::reload_from_env), reading a specific
    /// env file that must exist.
    pub fn reload_from_path(&self, path: impl AsRef<Path>) -> Result<VotingConfig> {
        let path = path.as_ref();
        dotenvy::from_path_override(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        self.reload()
    }

    fn reload(&self) -> Result<VotingConfig> {
        let config = VotingConfig::from_env()?;
        self.replace(config.clone())?;
        tracing::info!(?config, "Voting configuration reloaded");
        Ok(config)
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        Err(_) => Ok(default),
    }
}

fn env_secs_or(key: &str, default: Duration) -> Result<Duration> {
    env_or(key, default.as_secs()).map(Duration::from_secs)
}
