//! Application configuration loaded from the environment.
//!
//! `from_env` reads process variables (after `.env` has been loaded by the
//! binary). Every key is optional and falls back to a default; a value that
//! is present but malformed is a configuration error.
//!
//! Supported variables:
//! - `DATABASE_URL`, `LOG_DIR`
//! - `QUEUE_BACKEND` (`distributed` | `inprocess`), `QUEUE_BROKER_URL`,
//!   `QUEUE_CONCURRENCY`, `QUEUE_POLL_INTERVAL_MS`, `QUEUE_JOB_TIMEOUT_SECS`,
//!   `QUEUE_RETRY_JOB_ATTEMPTS`, `QUEUE_BACKOFF_BASE_MS`, `QUEUE_BACKOFF_MAX_MS`,
//!   `QUEUE_COMPLETED_RETENTION_SECS`, `QUEUE_COMPLETED_RETENTION_COUNT`,
//!   `QUEUE_FAILED_RETENTION_SECS`, `QUEUE_PRUNE_INTERVAL_SECS`
//! - `RETRY_SWEEP_CRON`, `RETRY_SWEEP_STALE_PENDING_SECS`
//! - `SMTP_ENABLED`, `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`,
//!   `SMTP_STARTTLS`, `SMTP_FROM`, `SMTP_TIMEOUT_SECS`
//! - `SMS_ENABLED`, `SMS_GATEWAY_URL`, `SMS_API_TOKEN`, `SMS_SENDER_ID`,
//!   `SMS_TIMEOUT_SECS`
//! - `PUSH_ENABLED`, `PUSH_GATEWAY_URL`, `PUSH_API_KEY`, `PUSH_TIMEOUT_SECS`
//! - `IN_APP_ENABLED`

use std::str::FromStr;

use crate::domain::JobRetryPolicy;
use crate::notification::{ChannelsConfig, EmailConfig, PushConfig, SmsConfig};
use crate::queue::{QueueConfig, QueueMode, RetentionPolicy};
use crate::scheduler::DEFAULT_SWEEP_CRON;
use crate::usecases::DEFAULT_STALE_PENDING;
use crate::{Error, Result};

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: String,
    pub retry_sweep_cron: String,
    /// Seconds an alert may stay `PENDING` before the sweep reclaims it.
    pub stale_pending_secs: u64,
    pub queue: QueueConfig,
    pub channels: ChannelsConfig,
}

fn default_database_url() -> String {
    "sqlite:fieldops-alerts.db?mode=rwc".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            log_dir: default_log_dir(),
            retry_sweep_cron: DEFAULT_SWEEP_CRON.to_string(),
            stale_pending_secs: DEFAULT_STALE_PENDING.as_secs(),
            queue: QueueConfig::default(),
            channels: ChannelsConfig {
                in_app_enabled: true,
                ..Default::default()
            },
        }
    }
}

impl AppConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = Self::default();
        let queue_defaults = defaults.queue;
        let retry_defaults = queue_defaults.retry_policy.clone();
        let retention_defaults = queue_defaults.retention.clone();

        let mode = match env.string("QUEUE_BACKEND") {
            Some(raw) => QueueMode::parse(&raw).ok_or_else(|| {
                Error::config(format!(
                    "QUEUE_BACKEND must be 'distributed' or 'inprocess', got '{raw}'"
                ))
            })?,
            None => queue_defaults.mode,
        };

        let queue = QueueConfig {
            mode,
            broker_url: env.string("QUEUE_BROKER_URL").unwrap_or(queue_defaults.broker_url),
            concurrency: env.parse("QUEUE_CONCURRENCY")?.unwrap_or(queue_defaults.concurrency),
            poll_interval_ms: env
                .parse("QUEUE_POLL_INTERVAL_MS")?
                .unwrap_or(queue_defaults.poll_interval_ms),
            job_timeout_secs: env
                .parse("QUEUE_JOB_TIMEOUT_SECS")?
                .unwrap_or(queue_defaults.job_timeout_secs),
            retry_policy: JobRetryPolicy {
                retry_job_attempts: env
                    .parse("QUEUE_RETRY_JOB_ATTEMPTS")?
                    .unwrap_or(retry_defaults.retry_job_attempts),
                backoff_base_ms: env
                    .parse("QUEUE_BACKOFF_BASE_MS")?
                    .unwrap_or(retry_defaults.backoff_base_ms),
                backoff_max_ms: env
                    .parse("QUEUE_BACKOFF_MAX_MS")?
                    .unwrap_or(retry_defaults.backoff_max_ms),
                use_jitter: retry_defaults.use_jitter,
            },
            retention: RetentionPolicy {
                completed_max_age_secs: env
                    .parse("QUEUE_COMPLETED_RETENTION_SECS")?
                    .unwrap_or(retention_defaults.completed_max_age_secs),
                completed_max_count: env
                    .parse("QUEUE_COMPLETED_RETENTION_COUNT")?
                    .unwrap_or(retention_defaults.completed_max_count),
                failed_max_age_secs: env
                    .parse("QUEUE_FAILED_RETENTION_SECS")?
                    .unwrap_or(retention_defaults.failed_max_age_secs),
                prune_interval_secs: env
                    .parse("QUEUE_PRUNE_INTERVAL_SECS")?
                    .unwrap_or(retention_defaults.prune_interval_secs),
            },
        };
        if queue.concurrency == 0 {
            return Err(Error::config("QUEUE_CONCURRENCY must be at least 1"));
        }

        let email_defaults = EmailConfig::default();
        let email = EmailConfig {
            enabled: env.flag("SMTP_ENABLED")?.unwrap_or(email_defaults.enabled),
            smtp_host: env.string("SMTP_HOST").unwrap_or(email_defaults.smtp_host),
            smtp_port: env.parse("SMTP_PORT")?.unwrap_or(email_defaults.smtp_port),
            smtp_username: env.string("SMTP_USERNAME"),
            smtp_password: env.string("SMTP_PASSWORD"),
            use_starttls: env.flag("SMTP_STARTTLS")?.unwrap_or(email_defaults.use_starttls),
            from_address: env.string("SMTP_FROM").unwrap_or(email_defaults.from_address),
            timeout_secs: env
                .parse("SMTP_TIMEOUT_SECS")?
                .unwrap_or(email_defaults.timeout_secs),
        };

        let sms_defaults = SmsConfig::default();
        let sms = SmsConfig {
            enabled: env.flag("SMS_ENABLED")?.unwrap_or(sms_defaults.enabled),
            gateway_url: env.string("SMS_GATEWAY_URL").unwrap_or(sms_defaults.gateway_url),
            api_token: env.string("SMS_API_TOKEN"),
            sender_id: env.string("SMS_SENDER_ID").unwrap_or(sms_defaults.sender_id),
            timeout_secs: env.parse("SMS_TIMEOUT_SECS")?.unwrap_or(sms_defaults.timeout_secs),
        };

        let push_defaults = PushConfig::default();
        let push = PushConfig {
            enabled: env.flag("PUSH_ENABLED")?.unwrap_or(push_defaults.enabled),
            gateway_url: env.string("PUSH_GATEWAY_URL").unwrap_or(push_defaults.gateway_url),
            api_key: env.string("PUSH_API_KEY"),
            timeout_secs: env.parse("PUSH_TIMEOUT_SECS")?.unwrap_or(push_defaults.timeout_secs),
        };

        let retry_sweep_cron = env
            .string("RETRY_SWEEP_CRON")
            .unwrap_or(defaults.retry_sweep_cron);
        cron::Schedule::from_str(&retry_sweep_cron).map_err(|e| {
            Error::config(format!("RETRY_SWEEP_CRON '{retry_sweep_cron}' is invalid: {e}"))
        })?;

        Ok(Self {
            database_url: env.string("DATABASE_URL").unwrap_or(defaults.database_url),
            log_dir: env.string("LOG_DIR").unwrap_or(defaults.log_dir),
            retry_sweep_cron,
            stale_pending_secs: env
                .parse("RETRY_SWEEP_STALE_PENDING_SECS")?
                .unwrap_or(defaults.stale_pending_secs),
            queue,
            channels: ChannelsConfig {
                email,
                sms,
                push,
                in_app_enabled: env
                    .flag("IN_APP_ENABLED")?
                    .unwrap_or(defaults.channels.in_app_enabled),
            },
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| Error::config(format!("{key}='{raw}' is invalid: {e}")))
            })
            .transpose()
    }

    fn flag(&self, key: &str) -> Result<Option<bool>> {
        self.string(key)
            .map(|raw| match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(Error::config(format!("{key}='{raw}' is not a boolean"))),
            })
            .transpose()
    }
}
