use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::env::{get_env_with_prefix, parse_env};

/// Configuration injected into the engine, scanner, jobs and file service.
///
/// Every value has a default, so `LifecycleConfig::default()` is usable as-is.
/// Use [`LifecycleConfigBuilder::from_env`] to pick up deployment overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LifecycleConfig {
    /// Days a tenant may stay in GRACE_PERIOD before forced suspension
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: u32,

    /// Days a tenant stays SUSPENDED before it is archived
    #[serde(default = "default_suspension_to_archive_days")]
    pub suspension_to_archive_days: u32,

    /// Retention applied to uploads that don't specify one (~7 years)
    #[serde(default = "default_file_retention_days")]
    pub default_file_retention_days: u32,

    /// How many days before forced suspension the warning email goes out
    #[serde(default = "default_grace_warning_days")]
    pub grace_warning_days: u32,

    /// Length of the trial granted at signup
    #[serde(default = "default_trial_days")]
    pub trial_days: u32,

    /// Upper bound on any single repository, blob store, ledger or mailer call
    #[serde(default = "default_operation_timeout_seconds")]
    pub operation_timeout_seconds: u64,

    /// How long a job invocation may hold its lease before it is considered dead
    #[serde(default = "default_job_lease_seconds")]
    pub job_lease_seconds: u64,

    /// Items processed concurrently within one job invocation
    #[serde(default = "default_job_concurrency")]
    pub job_concurrency: usize,

    /// Lifetime of presigned download URLs
    #[serde(default = "default_presigned_url_ttl_seconds")]
    pub presigned_url_ttl_seconds: u64,

    /// Bucket new uploads are written to
    #[serde(default = "default_files_bucket")]
    pub files_bucket: String,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sender identity and links used when rendering notification emails.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default = "default_product_name")]
    pub product_name: String,
    #[serde(default = "default_app_url")]
    pub app_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_json")]
    pub json: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_days: default_grace_period_days(),
            suspension_to_archive_days: default_suspension_to_archive_days(),
            default_file_retention_days: default_file_retention_days(),
            grace_warning_days: default_grace_warning_days(),
            trial_days: default_trial_days(),
            operation_timeout_seconds: default_operation_timeout_seconds(),
            job_lease_seconds: default_job_lease_seconds(),
            job_concurrency: default_job_concurrency(),
            presigned_url_ttl_seconds: default_presigned_url_ttl_seconds(),
            files_bucket: default_files_bucket(),
            email: EmailConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from_address: default_from_address(),
            product_name: default_product_name(),
            app_url: default_app_url(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_json(),
        }
    }
}

fn default_grace_period_days() -> u32 {
    7
}

fn default_suspension_to_archive_days() -> u32 {
    30
}

fn default_file_retention_days() -> u32 {
    2555
}

fn default_grace_warning_days() -> u32 {
    2
}

fn default_trial_days() -> u32 {
    14
}

fn default_operation_timeout_seconds() -> u64 {
    10
}

fn default_job_lease_seconds() -> u64 {
    3600
}

fn default_job_concurrency() -> usize {
    4
}

fn default_presigned_url_ttl_seconds() -> u64 {
    3600
}

fn default_files_bucket() -> String {
    "taxflow-files".to_string()
}

fn default_from_address() -> String {
    "noreply@taxflow.app".to_string()
}

fn default_product_name() -> String {
    "TaxFlow".to_string()
}

fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json() -> bool {
    false
}

impl LifecycleConfig {
    pub fn builder() -> LifecycleConfigBuilder {
        LifecycleConfigBuilder::new()
    }

    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.grace_period_days))
    }

    pub fn suspension_to_archive(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.suspension_to_archive_days))
    }

    pub fn trial_period(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.trial_days))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_seconds)
    }

    pub fn job_lease(&self) -> Duration {
        Duration::from_secs(self.job_lease_seconds)
    }

    pub fn presigned_url_ttl(&self) -> Duration {
        Duration::from_secs(self.presigned_url_ttl_seconds)
    }
}

/// Builder for LifecycleConfig with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct LifecycleConfigBuilder {
    config: LifecycleConfig,
}

impl LifecycleConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LifecycleConfig::default(),
        }
    }

    pub fn with_grace_period_days(mut self, days: u32) -> Self {
        self.config.grace_period_days = days;
        self
    }

    pub fn with_suspension_to_archive_days(mut self, days: u32) -> Self {
        self.config.suspension_to_archive_days = days;
        self
    }

    pub fn with_default_file_retention_days(mut self, days: u32) -> Self {
        self.config.default_file_retention_days = days;
        self
    }

    pub fn with_grace_warning_days(mut self, days: u32) -> Self {
        self.config.grace_warning_days = days;
        self
    }

    pub fn with_trial_days(mut self, days: u32) -> Self {
        self.config.trial_days = days;
        self
    }

    pub fn with_operation_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.operation_timeout_seconds = seconds;
        self
    }

    pub fn with_job_lease_seconds(mut self, seconds: u64) -> Self {
        self.config.job_lease_seconds = seconds;
        self
    }

    pub fn with_job_concurrency(mut self, concurrency: usize) -> Self {
        self.config.job_concurrency = concurrency;
        self
    }

    pub fn with_files_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.files_bucket = bucket.into();
        self
    }

    pub fn with_email(mut self, email: EmailConfig) -> Self {
        self.config.email = email;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    /// Load configuration from environment variables (TAXFLOW_ prefix optional)
    pub fn from_env(mut self) -> Self {
        if let Some(days) = parse_env("GRACE_PERIOD_DAYS") {
            self.config.grace_period_days = days;
        }
        if let Some(days) = parse_env("SUSPENSION_TO_ARCHIVE_DAYS") {
            self.config.suspension_to_archive_days = days;
        }
        if let Some(days) = parse_env("DEFAULT_FILE_RETENTION_DAYS") {
            self.config.default_file_retention_days = days;
        }
        if let Some(days) = parse_env("GRACE_WARNING_DAYS") {
            self.config.grace_warning_days = days;
        }
        if let Some(days) = parse_env("TRIAL_DAYS") {
            self.config.trial_days = days;
        }
        if let Some(seconds) = parse_env("OPERATION_TIMEOUT_SECONDS") {
            self.config.operation_timeout_seconds = seconds;
        }
        if let Some(seconds) = parse_env("JOB_LEASE_SECONDS") {
            self.config.job_lease_seconds = seconds;
        }
        if let Some(concurrency) = parse_env("JOB_CONCURRENCY") {
            self.config.job_concurrency = concurrency;
        }
        if let Some(seconds) = parse_env("PRESIGNED_URL_TTL_SECONDS") {
            self.config.presigned_url_ttl_seconds = seconds;
        }
        if let Some(bucket) = get_env_with_prefix("FILES_BUCKET") {
            self.config.files_bucket = bucket;
        }
        if let Some(from) = get_env_with_prefix("FROM_EMAIL") {
            self.config.email.from_address = from;
        }
        if let Some(url) = get_env_with_prefix("APP_URL") {
            self.config.email.app_url = url;
        }
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = get_env_with_prefix("LOG_JSON") {
            self.config.logging.json = json.parse().unwrap_or(false);
        }

        self
    }

    /// Build the configuration, validating all settings
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if any window is zero, the warning window is not
    /// shorter than the grace window, or the log level is unknown.
    pub fn build(self) -> crate::error::Result<LifecycleConfig> {
        let config = self.config;

        if config.grace_period_days == 0 {
            return Err(crate::error::LifecycleError::bad_request(
                "Grace period must be at least 1 day",
            ));
        }

        if config.suspension_to_archive_days == 0 {
            return Err(crate::error::LifecycleError::bad_request(
                "Suspension-to-archive window must be at least 1 day",
            ));
        }

        if config.default_file_retention_days == 0 {
            return Err(crate::error::LifecycleError::bad_request(
                "Default file retention must be at least 1 day",
            ));
        }

        if config.grace_warning_days == 0 || config.grace_warning_days >= config.grace_period_days {
            return Err(crate::error::LifecycleError::bad_request(format!(
                "Grace warning window must be between 1 and {} days, got {}",
                config.grace_period_days.saturating_sub(1),
                config.grace_warning_days
            )));
        }

        if config.operation_timeout_seconds == 0 {
            return Err(crate::error::LifecycleError::bad_request(
                "Operation timeout must be greater than 0",
            ));
        }

        if config.job_lease_seconds == 0 {
            return Err(crate::error::LifecycleError::bad_request(
                "Job lease must be greater than 0",
            ));
        }

        if config.job_concurrency == 0 {
            return Err(crate::error::LifecycleError::bad_request(
                "Job concurrency must be greater than 0",
            ));
        }

        if config.files_bucket.trim().is_empty() {
            return Err(crate::error::LifecycleError::bad_request(
                "Files bucket must not be empty",
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(crate::error::LifecycleError::bad_request(format!(
                "Invalid log level: {}. Must be one of: {}",
                config.logging.level,
                valid_log_levels.join(", ")
            )));
        }

        Ok(config)
    }
}

impl Default for LifecycleConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
