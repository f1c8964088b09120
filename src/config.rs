use std::env;
use std::str::FromStr;

use crate::domain::entities::SlaDefaults;
use crate::infrastructure::workers::QueueSettings;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub otel_exporter_endpoint: Option<String>,
    pub service_name: String,
    pub metrics_port: u16,
    pub worker_count: usize,
    pub job_max_attempts: i64,
    pub job_retry_backoff_secs: i64,
    pub job_lock_timeout_secs: i64,
    pub sla_defaults: SlaDefaults,
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://ticketcore.db?mode=rwc".to_string());

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let otel_exporter_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();

        let service_name = env::var("SERVICE_NAME").unwrap_or_else(|_| "ticketcore".to_string());

        let metrics_port = parse_or("METRICS_PORT", 9000)?;

        let worker_count = parse_or("WORKER_COUNT", 2usize)?;
        if worker_count == 0 {
            return Err(ConfigError::Invalid("WORKER_COUNT"));
        }

        let job_max_attempts = parse_or("JOB_MAX_ATTEMPTS", 5i64)?;
        if job_max_attempts < 1 {
            return Err(ConfigError::Invalid("JOB_MAX_ATTEMPTS"));
        }

        let defaults = SlaDefaults::default();
        let sla_defaults = SlaDefaults {
            low_minutes: parse_or("SLA_DEFAULT_LOW_MINUTES", defaults.low_minutes)?,
            medium_minutes: parse_or("SLA_DEFAULT_MEDIUM_MINUTES", defaults.medium_minutes)?,
            high_minutes: parse_or("SLA_DEFAULT_HIGH_MINUTES", defaults.high_minutes)?,
            urgent_minutes: parse_or("SLA_DEFAULT_URGENT_MINUTES", defaults.urgent_minutes)?,
        };

        Ok(Config {
            database_url,
            server_host,
            server_port,
            otel_exporter_endpoint,
            service_name,
            metrics_port,
            worker_count,
            job_max_attempts,
            job_retry_backoff_secs: parse_or("JOB_RETRY_BACKOFF_SECS", 30)?,
            job_lock_timeout_secs: parse_or("JOB_LOCK_TIMEOUT_SECS", 300)?,
            sla_defaults,
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            max_attempts: self.job_max_attempts,
            retry_backoff: chrono::Duration::seconds(self.job_retry_backoff_secs),
            lock_timeout: chrono::Duration::seconds(self.job_lock_timeout_secs),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid value for {0}")]
    Invalid(&'static str),
}
