//! Service configuration from environment variables.
//!
//! Variables set in the process environment win; a `.env` file in the
//! working directory fills in whatever is left unset.

use std::collections::HashMap;
use std::io::Read;
use std::str::FromStr;
use std::time::Duration;

use tasksvc_jobs::{PolicyError, RetryPolicy};

pub const DEFAULT_QUEUE_NAME: &str = "tasksvc";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("invalid retry policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("failed to read .env file: {0}")]
    Dotenv(String),
    #[error("{var} must be set: {reason}")]
    Missing {
        var: &'static str,
        reason: &'static str,
    },
}

/// Runtime configuration for the service binary.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub retry: RetryPolicy,
    /// Postgres URL; `None` selects the in-memory store
    pub database_url: Option<String>,
    /// Redis URL; `None` selects the in-memory queue
    pub redis_url: Option<String>,
    pub queue_name: String,
    /// Stable consumer id for this process's Redis processing list; must be
    /// unique among live processes. `None` generates one per start, which
    /// disables crash recovery across restarts.
    pub worker_id: Option<String>,
    /// Worker loops embedded in this process; 0 runs the API only
    pub worker_concurrency: usize,
    pub bind_addr: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            database_url: None,
            redis_url: None,
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            worker_id: None,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Process environment, then `.env` in the working directory if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_and_dotenv(|var| std::env::var(var).ok(), dotenvy::dotenv_iter())
    }

    fn from_env_and_dotenv<F, R>(
        lookup: F,
        dotenv: dotenvy::Result<dotenvy::Iter<R>>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
        R: Read,
    {
        let mut file_vars = HashMap::new();
        match dotenv {
            Ok(entries) => {
                for entry in entries {
                    let (key, value) = entry.map_err(|e| ConfigError::Dotenv(e.to_string()))?;
                    file_vars.insert(key, value);
                }
            }
            Err(e) if e.not_found() => {}
            Err(e) => return Err(ConfigError::Dotenv(e.to_string())),
        }

        Self::from_lookup(|var| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .or_else(|| file_vars.get(var).cloned())
        })
    }

    /// A standalone worker shares nothing with the API process except the
    /// queue and the store, so both must be external.
    pub fn require_shared_backends(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_none() {
            return Err(ConfigError::Missing {
                var: "REDIS_URL",
                reason: "a standalone worker needs the shared queue",
            });
        }
        if self.database_url.is_none() {
            return Err(ConfigError::Missing {
                var: "DATABASE_URL",
                reason: "a standalone worker needs the shared job store",
            });
        }
        Ok(())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();
        let default_policy = defaults.retry;

        let max_attempts = parse(&get, "MAX_RETRIES", default_policy.max_attempts)?;
        let base_delay_secs = parse(
            &get,
            "BASE_DELAY",
            default_policy.base_delay.as_secs_f64(),
        )?;
        let backoff = parse(&get, "BACKOFF", default_policy.backoff_multiplier)?;
        let jitter_ratio = parse(&get, "JITTER_RATIO", default_policy.jitter_ratio)?;

        let base_delay = Duration::try_from_secs_f64(base_delay_secs).map_err(|_| {
            ConfigError::Invalid {
                var: "BASE_DELAY",
                value: base_delay_secs.to_string(),
            }
        })?;
        let retry = RetryPolicy::new(max_attempts, base_delay, backoff, jitter_ratio)?;

        Ok(Self {
            retry,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            queue_name: get("QUEUE_NAME").unwrap_or(defaults.queue_name),
            worker_id: get("WORKER_ID"),
            worker_concurrency: parse(&get, "WORKER_CONCURRENCY", defaults.worker_concurrency)?,
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
        })
    }
}

fn parse<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg, ServiceConfig::default());
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(200));
        assert_eq!(cfg.queue_name, "tasksvc");
        assert_eq!(cfg.bind_addr, "0.0.0.0:8000");
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = config(&[
            ("MAX_RETRIES", "3"),
            ("BASE_DELAY", "0.5"),
            ("BACKOFF", "3"),
            ("JITTER_RATIO", "0.1"),
            ("DATABASE_URL", "postgres://localhost/tasksvc"),
            ("REDIS_URL", "redis://localhost:6379/0"),
            ("QUEUE_NAME", "jobs"),
            ("WORKER_ID", "pod-7"),
            ("WORKER_CONCURRENCY", "0"),
            ("BIND_ADDR", "127.0.0.1:9000"),
        ])
        .unwrap();

        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(500));
        assert_eq!(cfg.retry.backoff_multiplier, 3.0);
        assert_eq!(cfg.retry.jitter_ratio, 0.1);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/tasksvc"));
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://localhost:6379/0"));
        assert_eq!(cfg.queue_name, "jobs");
        assert_eq!(cfg.worker_id.as_deref(), Some("pod-7"));
        assert_eq!(cfg.worker_concurrency, 0);
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
    }

    #[test]
    fn blank_values_count_as_unset() {
        let cfg = config(&[("DATABASE_URL", "  "), ("MAX_RETRIES", "")]).unwrap();
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.retry.max_attempts, 5);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert_eq!(
            config(&[("MAX_RETRIES", "five")]),
            Err(ConfigError::Invalid {
                var: "MAX_RETRIES",
                value: "five".into()
            })
        );
        assert!(matches!(
            config(&[("WORKER_CONCURRENCY", "-1")]),
            Err(ConfigError::Invalid { var: "WORKER_CONCURRENCY", .. })
        ));
    }

    fn write_dotenv(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "tasksvc-config-{}.env",
            tasksvc_core::JobId::new()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn dotenv_fills_in_unset_variables() {
        let path = write_dotenv("MAX_RETRIES=2\nQUEUE_NAME=from-file\nBIND_ADDR=127.0.0.1:1\n");
        let env: HashMap<&str, &str> = [("BIND_ADDR", "127.0.0.1:2"), ("QUEUE_NAME", " ")].into();

        let cfg = ServiceConfig::from_env_and_dotenv(
            |var| env.get(var).map(|v| v.to_string()),
            dotenvy::from_path_iter(&path),
        )
        .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(cfg.retry.max_attempts, 2);
        assert_eq!(cfg.queue_name, "from-file");
        // The process environment wins over the file.
        assert_eq!(cfg.bind_addr, "127.0.0.1:2");
    }

    #[test]
    fn missing_dotenv_file_is_ignored() {
        let missing = std::env::temp_dir().join("tasksvc-config-does-not-exist.env");
        let cfg = ServiceConfig::from_env_and_dotenv(|_| None, dotenvy::from_path_iter(missing))
            .unwrap();
        assert_eq!(cfg, ServiceConfig::default());
    }

    #[test]
    fn malformed_dotenv_file_is_an_error() {
        let path = write_dotenv("MAX_RETRIES='unterminated\n");
        let result = ServiceConfig::from_env_and_dotenv(|_| None, dotenvy::from_path_iter(&path));
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(ConfigError::Dotenv(_))));
    }

    #[test]
    fn standalone_worker_needs_queue_and_store() {
        let only_redis = config(&[("REDIS_URL", "redis://localhost:6379/0")]).unwrap();
        assert!(matches!(
            only_redis.require_shared_backends(),
            Err(ConfigError::Missing { var: "DATABASE_URL", .. })
        ));

        let only_db = config(&[("DATABASE_URL", "postgres://localhost/tasksvc")]).unwrap();
        assert!(matches!(
            only_db.require_shared_backends(),
            Err(ConfigError::Missing { var: "REDIS_URL", .. })
        ));

        let both = config(&[
            ("REDIS_URL", "redis://localhost:6379/0"),
            ("DATABASE_URL", "postgres://localhost/tasksvc"),
        ])
        .unwrap();
        assert!(both.require_shared_backends().is_ok());
    }

    #[test]
    fn out_of_range_policy_is_rejected() {
        assert!(matches!(config(&[("MAX_RETRIES", "0")]), Err(ConfigError::Policy(_))));
        assert!(matches!(config(&[("BACKOFF", "0.5")]), Err(ConfigError::Policy(_))));
    }
}
