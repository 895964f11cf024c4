//! Service configuration from environment variables
//!
//! Everything has a sensible default; deployments override via env.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::judge::JudgeOptions;
use crate::orchestrator::OrchestratorConfig;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Workers kept alive even when the queue is empty
    pub min_workers: usize,
    pub max_workers: usize,
    /// Queue depth above which an extra worker is spawned
    pub scale_up_queue_threshold: usize,
    /// Extra workers retire after this long without a dequeue
    pub worker_idle_timeout: Duration,
    pub scale_check_interval: Duration,

    pub provision_max_attempts: u32,
    pub provision_backoff_base_ms: u64,
    pub sandbox_idle_ttl: Duration,
    pub reaper_interval: Duration,
    pub compile_time_limit_ms: u32,
    pub compile_memory_limit_bytes: u64,

    pub stop_on_first_failure: bool,
    pub collapse_empty_lines: bool,

    pub event_channel_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 8,
            scale_up_queue_threshold: 4,
            worker_idle_timeout: Duration::from_secs(60),
            scale_check_interval: Duration::from_secs(5),
            provision_max_attempts: 4,
            provision_backoff_base_ms: 100,
            sandbox_idle_ttl: Duration::from_secs(300),
            reaper_interval: Duration::from_secs(30),
            compile_time_limit_ms: 30_000,
            compile_memory_limit_bytes: 2048 * 1024 * 1024,
            stop_on_first_failure: true,
            collapse_empty_lines: false,
            event_channel_capacity: 256,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_workers: env_parse("MIN_WORKERS", defaults.min_workers),
            max_workers: env_parse("MAX_WORKERS", defaults.max_workers),
            scale_up_queue_threshold: env_parse(
                "SCALE_UP_QUEUE_THRESHOLD",
                defaults.scale_up_queue_threshold,
            ),
            worker_idle_timeout: Duration::from_secs(env_parse(
                "WORKER_IDLE_TIMEOUT_SECS",
                defaults.worker_idle_timeout.as_secs(),
            )),
            scale_check_interval: Duration::from_secs(env_parse(
                "SCALE_CHECK_INTERVAL_SECS",
                defaults.scale_check_interval.as_secs(),
            )),
            provision_max_attempts: env_parse(
                "PROVISION_MAX_ATTEMPTS",
                defaults.provision_max_attempts,
            ),
            provision_backoff_base_ms: env_parse(
                "PROVISION_BACKOFF_BASE_MS",
                defaults.provision_backoff_base_ms,
            ),
            sandbox_idle_ttl: Duration::from_secs(env_parse(
                "SANDBOX_IDLE_TTL_SECS",
                defaults.sandbox_idle_ttl.as_secs(),
            )),
            reaper_interval: Duration::from_secs(env_parse(
                "REAPER_INTERVAL_SECS",
                defaults.reaper_interval.as_secs(),
            )),
            compile_time_limit_ms: env_parse(
                "COMPILE_TIME_LIMIT_MS",
                defaults.compile_time_limit_ms,
            ),
            compile_memory_limit_bytes: env_parse(
                "COMPILE_MEMORY_LIMIT_BYTES",
                defaults.compile_memory_limit_bytes,
            ),
            stop_on_first_failure: env_parse(
                "STOP_ON_FIRST_FAILURE",
                defaults.stop_on_first_failure,
            ),
            collapse_empty_lines: env_parse(
                "COLLAPSE_EMPTY_LINES",
                defaults.collapse_empty_lines,
            ),
            event_channel_capacity: env_parse(
                "EVENT_CHANNEL_CAPACITY",
                defaults.event_channel_capacity,
            ),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            provision_max_attempts: self.provision_max_attempts,
            provision_backoff_base_ms: self.provision_backoff_base_ms,
            sandbox_idle_ttl: self.sandbox_idle_ttl,
            reaper_interval: self.reaper_interval,
            compile_time_limit_ms: self.compile_time_limit_ms,
            compile_memory_limit_bytes: self.compile_memory_limit_bytes,
        }
    }

    pub fn judge_options(&self) -> JudgeOptions {
        JudgeOptions {
            stop_on_first_failure: self.stop_on_first_failure,
            collapse_empty_lines: self.collapse_empty_lines,
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Invalid {}={:?}, using default {}", key, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = ServiceConfig::default();
        assert!(config.min_workers <= config.max_workers);
        assert!(config.scale_up_queue_threshold > 0);
        assert!(config.compile_time_limit_ms > 0);
        assert!(config.event_channel_capacity > 0);
    }

    #[test]
    fn test_orchestrator_config_mirrors_service_config() {
        let config = ServiceConfig::default();
        let orch = config.orchestrator_config();
        assert_eq!(orch.sandbox_idle_ttl, config.sandbox_idle_ttl);
        assert_eq!(orch.compile_time_limit_ms, config.compile_time_limit_ms);
    }
}
