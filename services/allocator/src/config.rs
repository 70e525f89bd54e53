use std::time::Duration;

use anyhow::Result;

use crate::rm::RmClientConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// Store connection URL.
    pub store_url: String,

    /// Fallback log level when RUST_LOG is unset.
    pub log_level: String,

    /// Record staleness window applied on every registry write.
    pub allocation_ttl: Duration,

    /// How often the intake worker drains the queue.
    pub intake_interval: Duration,

    /// How often the janitor reclaims expired records.
    pub janitor_interval: Duration,

    /// Whether the janitor runs at all.
    pub janitor_enabled: bool,

    /// Timeout policy for resource manager calls.
    pub rm: RmClientConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let store_url = std::env::var("HWB_STORE_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());

        let log_level = std::env::var("HWB_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let allocation_ttl = duration_var("HWB_ALLOCATION_TTL_SECS", 60);
        let intake_interval = duration_var("HWB_INTAKE_INTERVAL_SECS", 2);
        let janitor_interval = duration_var("HWB_JANITOR_INTERVAL_SECS", 30);

        let janitor_enabled = std::env::var("HWB_JANITOR_ENABLED")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true);

        let rm = RmClientConfig {
            probe_timeout: duration_var("HWB_RM_PROBE_TIMEOUT_SECS", 5),
            request_timeout: duration_var("HWB_RM_REQUEST_TIMEOUT_SECS", 30),
        };

        Ok(Self {
            store_url,
            log_level,
            allocation_ttl,
            intake_interval,
            janitor_interval,
            janitor_enabled,
            rm,
        })
    }
}

fn duration_var(name: &str, default_secs: u64) -> Duration {
    let secs = std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}
