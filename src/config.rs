use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{ThrottleError, ThrottleResult};

/// Server settings, read from flags or the environment (a `.env` file is
/// loaded first by the binary).
#[derive(Debug, Clone, Parser)]
#[command(name = "token-throttle", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Evict buckets idle for longer than this many seconds (0 disables eviction)
    #[arg(long, env = "IDLE_TTL_SECS", default_value_t = 0)]
    pub idle_ttl_secs: u64,

    /// How often the idle sweeper runs, in seconds
    #[arg(long, env = "CLEANUP_INTERVAL_SECS", default_value_t = 60)]
    pub cleanup_interval_secs: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            idle_ttl_secs: 0,
            cleanup_interval_secs: 60,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> ThrottleResult<()> {
        if self.idle_ttl_secs > 0 && self.cleanup_interval_secs == 0 {
            return Err(ThrottleError::Config(
                "Cleanup interval must be greater than 0 when idle eviction is enabled".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ThrottleError::Config(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                self.log_level, valid_levels
            )));
        }

        Ok(())
    }

    /// Idle threshold for eviction, or `None` when buckets are kept forever.
    pub fn idle_ttl(&self) -> Option<Duration> {
        (self.idle_ttl_secs > 0).then(|| Duration::from_secs(self.idle_ttl_secs))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
