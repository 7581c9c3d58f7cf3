use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::bucket_store::BucketStore;
use crate::response::unix_timestamp;

pub const SERVICE_NAME: &str = "Rate Limiter API";

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_buckets: usize,
}

/// Reports liveness together with the size of the bucket store.
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<BucketStore>,
    started: Instant,
}

impl HealthChecker {
    pub fn new(store: Arc<BucketStore>) -> Self {
        Self {
            store,
            started: Instant::now(),
        }
    }

    pub fn check_health(&self) -> HealthStatus {
        HealthStatus {
            status: "UP".to_string(),
            service: SERVICE_NAME.to_string(),
            timestamp: unix_timestamp(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started.elapsed().as_secs(),
            active_buckets: self.store.count(),
        }
    }
}
