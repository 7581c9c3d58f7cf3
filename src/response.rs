use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Envelope shared by the demo endpoints.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub timestamp: u64,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<String>,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(endpoint: &str, data: T) -> Self {
        Self {
            timestamp: unix_timestamp(),
            endpoint: endpoint.to_string(),
            rate_limit: None,
            data,
        }
    }

    pub fn with_rate_limit(mut self, description: String) -> Self {
        self.rate_limit = Some(description);
        self
    }
}

#[derive(Debug, Serialize)]
pub struct MessageData {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitData {
    pub message: String,
    pub received_data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ProfileData {
    pub user_id: String,
    pub profile: String,
}

#[derive(Debug, Serialize)]
pub struct StatsData {
    pub active_buckets: usize,
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
