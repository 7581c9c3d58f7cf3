use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;

use crate::bucket_store::BucketStore;
use crate::health::{HealthChecker, HealthStatus};
use crate::rate_limit::RouteLimits;
use crate::response::{ApiResponse, MessageData, ProfileData, StatsData, SubmitData};

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<BucketStore>,
    pub limits: Arc<RouteLimits>,
    pub health: HealthChecker,
}

impl AppState {
    pub fn new(store: Arc<BucketStore>, limits: RouteLimits) -> Self {
        Self {
            health: HealthChecker::new(store.clone()),
            store,
            limits: Arc::new(limits),
        }
    }
}

pub async fn hello(State(state): State<AppState>) -> Json<ApiResponse<MessageData>> {
    Json(
        ApiResponse::new(
            "/api/hello",
            MessageData {
                message: "Hello, World!".to_string(),
            },
        )
        .with_rate_limit(state.limits.hello.describe()),
    )
}

pub async fn data(State(state): State<AppState>) -> Json<ApiResponse<serde_json::Value>> {
    Json(
        ApiResponse::new("/api/data", serde_json::json!({ "data": "Some sample data" }))
            .with_rate_limit(state.limits.data.describe()),
    )
}

pub async fn submit(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Json<ApiResponse<SubmitData>> {
    Json(
        ApiResponse::new(
            "/api/submit",
            SubmitData {
                message: "Data submitted successfully".to_string(),
                received_data: payload,
            },
        )
        .with_rate_limit(state.limits.submit.describe()),
    )
}

pub async fn user_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<ApiResponse<ProfileData>> {
    Json(
        ApiResponse::new(
            "/api/user/:user_id/profile",
            ProfileData {
                profile: format!("User profile data for {}", user_id),
                user_id,
            },
        )
        .with_rate_limit(state.limits.user_profile.describe()),
    )
}

pub async fn admin_stats(State(state): State<AppState>) -> Json<ApiResponse<StatsData>> {
    Json(
        ApiResponse::new(
            "/api/admin/stats",
            StatsData {
                active_buckets: state.store.count(),
            },
        )
        .with_rate_limit(state.limits.admin_stats.describe()),
    )
}

pub async fn admin_reset(State(state): State<AppState>) -> Json<ApiResponse<MessageData>> {
    state.store.reset_all();
    tracing::info!("All rate limit buckets reset via admin endpoint");

    Json(
        ApiResponse::new(
            "/api/admin/reset",
            MessageData {
                message: "All rate limit buckets have been reset".to_string(),
            },
        )
        .with_rate_limit(state.limits.admin_reset.describe()),
    )
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.health.check_health())
}
