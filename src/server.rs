use crate::bucket_store::BucketStore;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::ThrottleResult;
use crate::handlers::{
    admin_reset, admin_stats, data, health_check, hello, submit, user_profile, AppState,
};
use crate::middleware::{enforce_rate_limit, logging_middleware, RateLimitGuard};
use crate::rate_limit::{RateLimit, RouteLimits};
use axum::routing::{delete, get, post, MethodRouter};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the demo API around a shared bucket store.
pub fn create_app(store: Arc<BucketStore>, limits: RouteLimits) -> ThrottleResult<Router> {
    limits.validate()?;

    let guarded = |route, limit: &RateLimit| guard_route(route, &store, limit);

    let app = Router::new()
        .route("/api/hello", guarded(get(hello), &limits.hello)?)
        .route("/api/data", guarded(get(data), &limits.data)?)
        .route("/api/submit", guarded(post(submit), &limits.submit)?)
        .route(
            "/api/user/:user_id/profile",
            guarded(get(user_profile), &limits.user_profile)?,
        )
        .route(
            "/api/admin/stats",
            guarded(get(admin_stats), &limits.admin_stats)?,
        )
        .route(
            "/api/admin/reset",
            guarded(delete(admin_reset), &limits.admin_reset)?,
        )
        .route("/api/health", get(health_check))
        .with_state(AppState::new(store.clone(), limits))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        );

    Ok(app)
}

/// Wraps one route in the admission middleware for `limit`.
fn guard_route(
    route: MethodRouter<AppState>,
    store: &Arc<BucketStore>,
    limit: &RateLimit,
) -> ThrottleResult<MethodRouter<AppState>> {
    let guard = RateLimitGuard::new(store.clone(), limit.clone())?;
    Ok(route.layer(middleware::from_fn_with_state(guard, enforce_rate_limit)))
}

pub struct Server {
    app: Router,
    store: Arc<BucketStore>,
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> ThrottleResult<Self> {
        config.validate()?;

        let store = Arc::new(BucketStore::new());
        let app = create_app(store.clone(), RouteLimits::default())?;

        Ok(Self { app, store, config })
    }

    pub async fn run(self) -> ThrottleResult<()> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!("Rate limiter server listening on {}", self.config.bind_addr);
        tracing::info!("Health check available at /api/health");

        let sweeper = self.config.idle_ttl().map(|max_idle| {
            spawn_idle_sweeper(self.store.clone(), max_idle, self.config.cleanup_interval())
        });

        let served = axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }

        served?;
        Ok(())
    }
}

/// Periodically drops buckets that have not been used for `max_idle`.
pub fn spawn_idle_sweeper<C: Clock + 'static>(
    store: Arc<BucketStore<C>>,
    max_idle: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tracing::info!(
        max_idle_secs = max_idle.as_secs(),
        interval_secs = interval.as_secs(),
        "Idle bucket eviction enabled"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = store.evict_idle(max_idle);
            tracing::debug!(evicted, active = store.count(), "Idle sweep finished");
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
