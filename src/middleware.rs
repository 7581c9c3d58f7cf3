use axum::extract::{ConnectInfo, FromRequestParts, RawPathParams, Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::bucket_store::BucketStore;
use crate::clock::duration_to_millis;
use crate::error::{ThrottleError, ThrottleResult, DEFAULT_RETRY_AFTER};
use crate::key_generator::extract_client_ip;
use crate::rate_limit::RateLimit;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// State for [`enforce_rate_limit`]: the shared store plus one route's rule.
#[derive(Clone)]
pub struct RateLimitGuard {
    store: Arc<BucketStore>,
    limit: Arc<RateLimit>,
}

impl RateLimitGuard {
    pub fn new(store: Arc<BucketStore>, limit: RateLimit) -> ThrottleResult<Self> {
        limit.validate()?;
        Ok(Self {
            store,
            limit: Arc::new(limit),
        })
    }

    pub fn limit(&self) -> &RateLimit {
        &self.limit
    }
}

/// Admits the request through the route's bucket or answers 429.
pub async fn enforce_rate_limit(
    State(guard): State<RateLimitGuard>,
    request: Request,
    next: Next,
) -> Result<Response, ThrottleError> {
    let (mut parts, body) = request.into_parts();

    let params: Vec<(String, String)> = RawPathParams::from_request_parts(&mut parts, &())
        .await
        .map(|params| {
            params
                .iter()
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .collect()
        })
        .unwrap_or_default();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = extract_client_ip(&parts.headers, peer);
    let path = parts.uri.path().to_string();

    let limit = guard.limit();
    let key = limit.bucket_key(&client_ip, &params)?;

    let allowed = guard
        .store
        .try_consume(&key, limit.cost, limit.capacity, limit.refill_rate)?;

    if !allowed {
        let retry_after = guard
            .store
            .retry_after(&key, limit.cost)
            .unwrap_or(DEFAULT_RETRY_AFTER);

        warn!(
            target: "token_throttle::middleware",
            key = %key,
            path = %path,
            retry_after_ms = duration_to_millis(retry_after),
            "Rate limit exceeded"
        );

        return Err(ThrottleError::RateLimitExceeded {
            message: limit.message.clone(),
            retry_after,
            path,
        });
    }

    let remaining = guard.store.available_tokens(&key).unwrap_or_default();
    let mut response = next.run(Request::from_parts(parts, body)).await;

    let headers = response.headers_mut();
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit.capacity));
    headers.insert(
        RATE_LIMIT_REMAINING,
        HeaderValue::from(remaining.floor() as u64),
    );

    Ok(response)
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(&REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let uri = request.uri().clone();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = extract_client_ip(request.headers(), peer);

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID, value);
    }

    let span = info_span!("request", request_id = %request_id);
    async move {
        info!(
            target: "token_throttle::middleware",
            method = %method,
            uri = %uri,
            client_ip = %client_ip,
            "Incoming request"
        );

        let mut response = next.run(request).await;

        info!(
            target: "token_throttle::middleware",
            method = %method,
            uri = %uri,
            status = %response.status(),
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID, value);
        }
        response
    }
    .instrument(span)
    .await
}
