//! Keyed token-bucket admission control.
//!
//! [`BucketStore`] is the core: a concurrent map from caller-chosen keys to
//! [`TokenBucket`]s, answering each admission request with a plain `bool`.
//! The remaining modules put an axum boundary in front of it.

pub mod bucket_store;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod middleware;
pub mod rate_limit;
pub mod response;
pub mod server;
pub mod token_bucket;

pub use bucket_store::BucketStore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{ThrottleError, ThrottleResult};
pub use rate_limit::{RateLimit, RouteLimits};
pub use response::ApiResponse;
pub use server::create_app;
pub use token_bucket::TokenBucket;
