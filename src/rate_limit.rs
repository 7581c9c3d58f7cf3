use crate::bucket_store::{DEFAULT_CAPACITY, DEFAULT_REFILL_RATE};
use crate::error::{ThrottleError, ThrottleResult};
use crate::key_generator::KeyStrategy;
use crate::token_bucket::validate_params;

pub const DEFAULT_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// Admission rule attached to a single route.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimit {
    pub key: KeyStrategy,
    /// Prepended to the generated key so routes get separate buckets.
    /// Routes without a scope share the bucket of any other route that
    /// resolves to the same key.
    pub scope: Option<String>,
    pub cost: u32,
    pub capacity: u32,
    pub refill_rate: f64, // tokens per second
    pub message: String,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            key: KeyStrategy::default(),
            scope: None,
            cost: 1,
            capacity: DEFAULT_CAPACITY,
            refill_rate: DEFAULT_REFILL_RATE,
            message: DEFAULT_MESSAGE.to_string(),
        }
    }
}

impl RateLimit {
    pub fn new(cost: u32, capacity: u32, refill_rate: f64) -> Self {
        Self {
            cost,
            capacity,
            refill_rate,
            ..Self::default()
        }
    }

    pub fn keyed_by(mut self, key: KeyStrategy) -> Self {
        self.key = key;
        self
    }

    pub fn scoped(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Rejects parameters the bucket store would refuse, and costs that no
    /// bucket of this capacity could ever admit.
    pub fn validate(&self) -> ThrottleResult<()> {
        validate_params(self.capacity, self.refill_rate)?;

        if self.cost > self.capacity {
            return Err(ThrottleError::Config(format!(
                "cost {} exceeds capacity {}",
                self.cost, self.capacity
            )));
        }
        if let KeyStrategy::Fixed(literal) = &self.key {
            if literal.is_empty() {
                return Err(ThrottleError::EmptyKey);
            }
        }

        Ok(())
    }

    /// Final store key for a request.
    pub fn bucket_key(&self, client_ip: &str, params: &[(String, String)]) -> ThrottleResult<String> {
        let key = self.key.generate_key(client_ip, params)?;
        Ok(match &self.scope {
            Some(scope) => format!("{}:{}", scope, key),
            None => key,
        })
    }

    /// Human readable summary, e.g. "3 tokens per request, burst 3, refill 0.5/s".
    pub fn describe(&self) -> String {
        format!(
            "{} token{} per request, burst {}, refill {}/s",
            self.cost,
            if self.cost == 1 { "" } else { "s" },
            self.capacity,
            self.refill_rate
        )
    }
}

/// Limits for the bundled demo API.
#[derive(Debug, Clone)]
pub struct RouteLimits {
    pub hello: RateLimit,
    pub data: RateLimit,
    pub submit: RateLimit,
    pub user_profile: RateLimit,
    pub admin_stats: RateLimit,
    pub admin_reset: RateLimit,
}

impl Default for RouteLimits {
    fn default() -> Self {
        Self {
            hello: RateLimit::new(1, 5, 1.0).scoped("hello"),
            data: RateLimit::new(2, 10, 2.0).scoped("data"),
            submit: RateLimit::new(3, 3, 0.5).scoped("submit"),
            user_profile: RateLimit::new(1, 20, 5.0)
                .keyed_by(KeyStrategy::ClientIpAndParam("user_id".to_string()))
                .scoped("profile"),
            // Both admin routes share the literal "admin" bucket; whichever
            // is hit first decides its capacity and refill rate.
            admin_stats: RateLimit::new(1, 100, 10.0)
                .keyed_by(KeyStrategy::Fixed("admin".to_string())),
            admin_reset: RateLimit::new(1, 5, 0.2)
                .keyed_by(KeyStrategy::Fixed("admin".to_string())),
        }
    }
}

impl RouteLimits {
    pub fn validate(&self) -> ThrottleResult<()> {
        for limit in [
            &self.hello,
            &self.data,
            &self.submit,
            &self.user_profile,
            &self.admin_stats,
            &self.admin_reset,
        ] {
            limit.validate()?;
        }
        Ok(())
    }
}
