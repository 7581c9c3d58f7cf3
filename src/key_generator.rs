//! Key generation utilities for rate limiting.

use axum::http::HeaderMap;
use std::net::SocketAddr;

use crate::error::{ThrottleError, ThrottleResult};

/// How a guarded route derives the bucket key from a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum KeyStrategy {
    /// The client address.
    #[default]
    ClientIp,
    /// The client address joined with a named path parameter, e.g. a user id.
    ClientIpAndParam(String),
    /// One literal key shared by every caller.
    Fixed(String),
}

impl KeyStrategy {
    /// Builds the key for a request from its client address and the path
    /// parameters captured by the router.
    pub fn generate_key(
        &self,
        client_ip: &str,
        params: &[(String, String)],
    ) -> ThrottleResult<String> {
        match self {
            KeyStrategy::ClientIp => Ok(client_ip.to_string()),
            KeyStrategy::ClientIpAndParam(name) => {
                let value = params
                    .iter()
                    .find(|(param, _)| param == name)
                    .map(|(_, value)| value)
                    .ok_or_else(|| {
                        ThrottleError::Config(format!("route has no path parameter '{}'", name))
                    })?;
                Ok(format!("{}:{}", client_ip, value))
            }
            KeyStrategy::Fixed(literal) => Ok(literal.clone()),
        }
    }
}

/// Client address from proxy headers, falling back to the peer address.
pub fn extract_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return first_ip.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            let ip_str = ip_str.trim();
            if !ip_str.is_empty() {
                return ip_str.to_string();
            }
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}
