pub mod congress;
pub mod federal_register;
pub mod legislators;

use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use thiserror::Error;

/// Shared process-local limiter enforcing one request budget per registry, no
/// matter how many handlers hold the client.
pub type RegistryRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Default request budget for the public registries. They are all politeness-
/// limited; five per second stays comfortably under every published limit.
pub fn default_rate_limiter() -> RegistryRateLimiter {
    Arc::new(RateLimiter::direct(Quota::per_second(nonzero!(5u32))))
}

#[derive(Error, Debug)]
pub enum RegistryClientError {
    #[error("connection error: {0}")]
    ConnectError(String),
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("unexpected HTTP status while fetching {resource}: {status}")]
    UnexpectedStatus { resource: String, status: u16 },
    #[error("missing API key for {0}")]
    MissingApiKey(&'static str),
    #[error(transparent)]
    JsonParseError(#[from] serde_json::Error),
    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}
