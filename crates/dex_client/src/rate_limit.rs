//! Rate limiter for the DEX read API.
//!
//! The public reader tier allows 10 requests/sec.

use governor::{Quota, RateLimiter as GovLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Read-path rate limiter shared by all clones of the client.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    read_limiter: Arc<
        GovLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
}

impl RateLimiter {
    /// Create with the public reader-tier limit.
    pub fn new() -> Self {
        Self::with_limit(10)
    }

    /// Create with a custom per-second limit.
    pub fn with_limit(reads_per_sec: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(reads_per_sec).unwrap());
        Self {
            read_limiter: Arc::new(GovLimiter::direct(quota)),
        }
    }

    /// Wait until a read slot is available.
    pub async fn wait_read(&self) {
        self.read_limiter.until_ready().await;
    }

    /// Try to acquire a read slot without waiting. Returns true if acquired.
    pub fn try_read(&self) -> bool {
        self.read_limiter.check().is_ok()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
