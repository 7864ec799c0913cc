//! Single-node per-API-key request limiter.
//!
//! Each key gets its own GCRA limiter sized from the key's `rate_limit`
//! (requests per minute). State is process-local; running several replicas
//! multiplies the effective limit.

use dashmap::DashMap;
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc};
use uuid::Uuid;

use super::error::ServiceError;

type UnkeyedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

struct KeyLimiter {
    per_minute: u32,
    limiter: UnkeyedRateLimiter,
}

#[derive(Clone, Default)]
pub struct ApiKeyRateLimiter {
    limiters: Arc<DashMap<Uuid, Arc<KeyLimiter>>>,
}

impl ApiKeyRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one request for `key_id`. A non-positive limit means unlimited.
    pub fn check(&self, key_id: Uuid, rate_limit: i32) -> Result<(), ServiceError> {
        let Some(per_minute) = u32::try_from(rate_limit).ok().and_then(NonZeroU32::new) else {
            return Ok(());
        };

        let entry = {
            let mut slot = self
                .limiters
                .entry(key_id)
                .or_insert_with(|| Arc::new(new_limiter(per_minute)));
            // A changed limit replaces the limiter.
            if slot.per_minute != per_minute.get() {
                *slot = Arc::new(new_limiter(per_minute));
            }
            slot.clone()
        };

        match entry.limiter.check() {
            Ok(_) => Ok(()),
            Err(negative) => {
                let wait_time = negative.wait_time_from(DefaultClock::default().now());
                tracing::debug!(key_id = %key_id, "API key rate limit exceeded");
                Err(ServiceError::RateLimitExceeded {
                    retry_after_secs: Some(wait_time.as_secs().max(1)),
                })
            }
        }
    }

    pub fn remove(&self, key_id: Uuid) {
        self.limiters.remove(&key_id);
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

fn new_limiter(per_minute: NonZeroU32) -> KeyLimiter {
    KeyLimiter {
        per_minute: per_minute.get(),
        limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
    }
}
