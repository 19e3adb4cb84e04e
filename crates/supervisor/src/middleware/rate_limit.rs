//! Per-user token-bucket rate limiting with continuous refill.
//!
//! One map-wide lock guards all buckets; the critical section is a few
//! arithmetic operations, so finer granularity buys nothing here.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use mb_dispatch::{Middleware, Next, RequestContext};
use mb_domain::Result;
use mb_telegram::Update;

/// Buckets idle longer than this are evicted; the sweep itself runs at
/// the same cadence.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

struct Bucket {
    tokens: f64,
    last_update: Instant,
    /// One notice per refill cycle; reset on the next admit.
    warned: bool,
}

struct Buckets {
    by_user: HashMap<i64, Bucket>,
    last_cleanup: Instant,
}

#[derive(Debug, PartialEq, Eq)]
enum Admission {
    Admitted,
    Dropped { notify: bool },
}

pub struct RateLimitMiddleware {
    /// Tokens per second.
    rate: f64,
    burst: u32,
    notify_user: bool,
    buckets: Mutex<Buckets>,
}

impl RateLimitMiddleware {
    /// `rate_per_min` requests per minute, `burst` immediate capacity.
    pub fn new(rate_per_min: u32, burst: u32, notify_user: bool) -> Self {
        Self {
            rate: f64::from(rate_per_min) / 60.0,
            burst,
            notify_user,
            buckets: Mutex::new(Buckets {
                by_user: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    fn try_admit(&self, user_id: i64, now: Instant) -> Admission {
        let mut buckets = self.buckets.lock();

        if now.duration_since(buckets.last_cleanup) >= CLEANUP_INTERVAL {
            buckets
                .by_user
                .retain(|_, b| now.duration_since(b.last_update) < CLEANUP_INTERVAL);
            buckets.last_cleanup = now;
        }

        let burst = f64::from(self.burst);
        let bucket = buckets.by_user.entry(user_id).or_insert(Bucket {
            tokens: burst,
            last_update: now,
            warned: false,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = burst.min(bucket.tokens + elapsed * self.rate);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            bucket.warned = false;
            Admission::Admitted
        } else {
            let notify = !bucket.warned;
            bucket.warned = true;
            Admission::Dropped { notify }
        }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(
        &self,
        update: &Update,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<()> {
        let Some(user_id) = ctx.user_id else {
            return next.run(update, ctx).await;
        };

        match self.try_admit(user_id, Instant::now()) {
            Admission::Admitted => next.run(update, ctx).await,
            Admission::Dropped { notify } => {
                tracing::warn!(bot_id = %ctx.bot_id, user_id, "rate limited, dropping update");
                if notify && self.notify_user {
                    if let Err(e) = ctx
                        .reply("You're sending messages too fast. Please wait a moment.")
                        .await
                    {
                        tracing::debug!(error = %e, "rate-limit notice failed");
                    }
                }
                Ok(())
            }
        }
    }
}
