use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Global token bucket gating data frames into the hub's broadcast path.
///
/// One instance is shared by every connection. A publisher that finds the
/// bucket empty waits for the next token instead of losing its message.
#[derive(Clone)]
pub struct PublishLimiter {
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl PublishLimiter {
    /// One token every `interval`, holding at most `burst` tokens.
    ///
    /// Returns `None` for a zero interval.
    pub fn new(interval: Duration, burst: NonZeroU32) -> Option<Self> {
        let quota = Quota::with_period(interval)?.allow_burst(burst);
        Some(Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Wait until a token is available and take it.
    pub async fn admit(&self) {
        self.limiter.until_ready().await;
    }
}

impl std::fmt::Debug for PublishLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishLimiter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Instant};

    const PROMPT: Duration = Duration::from_millis(20);

    fn burst(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(PublishLimiter::new(Duration::ZERO, burst(1)).is_none());
    }

    #[tokio::test]
    async fn burst_is_available_up_front() {
        let limiter = PublishLimiter::new(Duration::from_secs(60), burst(3)).unwrap();
        for _ in 0..3 {
            assert!(timeout(PROMPT, limiter.admit()).await.is_ok());
        }
        assert!(timeout(PROMPT, limiter.admit()).await.is_err());
    }

    #[tokio::test]
    async fn clones_share_one_bucket() {
        let a = PublishLimiter::new(Duration::from_secs(60), burst(1)).unwrap();
        let b = a.clone();
        assert!(timeout(PROMPT, a.admit()).await.is_ok());
        assert!(timeout(PROMPT, b.admit()).await.is_err());
    }

    #[tokio::test]
    async fn empty_bucket_delays_instead_of_dropping() {
        let limiter = PublishLimiter::new(Duration::from_millis(50), burst(1)).unwrap();
        limiter.admit().await;

        let start = Instant::now();
        limiter.admit().await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
