use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior, Sleep};

/// Liveness timing for one connection.
///
/// The read side tracks a deadline that only a PONG pushes forward; the
/// write side pings on its own ticker whether or not PONGs come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// Time allowed to read the next PONG from the peer.
    pub pong_wait: Duration,
    /// Period between PINGs. Must be shorter than `pong_wait`.
    pub ping_interval: Duration,
    /// Time allowed to write one frame to the peer.
    pub write_wait: Duration,
}

impl Keepalive {
    pub fn new(pong_wait: Duration, write_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_interval: default_ping_interval(pong_wait),
            write_wait,
        }
    }

    pub fn with_ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = ping_interval;
        self
    }

    /// Read deadline for a connection that has just been opened.
    pub fn read_deadline(&self) -> Sleep {
        tokio::time::sleep(self.pong_wait)
    }

    /// Push the read deadline forward after a PONG.
    pub fn extend(&self, deadline: std::pin::Pin<&mut Sleep>) {
        deadline.reset(Instant::now() + self.pong_wait);
    }

    /// Ticker driving the writer's PINGs. The first tick is one full period out.
    pub fn ping_ticker(&self) -> Interval {
        let mut ticker = interval_at(Instant::now() + self.ping_interval, self.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

impl Default for Keepalive {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(10))
    }
}

/// Nine tenths of `pong_wait`, so a PING always lands before the deadline.
pub fn default_ping_interval(pong_wait: Duration) -> Duration {
    pong_wait * 9 / 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_interval_defaults_below_pong_wait() {
        let keepalive = Keepalive::new(Duration::from_secs(10), Duration::from_secs(10));
        assert_eq!(keepalive.ping_interval, Duration::from_secs(9));
        assert!(keepalive.ping_interval < keepalive.pong_wait);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_extends_deadline() {
        let keepalive = Keepalive::new(Duration::from_secs(10), Duration::from_secs(1));
        let deadline = keepalive.read_deadline();
        tokio::pin!(deadline);

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(!deadline.is_elapsed());
        keepalive.extend(deadline.as_mut());

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(!deadline.is_elapsed());

        tokio::time::advance(Duration::from_secs(3)).await;
        (&mut deadline).await;
        assert!(deadline.is_elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_skips_immediate_tick() {
        let keepalive = Keepalive::new(Duration::from_secs(10), Duration::from_secs(1));
        let mut ticker = keepalive.ping_ticker();
        let start = Instant::now();
        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }
}
