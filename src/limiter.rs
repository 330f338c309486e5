//! Channel-pump rate limiter bounding publish attempt frequency.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq)]
pub enum LimiterError {
    #[error("rate limiter requires a limit of at least 1 (got {0})")]
    InvalidLimit(u32),

    #[error("rate limiter requires a non-zero period")]
    InvalidPeriod,
}

/// The caller-facing ends of a limiter: offer tokens on `input`, receive
/// granted slots from `output`. `output` closes when the pump shuts down.
pub struct LimiterChannels {
    pub input: mpsc::Sender<()>,
    pub output: mpsc::Receiver<()>,
}

impl LimiterChannels {
    /// A limiter that forwards every token immediately; used when rate
    /// limiting is disabled and in tests.
    pub fn passthrough() -> Self {
        let (input, output) = mpsc::channel(1);
        Self { input, output }
    }
}

/// Releases at most `limit` tokens per `period` by ticking every
/// `period / limit` and forwarding one input token per tick. The first token
/// waits a full tick, so `n` tokens take at least `n * period / limit`.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    period: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, period: Duration) -> Result<Self, LimiterError> {
        if limit < 1 {
            return Err(LimiterError::InvalidLimit(limit));
        }
        if period.is_zero() {
            return Err(LimiterError::InvalidPeriod);
        }
        Ok(Self { limit, period })
    }

    /// Spawns the pump task for the lifetime of `cancel`.
    ///
    /// Every forward is raced against cancellation so a blocked send or
    /// receive never deadlocks shutdown; on exit the output channel closes,
    /// unblocking any pending receiver.
    pub fn start(&self, cancel: CancellationToken) -> LimiterChannels {
        let (input_tx, mut input_rx) = mpsc::channel::<()>(1);
        let (output_tx, output_rx) = mpsc::channel::<()>(1);
        let tick_every = self.period / self.limit;

        tokio::spawn(async move {
            // interval() fires its first tick immediately; start one tick out
            // so the first token is rate limited too.
            let start = tokio::time::Instant::now() + tick_every;
            let mut ticker = tokio::time::interval_at(start, tick_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let token = tokio::select! {
                    _ = cancel.cancelled() => break,
                    token = input_rx.recv() => token,
                };
                if token.is_none() {
                    break;
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = output_tx.send(()) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        LimiterChannels {
            input: input_tx,
            output: output_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_rejects_invalid_parameters() {
        assert_eq!(
            RateLimiter::new(0, Duration::from_secs(1)).unwrap_err(),
            LimiterError::InvalidLimit(0)
        );
        assert_eq!(
            RateLimiter::new(1, Duration::ZERO).unwrap_err(),
            LimiterError::InvalidPeriod
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounds_token_rate() {
        let limiter = RateLimiter::new(2, Duration::from_millis(100)).unwrap();
        let cancel = CancellationToken::new();
        let mut channels = limiter.start(cancel.clone());

        let input = channels.input.clone();
        tokio::spawn(async move {
            loop {
                if input.send(()).await.is_err() {
                    break;
                }
            }
        });

        let started = Instant::now();
        for _ in 0..5 {
            channels.output.recv().await.unwrap();
        }
        // Tick every 50ms; five tokens take at least 250ms of (virtual) time.
        assert!(started.elapsed() >= Duration::from_millis(250));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_token_waits_a_full_tick() {
        let limiter = RateLimiter::new(1, Duration::from_millis(100)).unwrap();
        let cancel = CancellationToken::new();
        let mut channels = limiter.start(cancel.clone());

        channels.input.send(()).await.unwrap();
        let started = Instant::now();
        channels.output.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_unblocks_pending_receiver() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60)).unwrap();
        let cancel = CancellationToken::new();
        let mut channels = limiter.start(cancel.clone());

        let waiter = tokio::spawn(async move { channels.output.recv().await });
        cancel.cancel();
        // Pump exit drops the output sender, so the receive completes with None.
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_passthrough_forwards_immediately() {
        let mut channels = LimiterChannels::passthrough();
        channels.input.send(()).await.unwrap();
        assert_eq!(channels.output.recv().await, Some(()));
    }
}
