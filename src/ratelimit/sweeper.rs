//! Background eviction of idle rate limit windows.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::clock::Clock;
use super::engine::RateLimitEngine;

/// Spawn a task that sweeps the engine every `interval`.
///
/// The task runs until it is aborted or the runtime shuts down.
pub fn spawn_sweeper<C: Clock + 'static>(
    engine: Arc<RateLimitEngine<C>>,
    interval: Duration,
) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "Starting window sweeper");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = engine.sweep();
            if evicted > 0 {
                debug!(
                    evicted = evicted,
                    remaining = engine.window_count(),
                    "Evicted idle rate limit windows"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Algorithm, EngineConfig, ManualClock, RateLimitRule};

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_on_tick() {
        let clock = ManualClock::new();
        let engine = Arc::new(RateLimitEngine::with_clock(
            clock.clone(),
            EngineConfig::default(),
        ));
        let rule = RateLimitRule::new("r", 1, "1s", Algorithm::SlidingWindow, "k");
        engine.apply_rate_limit("u1", &rule);

        let handle = spawn_sweeper(Arc::clone(&engine), Duration::from_secs(60));

        clock.advance(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(engine.window_count(), 0);
        handle.abort();
    }
}
