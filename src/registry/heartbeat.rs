//! Per-stream heartbeat supervisor
//!
//! Every tick delivers the newest preview, pushes metadata, and sends an
//! orchestrator liveness beacon. A failing tick raises the failure count and a
//! clean tick lowers it; the stream is stopped once the count reaches the
//! configured threshold.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::MIN_INTERVAL;

use super::entry::Stream;
use super::store::StreamRegistry;

/// Failure accounting for heartbeat ticks
#[derive(Debug, Clone)]
pub struct FailureCounter {
    failures: u32,
    threshold: u32,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            failures: 0,
            threshold: threshold.max(1),
        }
    }

    /// Record a tick outcome; returns true once the threshold is reached
    pub fn record(&mut self, success: bool) -> bool {
        if success {
            self.failures = self.failures.saturating_sub(1);
        } else {
            self.failures += 1;
        }
        self.failures >= self.threshold
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

pub(super) fn spawn(registry: Arc<StreamRegistry>, stream: Arc<Stream>) -> JoinHandle<()> {
    tokio::spawn(run(registry, stream))
}

async fn run(registry: Arc<StreamRegistry>, stream: Arc<Stream>) {
    let period = registry.config().heartbeat_interval.max(MIN_INTERVAL);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut failures = FailureCounter::new(registry.config().heartbeat_failure_threshold);
    let token = stream.cancel_token().clone();
    let channel_id = stream.channel_id();

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(channel_id = %channel_id, "Heartbeat stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        let success = registry.heartbeat_tick(&stream).await;
        let exceeded = failures.record(success);

        tracing::debug!(
            channel_id = %channel_id,
            success,
            failures = failures.failures(),
            "Heartbeat tick"
        );

        if exceeded {
            tracing::warn!(
                channel_id = %channel_id,
                failures = failures.failures(),
                "Stopping stream due to excessive heartbeat errors"
            );
            if let Err(e) = registry.stop_stream(channel_id).await {
                tracing::warn!(channel_id = %channel_id, error = %e, "Heartbeat stop failed");
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_accumulate_to_threshold() {
        let mut counter = FailureCounter::new(5);
        for _ in 0..4 {
            assert!(!counter.record(false));
        }
        assert!(counter.record(false));
    }

    #[test]
    fn test_success_decrements() {
        let mut counter = FailureCounter::new(5);

        // 4 failures, 1 success, 4 failures: the count passes through 3 and
        // reaches the threshold on the last failure
        for _ in 0..4 {
            assert!(!counter.record(false));
        }
        assert!(!counter.record(true));
        assert_eq!(counter.failures(), 3);
        assert!(!counter.record(false));
        assert!(counter.record(false));
    }

    #[test]
    fn test_success_floors_at_zero() {
        let mut counter = FailureCounter::new(5);
        assert!(!counter.record(true));
        assert!(!counter.record(true));
        assert_eq!(counter.failures(), 0);
    }
}
