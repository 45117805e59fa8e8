//! Preview sampler
//!
//! Copies a stream's newest keyframe into its bounded preview queue at a
//! fixed interval. Delivery happens on the heartbeat.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::MIN_INTERVAL;

use super::entry::Stream;

pub(super) fn spawn(stream: Arc<Stream>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(run(stream, period))
}

async fn run(stream: Arc<Stream>, period: Duration) {
    let period = period.max(MIN_INTERVAL);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let token = stream.cancel_token().clone();
    let mut last_generation = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if let Some((generation, frame)) = stream.latest_keyframe() {
            if generation != last_generation {
                last_generation = generation;
                stream.push_preview(frame);
            }
        }
    }
}
