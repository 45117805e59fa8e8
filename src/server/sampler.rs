//! Per-connection sampler
//!
//! Runs alongside a message-dialect connection. Every interval it takes the
//! connection's accounting window, enforces the bandwidth ceiling, and pushes
//! the stream's metadata to the external service. Both checks only flag the
//! connection; the next media callback observes the flag and tears it down.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::MIN_INTERVAL;
use crate::registry::{ChannelId, StreamRegistry};
use crate::session::MediaAccounting;

pub struct ConnectionSampler {
    session_id: u64,
    channel_id: ChannelId,
    registry: Arc<StreamRegistry>,
    accounting: Arc<MediaAccounting>,
    bandwidth_limit: u64,
    metadata_failure_limit: u32,
}

impl ConnectionSampler {
    pub fn new(
        session_id: u64,
        channel_id: ChannelId,
        registry: Arc<StreamRegistry>,
        accounting: Arc<MediaAccounting>,
        bandwidth_limit: u64,
        metadata_failure_limit: u32,
    ) -> Self {
        Self {
            session_id,
            channel_id,
            registry,
            accounting,
            bandwidth_limit,
            metadata_failure_limit,
        }
    }

    /// Run one sampling pass
    pub async fn tick(&self) {
        let window = self.accounting.take_window();

        tracing::debug!(
            session_id = self.session_id,
            channel_id = %self.channel_id,
            audio_frames = window.audio_frames,
            key_frames = window.key_frames,
            inter_frames = window.inter_frames,
            unknown_frames = window.unknown_frames,
            packets = window.packets,
            bytes = window.bytes,
            "Sample window"
        );

        if window.bytes >= self.bandwidth_limit {
            tracing::warn!(
                session_id = self.session_id,
                channel_id = %self.channel_id,
                bytes = window.bytes,
                limit = self.bandwidth_limit,
                "Bandwidth limit reached"
            );
            self.accounting.mark_errored();
        }

        let delivered = match self.registry.push_metadata(self.channel_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    session_id = self.session_id,
                    channel_id = %self.channel_id,
                    error = %e,
                    "Error sending metadata"
                );
                false
            }
        };

        if self
            .accounting
            .record_delivery(delivered, self.metadata_failure_limit)
        {
            tracing::error!(
                session_id = self.session_id,
                channel_id = %self.channel_id,
                failures = self.accounting.delivery_failures(),
                "Too many metadata failures"
            );
        }
    }

    /// Tick every `period` until `cancel` fires
    pub fn spawn(self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let period = period.max(MIN_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.tick().await,
                }
            }

            tracing::debug!(session_id = self.session_id, "Sampler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::registry::RegistryConfig;
    use crate::service::mock::{self, Call, MockService};

    async fn setup(channel: u32) -> (Arc<StreamRegistry>, Arc<MockService>, mock::CallLog) {
        let (service, orchestrator, log) = mock::pair("secret");
        let registry = Arc::new(StreamRegistry::new(
            RegistryConfig::default().heartbeat_interval(Duration::from_secs(3600)),
            service.clone(),
            orchestrator,
        ));
        registry.start_stream(ChannelId(channel)).await.unwrap();
        (registry, service, log)
    }

    #[tokio::test]
    async fn test_bandwidth_ceiling_marks_errored() {
        let (registry, _, _) = setup(1).await;
        let accounting = Arc::new(MediaAccounting::new());
        let sampler = ConnectionSampler::new(1, ChannelId(1), registry, accounting.clone(), 1000, 5);

        accounting.record_packet(999);
        sampler.tick().await;
        assert!(!accounting.is_errored());

        accounting.record_packet(1000);
        sampler.tick().await;
        assert!(accounting.is_errored());
    }

    #[tokio::test]
    async fn test_metadata_failures_mark_errored() {
        let (registry, service, log) = setup(2).await;
        service.fail_metadata.store(true, Ordering::SeqCst);
        let accounting = Arc::new(MediaAccounting::new());
        let sampler = ConnectionSampler::new(1, ChannelId(2), registry, accounting.clone(), u64::MAX, 5);

        for _ in 0..5 {
            sampler.tick().await;
        }
        assert!(!accounting.is_errored());

        sampler.tick().await;
        assert!(accounting.is_errored());
        assert!(log
            .lock()
            .iter()
            .any(|call| matches!(call, Call::UpdateMetadata(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sampler_stops_on_cancel() {
        let (registry, _, log) = setup(3).await;
        let accounting = Arc::new(MediaAccounting::new());
        let cancel = CancellationToken::new();

        let handle = ConnectionSampler::new(1, ChannelId(3), registry, accounting, u64::MAX, 5)
            .spawn(Duration::from_secs(5), cancel.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        let pushes = |log: &mock::CallLog| {
            log.lock()
                .iter()
                .filter(|call| matches!(call, Call::UpdateMetadata(_)))
                .count()
        };
        assert_eq!(pushes(&log), 2);

        cancel.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(pushes(&log), 2);
    }
}
