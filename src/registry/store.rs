//! Stream registry implementation
//!
//! The central registry that owns every live stream, keyed by channel, and
//! drives the external service and orchestrator through each stream's
//! lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{AuthError, Error, Result};
use crate::service::{Orchestrator, PassthroughPreview, PreviewEncoder, Service};

use super::config::RegistryConfig;
use super::entry::Stream;
use super::error::RegistryError;
use super::ids::{ChannelId, StreamKey};
use super::track::TrackPair;
use super::{heartbeat, preview};

/// Central registry for all live streams
///
/// Thread-safe via `RwLock`. At most one stream exists per channel; the
/// insert that claims a channel happens under the write lock.
pub struct StreamRegistry {
    /// Map of channel to its live stream
    streams: RwLock<HashMap<ChannelId, Arc<Stream>>>,

    service: Arc<dyn Service>,

    orchestrator: Arc<dyn Orchestrator>,

    preview_encoder: Arc<dyn PreviewEncoder>,

    /// Configuration
    config: RegistryConfig,
}

impl StreamRegistry {
    /// Create a registry backed by the given collaborators
    pub fn new(
        config: RegistryConfig,
        service: Arc<dyn Service>,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            service,
            orchestrator,
            preview_encoder: Arc::new(PassthroughPreview),
            config,
        }
    }

    /// Replace the preview encoder used on heartbeat delivery
    pub fn with_preview_encoder(mut self, encoder: Arc<dyn PreviewEncoder>) -> Self {
        self.preview_encoder = encoder;
        self
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Fetch a channel's secret for challenge verification
    pub async fn fetch_secret(&self, channel_id: ChannelId) -> std::result::Result<StreamKey, AuthError> {
        self.service
            .get_secret(channel_id)
            .await
            .map_err(AuthError::SecretLookup)
    }

    /// Check a presented stream key against the channel's secret
    pub async fn authenticate(
        &self,
        channel_id: ChannelId,
        presented: &StreamKey,
    ) -> std::result::Result<(), AuthError> {
        let secret = self.fetch_secret(channel_id).await?;
        if secret.matches(presented.as_bytes()) {
            Ok(())
        } else {
            Err(AuthError::KeyMismatch)
        }
    }

    /// Register and start a stream for a channel
    ///
    /// Fails without side effects if the channel already has a stream. If the
    /// service or orchestrator rejects the stream, the record is rolled back.
    /// On success the heartbeat and preview sampler are running.
    pub async fn start_stream(self: &Arc<Self>, channel_id: ChannelId) -> Result<Arc<Stream>> {
        let stream = self.insert_stream(channel_id).await?;

        tracing::info!(channel_id = %channel_id, "Starting stream");

        let stream_id = match self.service.start_stream(channel_id).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(
                    channel_id = %channel_id,
                    service = self.service.name(),
                    error = %e,
                    "Service rejected stream start"
                );
                self.roll_back(&stream).await;
                return Err(e.into());
            }
        };
        stream.assign_stream_id(stream_id);

        if let Err(e) = self.orchestrator.start_stream(channel_id, stream_id).await {
            tracing::warn!(
                channel_id = %channel_id,
                stream_id = %stream_id,
                orchestrator = self.orchestrator.name(),
                error = %e,
                "Orchestrator rejected stream start"
            );
            if let Err(end_err) = self.service.end_stream(stream_id).await {
                tracing::warn!(
                    channel_id = %channel_id,
                    stream_id = %stream_id,
                    error = %end_err,
                    "Failed to end stream during rollback"
                );
            }
            self.roll_back(&stream).await;
            return Err(e.into());
        }

        stream.mark_started();

        heartbeat::spawn(Arc::clone(self), Arc::clone(&stream));
        preview::spawn(Arc::clone(&stream), self.config.preview_interval);

        tracing::info!(
            channel_id = %channel_id,
            stream_id = %stream_id,
            "Stream started"
        );

        Ok(stream)
    }

    /// Stop a channel's stream
    ///
    /// Background tasks are signalled first. The service, orchestrator, and
    /// removal steps are each attempted; the first error is returned.
    pub async fn stop_stream(&self, channel_id: ChannelId) -> Result<()> {
        let stream = self.get_stream(channel_id).await?;

        if !stream.begin_stop() {
            return Err(RegistryError::StreamStopping(channel_id).into());
        }

        tracing::info!(
            channel_id = %channel_id,
            stream_id = ?stream.stream_id(),
            "Stopping stream"
        );

        stream.cancel();

        let mut first_error: Option<Error> = None;

        if let Some(stream_id) = stream.stream_id() {
            if let Err(e) = self.service.end_stream(stream_id).await {
                tracing::warn!(
                    channel_id = %channel_id,
                    stream_id = %stream_id,
                    error = %e,
                    "Service failed to end stream"
                );
                first_error.get_or_insert(e.into());
            }

            if let Err(e) = self.orchestrator.stop_stream(channel_id, stream_id).await {
                tracing::warn!(
                    channel_id = %channel_id,
                    stream_id = %stream_id,
                    error = %e,
                    "Orchestrator failed to stop stream"
                );
                first_error.get_or_insert(e.into());
            }
        }

        if let Err(e) = self.remove_stream(&stream).await {
            tracing::warn!(channel_id = %channel_id, error = %e, "Failed to remove stream");
            first_error.get_or_insert(e.into());
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Tracks of a channel's stream
    pub async fn get_tracks(&self, channel_id: ChannelId) -> std::result::Result<TrackPair, RegistryError> {
        Ok(self.get_stream(channel_id).await?.tracks().clone())
    }

    /// Look up a channel's stream
    pub async fn get_stream(&self, channel_id: ChannelId) -> std::result::Result<Arc<Stream>, RegistryError> {
        let streams = self.streams.read().await;
        streams
            .get(&channel_id)
            .cloned()
            .ok_or(RegistryError::StreamNotFound(channel_id))
    }

    /// Number of registered streams
    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Stop every registered stream
    pub async fn shutdown(&self) {
        let channels: Vec<ChannelId> = self.streams.read().await.keys().copied().collect();

        tracing::info!(streams = channels.len(), "Shutting down registry");

        for channel_id in channels {
            if let Err(e) = self.stop_stream(channel_id).await {
                tracing::warn!(channel_id = %channel_id, error = %e, "Failed to stop stream on shutdown");
            }
        }
    }

    /// Push a channel's metadata to the service
    pub async fn push_metadata(&self, channel_id: ChannelId) -> Result<()> {
        let stream = self.get_stream(channel_id).await?;
        self.send_metadata(&stream).await
    }

    /// One heartbeat tick; true if all three deliveries succeeded
    pub(super) async fn heartbeat_tick(&self, stream: &Stream) -> bool {
        let channel_id = stream.channel_id();
        let mut success = true;

        if let Err(e) = self.send_preview(stream).await {
            tracing::warn!(channel_id = %channel_id, error = %e, "Error sending preview");
            success = false;
        }

        if let Err(e) = self.send_metadata(stream).await {
            tracing::warn!(channel_id = %channel_id, error = %e, "Error sending metadata");
            success = false;
        }

        if let Err(e) = self.orchestrator.heartbeat(channel_id).await {
            tracing::warn!(
                channel_id = %channel_id,
                error = %e,
                "Error sending orchestrator heartbeat"
            );
            success = false;
        }

        success
    }

    async fn send_metadata(&self, stream: &Stream) -> Result<()> {
        let stream_id = stream
            .stream_id()
            .ok_or(RegistryError::StreamNotStarted(stream.channel_id()))?;
        let metadata = stream.metadata(&self.config.hostname);
        self.service.update_metadata(stream_id, metadata).await?;
        Ok(())
    }

    async fn send_preview(&self, stream: &Stream) -> Result<()> {
        let Some(frame) = stream.take_preview() else {
            return Ok(());
        };
        let stream_id = stream
            .stream_id()
            .ok_or(RegistryError::StreamNotStarted(stream.channel_id()))?;

        let Some(image) = self.preview_encoder.encode(&frame)? else {
            tracing::debug!(channel_id = %stream.channel_id(), "Preview produced no image");
            return Ok(());
        };

        self.service.send_preview_image(stream_id, image.data).await?;

        if let Some((width, height)) = image.dimensions {
            stream.update_client_info(|info| {
                info.video_width = width;
                info.video_height = height;
            });
        }

        tracing::debug!(channel_id = %stream.channel_id(), "Preview delivered");
        Ok(())
    }

    async fn insert_stream(&self, channel_id: ChannelId) -> std::result::Result<Arc<Stream>, RegistryError> {
        let mut streams = self.streams.write().await;

        if streams.contains_key(&channel_id) {
            return Err(RegistryError::StreamAlreadyExists(channel_id));
        }

        let stream = Arc::new(Stream::new(channel_id, &self.config));
        streams.insert(channel_id, Arc::clone(&stream));

        tracing::debug!(channel_id = %channel_id, "Stream registered");

        Ok(stream)
    }

    /// Remove `stream` if it is still the channel's registered stream
    async fn remove_stream(&self, stream: &Arc<Stream>) -> std::result::Result<(), RegistryError> {
        let channel_id = stream.channel_id();
        let mut streams = self.streams.write().await;

        match streams.get(&channel_id) {
            Some(current) if Arc::ptr_eq(current, stream) => {
                streams.remove(&channel_id);
                Ok(())
            }
            _ => Err(RegistryError::StreamNotFound(channel_id)),
        }
    }

    async fn roll_back(&self, stream: &Arc<Stream>) {
        stream.cancel();
        if let Err(e) = self.remove_stream(stream).await {
            tracing::debug!(
                channel_id = %stream.channel_id(),
                error = %e,
                "Rolled back stream was already gone"
            );
        }
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("service", &self.service.name())
            .field("orchestrator", &self.orchestrator.name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::registry::{StreamId, StreamState};
    use crate::service::mock::{self, Call, CallLog, MockOrchestrator, MockService};

    fn setup() -> (Arc<StreamRegistry>, Arc<MockService>, Arc<MockOrchestrator>, CallLog) {
        let (service, orchestrator, log) = mock::pair("secret");
        let registry = Arc::new(StreamRegistry::new(
            RegistryConfig::default().hostname("test-node"),
            service.clone(),
            orchestrator.clone(),
        ));
        (registry, service, orchestrator, log)
    }

    #[tokio::test]
    async fn test_start_stream() {
        let (registry, _, _, log) = setup();

        let stream = registry.start_stream(ChannelId(1)).await.unwrap();
        assert_eq!(stream.state(), StreamState::Started);
        assert_eq!(stream.stream_id(), Some(StreamId(100)));
        assert!(registry.get_tracks(ChannelId(1)).await.is_ok());

        assert_eq!(
            *log.lock(),
            vec![
                Call::StartStream(ChannelId(1)),
                Call::OrchestratorStart(ChannelId(1), StreamId(100)),
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_start_is_rejected() {
        let (registry, _, _, log) = setup();

        let first = registry.start_stream(ChannelId(1)).await.unwrap();
        let err = registry.start_stream(ChannelId(1)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Registry(RegistryError::StreamAlreadyExists(ChannelId(1)))
        ));

        // The existing stream is untouched
        let current = registry.get_stream(ChannelId(1)).await.unwrap();
        assert!(Arc::ptr_eq(&first, &current));
        assert_eq!(current.stream_id(), Some(StreamId(100)));
        assert!(!current.is_stopped());
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_service_failure_rolls_back() {
        let (registry, service, _, log) = setup();
        service.fail_start.store(true, Ordering::SeqCst);

        let err = registry.start_stream(ChannelId(2)).await.unwrap_err();
        assert!(matches!(err, Error::Service(_)));
        assert!(registry.get_stream(ChannelId(2)).await.is_err());
        assert_eq!(*log.lock(), vec![Call::StartStream(ChannelId(2))]);
    }

    #[tokio::test]
    async fn test_orchestrator_failure_rolls_back() {
        let (registry, _, orchestrator, log) = setup();
        orchestrator.fail_start.store(true, Ordering::SeqCst);

        assert!(registry.start_stream(ChannelId(3)).await.is_err());
        assert_eq!(registry.stream_count().await, 0);
        assert_eq!(
            *log.lock(),
            vec![
                Call::StartStream(ChannelId(3)),
                Call::OrchestratorStart(ChannelId(3), StreamId(100)),
                Call::EndStream(StreamId(100)),
            ]
        );

        // The channel can be started again afterwards
        orchestrator.fail_start.store(false, Ordering::SeqCst);
        assert!(registry.start_stream(ChannelId(3)).await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_attempts_every_step() {
        let (registry, service, _, log) = setup();
        let stream = registry.start_stream(ChannelId(4)).await.unwrap();
        service.fail_end.store(true, Ordering::SeqCst);

        let err = registry.stop_stream(ChannelId(4)).await.unwrap_err();
        assert!(matches!(err, Error::Service(_)));

        assert!(stream.is_stopped());
        assert!(registry.get_stream(ChannelId(4)).await.is_err());
        let log = log.lock();
        assert!(log.contains(&Call::EndStream(StreamId(100))));
        assert!(log.contains(&Call::OrchestratorStop(ChannelId(4), StreamId(100))));
    }

    #[tokio::test]
    async fn test_stop_missing_stream() {
        let (registry, _, _, log) = setup();

        let err = registry.stop_stream(ChannelId(9)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Registry(RegistryError::StreamNotFound(ChannelId(9)))
        ));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let (registry, _, _, _) = setup();
        let a = registry.start_stream(ChannelId(1)).await.unwrap();
        let b = registry.start_stream(ChannelId(2)).await.unwrap();

        registry.shutdown().await;

        assert_eq!(registry.stream_count().await, 0);
        assert!(a.is_stopped());
        assert!(b.is_stopped());
    }

    #[tokio::test]
    async fn test_authenticate() {
        let (registry, _, _, _) = setup();

        assert!(registry
            .authenticate(ChannelId(1), &StreamKey::from("secret"))
            .await
            .is_ok());
        assert!(matches!(
            registry
                .authenticate(ChannelId(1), &StreamKey::from("wrong"))
                .await,
            Err(AuthError::KeyMismatch)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_failures_stop_stream() {
        let (registry, _, orchestrator, log) = setup();
        orchestrator.heartbeats.lock().extend([false; 5]);

        let stream = registry.start_stream(ChannelId(7)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(15 * 4 + 1)).await;
        assert!(!stream.is_stopped());

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(stream.is_stopped());
        assert!(registry.get_stream(ChannelId(7)).await.is_err());
        assert!(log
            .lock()
            .contains(&Call::OrchestratorStop(ChannelId(7), StreamId(100))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_recovers_from_transient_failures() {
        let (registry, _, orchestrator, _) = setup();
        orchestrator
            .heartbeats
            .lock()
            .extend([false, false, false, false, true, true, false, false]);

        let stream = registry.start_stream(ChannelId(8)).await.unwrap();

        // Eight ticks leave the counter at 4 after the recovery
        tokio::time::sleep(Duration::from_secs(15 * 8 + 1)).await;
        assert!(!stream.is_stopped());

        // One more failure reaches the threshold
        orchestrator.heartbeats.lock().push_back(false);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(stream.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_intervals_still_supervise() {
        let (service, orchestrator, _) = mock::pair("secret");
        let config = RegistryConfig {
            heartbeat_interval: Duration::ZERO,
            preview_interval: Duration::ZERO,
            ..RegistryConfig::default()
        };
        let registry = Arc::new(StreamRegistry::new(config, service, orchestrator.clone()));
        orchestrator.heartbeats.lock().extend([false; 5]);

        let stream = registry.start_stream(ChannelId(9)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(stream.is_stopped());
        assert!(registry.get_stream(ChannelId(9)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_stops_with_stream() {
        let (registry, _, _, log) = setup();
        registry.start_stream(ChannelId(5)).await.unwrap();
        registry.stop_stream(ChannelId(5)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!log
            .lock()
            .iter()
            .any(|call| matches!(call, Call::Heartbeat(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_delivers_preview_and_metadata() {
        let (registry, service, _, log) = setup();
        let stream = registry.start_stream(ChannelId(6)).await.unwrap();
        stream.set_keyframe(Bytes::from_static(&[0, 0, 0, 1, 0x65]));

        tokio::time::sleep(Duration::from_secs(16)).await;

        let log = log.lock();
        assert!(log.contains(&Call::SendPreview(
            StreamId(100),
            Bytes::from_static(&[0, 0, 0, 1, 0x65])
        )));
        assert!(log.contains(&Call::UpdateMetadata(StreamId(100))));
        assert!(log.contains(&Call::Heartbeat(ChannelId(6))));

        let metadata = service.metadata.lock();
        assert_eq!(metadata[0].ingest_server, "test-node");
    }
}
