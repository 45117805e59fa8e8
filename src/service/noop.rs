//! Backends that accept everything
//!
//! Used when the relay runs without an external service, and in tests.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use super::{Orchestrator, Service, ServiceError, StreamMetadata};
use crate::registry::{ChannelId, StreamId, StreamKey};

/// Service that hands every channel the same secret
pub struct NoopService {
    secret: StreamKey,
    next_stream_id: AtomicU64,
}

impl NoopService {
    pub fn new(secret: impl Into<StreamKey>) -> Self {
        Self {
            secret: secret.into(),
            next_stream_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Service for NoopService {
    fn name(&self) -> &str {
        "noop"
    }

    async fn get_secret(&self, _channel_id: ChannelId) -> Result<StreamKey, ServiceError> {
        Ok(self.secret.clone())
    }

    async fn start_stream(&self, channel_id: ChannelId) -> Result<StreamId, ServiceError> {
        let stream_id = StreamId(self.next_stream_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(channel_id = %channel_id, stream_id = %stream_id, "Noop stream started");
        Ok(stream_id)
    }

    async fn end_stream(&self, stream_id: StreamId) -> Result<(), ServiceError> {
        tracing::debug!(stream_id = %stream_id, "Noop stream ended");
        Ok(())
    }

    async fn update_metadata(
        &self,
        stream_id: StreamId,
        metadata: StreamMetadata,
    ) -> Result<(), ServiceError> {
        tracing::trace!(
            stream_id = %stream_id,
            recv_packets = metadata.recv_packets,
            source_bitrate = metadata.source_bitrate,
            "Noop metadata"
        );
        Ok(())
    }

    async fn send_preview_image(
        &self,
        stream_id: StreamId,
        image: Bytes,
    ) -> Result<(), ServiceError> {
        tracing::trace!(stream_id = %stream_id, bytes = image.len(), "Noop preview");
        Ok(())
    }
}

/// Orchestrator that acknowledges every call
#[derive(Debug, Default)]
pub struct NoopOrchestrator;

impl NoopOrchestrator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Orchestrator for NoopOrchestrator {
    fn name(&self) -> &str {
        "noop"
    }

    async fn start_stream(
        &self,
        _channel_id: ChannelId,
        _stream_id: StreamId,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn stop_stream(
        &self,
        _channel_id: ChannelId,
        _stream_id: StreamId,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn heartbeat(&self, _channel_id: ChannelId) -> Result<(), ServiceError> {
        Ok(())
    }
}
