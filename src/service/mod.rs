//! External collaborators
//!
//! The relay depends on two outside systems it does not implement: a
//! [`Service`] that owns channel secrets and stream records, and an
//! [`Orchestrator`] that tracks which ingest node carries which stream. Both
//! are modelled as object-safe async traits so a backend can be chosen at
//! startup.

pub mod metadata;
pub mod noop;
pub mod preview;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use bytes::Bytes;

pub use crate::error::ServiceError;
use crate::registry::{ChannelId, StreamId, StreamKey};

pub use metadata::StreamMetadata;
pub use noop::{NoopOrchestrator, NoopService};
pub use preview::{PassthroughPreview, PreviewEncoder, PreviewImage};

/// Authorization and stream bookkeeping service
#[async_trait]
pub trait Service: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Look up the stream key of a channel
    async fn get_secret(&self, channel_id: ChannelId) -> Result<StreamKey, ServiceError>;

    /// Create a stream record and return its identifier
    async fn start_stream(&self, channel_id: ChannelId) -> Result<StreamId, ServiceError>;

    async fn end_stream(&self, stream_id: StreamId) -> Result<(), ServiceError>;

    async fn update_metadata(
        &self,
        stream_id: StreamId,
        metadata: StreamMetadata,
    ) -> Result<(), ServiceError>;

    async fn send_preview_image(&self, stream_id: StreamId, image: Bytes)
        -> Result<(), ServiceError>;
}

/// Fleet orchestrator
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn start_stream(
        &self,
        channel_id: ChannelId,
        stream_id: StreamId,
    ) -> Result<(), ServiceError>;

    async fn stop_stream(&self, channel_id: ChannelId, stream_id: StreamId)
        -> Result<(), ServiceError>;

    /// Liveness beacon for a running stream
    async fn heartbeat(&self, channel_id: ChannelId) -> Result<(), ServiceError>;
}
