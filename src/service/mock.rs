//! Recording test doubles for the service and orchestrator

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{Orchestrator, Service, ServiceError, StreamMetadata};
use crate::registry::{ChannelId, StreamId, StreamKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetSecret(ChannelId),
    StartStream(ChannelId),
    EndStream(StreamId),
    UpdateMetadata(StreamId),
    SendPreview(StreamId, Bytes),
    OrchestratorStart(ChannelId, StreamId),
    OrchestratorStop(ChannelId, StreamId),
    Heartbeat(ChannelId),
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub struct MockService {
    log: CallLog,
    secret: StreamKey,
    next_stream_id: AtomicU64,
    pub fail_start: AtomicBool,
    pub fail_end: AtomicBool,
    pub fail_metadata: AtomicBool,
    pub metadata: Mutex<Vec<StreamMetadata>>,
}

pub struct MockOrchestrator {
    log: CallLog,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    /// Heartbeat outcomes consumed in order; succeeds once exhausted
    pub heartbeats: Mutex<VecDeque<bool>>,
}

/// A service and orchestrator sharing one call log
pub fn pair(secret: &str) -> (Arc<MockService>, Arc<MockOrchestrator>, CallLog) {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let service = Arc::new(MockService {
        log: Arc::clone(&log),
        secret: StreamKey::from(secret),
        next_stream_id: AtomicU64::new(100),
        fail_start: AtomicBool::new(false),
        fail_end: AtomicBool::new(false),
        fail_metadata: AtomicBool::new(false),
        metadata: Mutex::new(Vec::new()),
    });
    let orchestrator = Arc::new(MockOrchestrator {
        log: Arc::clone(&log),
        fail_start: AtomicBool::new(false),
        fail_stop: AtomicBool::new(false),
        heartbeats: Mutex::new(VecDeque::new()),
    });
    (service, orchestrator, log)
}

fn outcome(fail: &AtomicBool, what: &str) -> Result<(), ServiceError> {
    if fail.load(Ordering::SeqCst) {
        Err(ServiceError::new(format!("{} failed", what)))
    } else {
        Ok(())
    }
}

#[async_trait]
impl Service for MockService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get_secret(&self, channel_id: ChannelId) -> Result<StreamKey, ServiceError> {
        self.log.lock().push(Call::GetSecret(channel_id));
        Ok(self.secret.clone())
    }

    async fn start_stream(&self, channel_id: ChannelId) -> Result<StreamId, ServiceError> {
        self.log.lock().push(Call::StartStream(channel_id));
        outcome(&self.fail_start, "start")?;
        Ok(StreamId(self.next_stream_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn end_stream(&self, stream_id: StreamId) -> Result<(), ServiceError> {
        self.log.lock().push(Call::EndStream(stream_id));
        outcome(&self.fail_end, "end")
    }

    async fn update_metadata(
        &self,
        stream_id: StreamId,
        metadata: StreamMetadata,
    ) -> Result<(), ServiceError> {
        self.log.lock().push(Call::UpdateMetadata(stream_id));
        self.metadata.lock().push(metadata);
        outcome(&self.fail_metadata, "metadata")
    }

    async fn send_preview_image(
        &self,
        stream_id: StreamId,
        image: Bytes,
    ) -> Result<(), ServiceError> {
        self.log.lock().push(Call::SendPreview(stream_id, image));
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start_stream(
        &self,
        channel_id: ChannelId,
        stream_id: StreamId,
    ) -> Result<(), ServiceError> {
        self.log
            .lock()
            .push(Call::OrchestratorStart(channel_id, stream_id));
        outcome(&self.fail_start, "orchestrator start")
    }

    async fn stop_stream(
        &self,
        channel_id: ChannelId,
        stream_id: StreamId,
    ) -> Result<(), ServiceError> {
        self.log
            .lock()
            .push(Call::OrchestratorStop(channel_id, stream_id));
        outcome(&self.fail_stop, "orchestrator stop")
    }

    async fn heartbeat(&self, channel_id: ChannelId) -> Result<(), ServiceError> {
        self.log.lock().push(Call::Heartbeat(channel_id));
        match self.heartbeats.lock().pop_front() {
            Some(false) => Err(ServiceError::new("heartbeat failed")),
            _ => Ok(()),
        }
    }
}
