//! Stream record and state types
//!
//! This module defines the per-stream state stored in the registry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::service::StreamMetadata;
use crate::stats::StreamCounters;

use super::config::RegistryConfig;
use super::ids::{ChannelId, StreamId};
use super::track::TrackPair;

/// Lifecycle state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Publisher authenticated, service and orchestrator not yet confirmed
    Authenticated,
    /// Service and orchestrator acknowledged the stream
    Started,
    /// Stop sequence in progress
    Stopping,
}

/// What the publishing client told us about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub vendor_name: String,
    pub vendor_version: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub video_width: u32,
    pub video_height: u32,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            vendor_name: String::new(),
            vendor_version: String::new(),
            video_codec: "H264".to_string(),
            audio_codec: "opus".to_string(),
            video_width: 0,
            video_height: 0,
        }
    }
}

#[derive(Debug, Default)]
struct KeyframeSlot {
    generation: u64,
    frame: Option<Bytes>,
}

/// Bounded queue of sampled keyframes; the oldest entry is dropped when full
#[derive(Debug)]
pub struct PreviewQueue {
    items: VecDeque<Bytes>,
    capacity: usize,
}

impl PreviewQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn offer(&mut self, frame: Bytes) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(frame);
    }

    /// Drain the queue, keeping only the newest entry
    pub fn take_latest(&mut self) -> Option<Bytes> {
        let latest = self.items.pop_back();
        self.items.clear();
        latest
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A live stream owned by the registry
///
/// Counters and the keyframe slot are written by the owning connection's media
/// task; supervisors only read them.
pub struct Stream {
    channel_id: ChannelId,
    stream_id: OnceLock<StreamId>,
    state: Mutex<StreamState>,
    media_started: AtomicBool,
    created_at: Instant,
    started_at: OnceLock<Instant>,
    counters: StreamCounters,
    info: RwLock<ClientInfo>,
    tracks: TrackPair,
    keyframe: Mutex<KeyframeSlot>,
    previews: Mutex<PreviewQueue>,
    cancel: CancellationToken,
}

impl Stream {
    pub(super) fn new(channel_id: ChannelId, config: &RegistryConfig) -> Self {
        Self {
            channel_id,
            stream_id: OnceLock::new(),
            state: Mutex::new(StreamState::Authenticated),
            media_started: AtomicBool::new(false),
            created_at: Instant::now(),
            started_at: OnceLock::new(),
            counters: StreamCounters::new(),
            info: RwLock::new(ClientInfo::default()),
            tracks: TrackPair::new(channel_id, config.track_broadcast_capacity),
            keyframe: Mutex::new(KeyframeSlot::default()),
            previews: Mutex::new(PreviewQueue::new(config.preview_queue_capacity)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Identifier assigned by the service, once started
    pub fn stream_id(&self) -> Option<StreamId> {
        self.stream_id.get().copied()
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    pub fn tracks(&self) -> &TrackPair {
        &self.tracks
    }

    pub fn counters(&self) -> &StreamCounters {
        &self.counters
    }

    pub fn client_info(&self) -> ClientInfo {
        self.info.read().clone()
    }

    pub fn update_client_info(&self, update: impl FnOnce(&mut ClientInfo)) {
        update(&mut self.info.write());
    }

    /// Whether the first media packet has arrived
    pub fn media_started(&self) -> bool {
        self.media_started.load(Ordering::Acquire)
    }

    pub fn mark_media_started(&self) {
        if !self.media_started.swap(true, Ordering::AcqRel) {
            tracing::info!(channel_id = %self.channel_id, "First media packet received");
        }
    }

    /// Token cancelled when the stream is stopped through any path
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the stream has been stopped
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }

    /// Store the newest keyframe access unit
    pub fn set_keyframe(&self, frame: Bytes) {
        let mut slot = self.keyframe.lock();
        slot.generation += 1;
        slot.frame = Some(frame);
    }

    /// Newest keyframe and its generation counter
    pub fn latest_keyframe(&self) -> Option<(u64, Bytes)> {
        let slot = self.keyframe.lock();
        slot.frame.clone().map(|frame| (slot.generation, frame))
    }

    pub(super) fn push_preview(&self, frame: Bytes) {
        self.previews.lock().offer(frame);
    }

    pub(super) fn take_preview(&self) -> Option<Bytes> {
        self.previews.lock().take_latest()
    }

    pub(super) fn assign_stream_id(&self, stream_id: StreamId) {
        let _ = self.stream_id.set(stream_id);
    }

    pub(super) fn mark_started(&self) {
        let _ = self.started_at.set(Instant::now());
        let mut state = self.state.lock();
        if *state == StreamState::Authenticated {
            *state = StreamState::Started;
        }
    }

    /// Move to `Stopping`; returns false if a stop is already in progress
    pub(super) fn begin_stop(&self) -> bool {
        let mut state = self.state.lock();
        if *state == StreamState::Stopping {
            return false;
        }
        *state = StreamState::Stopping;
        true
    }

    pub(super) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Build the metadata report, sampling bitrate since the previous report
    pub fn metadata(&self, hostname: &str) -> StreamMetadata {
        let info = self.client_info();
        let counters = self.counters.snapshot();
        let started_at = self.started_at.get().copied().unwrap_or(self.created_at);

        StreamMetadata {
            audio_codec: info.audio_codec,
            ingest_server: hostname.to_string(),
            recv_packets: counters.total_packets(),
            source_bitrate: self.counters.sample_bitrate(),
            stream_time_seconds: started_at.elapsed().as_secs(),
            vendor_name: info.vendor_name,
            vendor_version: info.vendor_version,
            video_codec: info.video_codec,
            video_height: info.video_height,
            video_width: info.video_width,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("channel_id", &self.channel_id)
            .field("stream_id", &self.stream_id())
            .field("state", &self.state())
            .field("media_started", &self.media_started())
            .finish()
    }
}
