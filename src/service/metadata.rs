//! Stream metadata pushed to the service

use serde::Serialize;

/// Snapshot of a running stream as reported to the service
///
/// Quantities the relay cannot observe (viewers, loss, NACKs, ping) are
/// reported as 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamMetadata {
    pub audio_codec: String,
    pub ingest_server: String,
    pub ingest_viewers: u64,
    pub lost_packets: u64,
    pub nack_packets: u64,
    pub recv_packets: u64,
    /// Bits per second since the previous push
    pub source_bitrate: u64,
    pub source_ping: u64,
    pub stream_time_seconds: u64,
    pub vendor_name: String,
    pub vendor_version: String,
    pub video_codec: String,
    pub video_height: u32,
    pub video_width: u32,
}
