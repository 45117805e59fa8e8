//! Keyframe capture from an incoming H.264 RTP stream
//!
//! Depacketizes video packets back into Annex-B access units and keeps the
//! ones containing an IDR slice, which feed the preview pipeline.

use bytes::{Bytes, BytesMut};
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp::packet::Packet;
use webrtc::rtp::packetizer::Depacketizer;

use super::h264::contains_idr;

/// Access units larger than this are discarded
const MAX_ACCESS_UNIT: usize = 8 * 1024 * 1024;

#[derive(Default)]
pub struct KeyframeCollector {
    depacketizer: H264Packet,
    pending: BytesMut,
    timestamp: Option<u32>,
}

impl KeyframeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one video packet; returns a complete keyframe when the packet
    /// closes an access unit containing an IDR slice
    pub fn push(&mut self, packet: &Packet) -> Option<Bytes> {
        if self.timestamp != Some(packet.header.timestamp) {
            // A new access unit started without the previous marker
            self.pending.clear();
            self.timestamp = Some(packet.header.timestamp);
        }

        match self.depacketizer.depacketize(&packet.payload) {
            Ok(nalus) => self.pending.extend_from_slice(&nalus),
            Err(e) => {
                tracing::trace!(error = %e, "Dropping undecodable video packet");
                self.reset();
                return None;
            }
        }

        if self.pending.len() > MAX_ACCESS_UNIT {
            self.reset();
            return None;
        }

        if !packet.header.marker {
            return None;
        }

        let access_unit = self.pending.split().freeze();
        self.timestamp = None;
        contains_idr(&access_unit).then_some(access_unit)
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.timestamp = None;
    }
}

impl std::fmt::Debug for KeyframeCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyframeCollector")
            .field("pending", &self.pending.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
