//! Outbound RTP tracks
//!
//! Each stream owns one video and one audio track. Packets written to a track
//! are forwarded to any WebRTC peer bound to the underlying
//! [`TrackLocalStaticRTP`] and fanned out to in-process subscribers over a
//! `tokio::sync::broadcast` channel.

use std::sync::Arc;

use tokio::sync::broadcast;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;

use super::ids::ChannelId;

pub const VIDEO_CLOCK_RATE: u32 = 90_000;
pub const AUDIO_CLOCK_RATE: u32 = 48_000;
pub const AUDIO_CHANNELS: u16 = 2;

/// Payload type used on outbound video tracks
pub const VIDEO_PAYLOAD_TYPE: u8 = 96;
/// Payload type used on outbound audio tracks
pub const AUDIO_PAYLOAD_TYPE: u8 = 97;

const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        }
    }
}

/// A single outbound RTP track
#[derive(Clone)]
pub struct RtpTrack {
    kind: TrackKind,
    local: Arc<TrackLocalStaticRTP>,
    tx: broadcast::Sender<Packet>,
}

impl RtpTrack {
    /// Create an H.264 video track
    pub fn video(channel_id: ChannelId, capacity: usize) -> Self {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_owned(),
            clock_rate: VIDEO_CLOCK_RATE,
            sdp_fmtp_line: H264_FMTP.to_owned(),
            ..Default::default()
        };
        Self::new(TrackKind::Video, capability, channel_id, capacity)
    }

    /// Create a stereo Opus audio track
    pub fn audio(channel_id: ChannelId, capacity: usize) -> Self {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: AUDIO_CLOCK_RATE,
            channels: AUDIO_CHANNELS,
            ..Default::default()
        };
        Self::new(TrackKind::Audio, capability, channel_id, capacity)
    }

    fn new(
        kind: TrackKind,
        capability: RTCRtpCodecCapability,
        channel_id: ChannelId,
        capacity: usize,
    ) -> Self {
        let local = Arc::new(TrackLocalStaticRTP::new(
            capability,
            kind.as_str().to_owned(),
            format!("channel-{}", channel_id),
        ));
        let (tx, _) = broadcast::channel(capacity.max(1));

        Self { kind, local, tx }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// The WebRTC track that egress peers bind to
    pub fn local(&self) -> Arc<TrackLocalStaticRTP> {
        Arc::clone(&self.local)
    }

    /// Receive every packet written to this track from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Packet> {
        self.tx.subscribe()
    }

    /// Write a packet to bound peers and in-process subscribers
    pub async fn write_rtp(&self, packet: &Packet) -> Result<(), webrtc::Error> {
        self.local.write_rtp(packet).await?;
        // No subscribers is not an error
        let _ = self.tx.send(packet.clone());
        Ok(())
    }
}

impl std::fmt::Debug for RtpTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpTrack")
            .field("kind", &self.kind)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

/// The video and audio track of one stream
#[derive(Debug, Clone)]
pub struct TrackPair {
    pub video: RtpTrack,
    pub audio: RtpTrack,
}

impl TrackPair {
    pub fn new(channel_id: ChannelId, capacity: usize) -> Self {
        Self {
            video: RtpTrack::video(channel_id, capacity),
            audio: RtpTrack::audio(channel_id, capacity),
        }
    }
}

/// SSRC used for a channel's audio packets
pub fn audio_ssrc(channel_id: ChannelId) -> u32 {
    channel_id.get()
}

/// SSRC used for a channel's video packets
pub fn video_ssrc(channel_id: ChannelId) -> u32 {
    channel_id.get().wrapping_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use webrtc::rtp::header::Header;

    #[tokio::test]
    async fn test_write_reaches_subscribers() {
        let tracks = TrackPair::new(ChannelId(7), 16);
        let mut rx = tracks.video.subscribe();

        let packet = Packet {
            header: Header {
                version: 2,
                payload_type: VIDEO_PAYLOAD_TYPE,
                sequence_number: 10,
                ssrc: video_ssrc(ChannelId(7)),
                ..Default::default()
            },
            payload: Bytes::from_static(&[0x65, 0x88]),
        };

        tracks.video.write_rtp(&packet).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.header.sequence_number, 10);
        assert_eq!(received.payload, packet.payload);
    }

    #[tokio::test]
    async fn test_write_without_subscribers() {
        let tracks = TrackPair::new(ChannelId(1), 4);
        let packet = Packet::default();
        assert!(tracks.audio.write_rtp(&packet).await.is_ok());
    }

    #[test]
    fn test_track_metadata() {
        let tracks = TrackPair::new(ChannelId(3), 4);
        assert_eq!(tracks.video.kind(), TrackKind::Video);
        assert_eq!(tracks.audio.kind(), TrackKind::Audio);
        assert_eq!(audio_ssrc(ChannelId(3)), 3);
        assert_eq!(video_ssrc(ChannelId(3)), 4);
    }
}
