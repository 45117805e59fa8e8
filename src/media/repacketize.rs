//! H.264 video pipeline
//!
//! Converts AVCC video units into Annex-B access units and packetizes them
//! for the video track. Keyframes carry the cached SPS/PPS in front of their
//! own NAL units.

use bytes::Bytes;
use webrtc::rtp::packet::Packet;

use crate::error::TranscodeError;

use super::flv::FrameKind;
use super::h264::{join_annexb, reassemble_keyframe, AvcConfig, H264Data, NaluIterator};
use super::packetizer::RtpPacketizer;

/// RTP clock ticks per millisecond at 90 kHz
const TICKS_PER_MS: i64 = 90;

pub struct VideoRepacketizer {
    config: Option<AvcConfig>,
    packetizer: RtpPacketizer,
    last_full_frame: Option<Bytes>,
}

impl VideoRepacketizer {
    pub fn new(ssrc: u32, mtu: usize) -> Self {
        Self {
            config: None,
            packetizer: RtpPacketizer::h264(ssrc, mtu),
            last_full_frame: None,
        }
    }

    /// The most recent reassembled keyframe
    pub fn last_full_frame(&self) -> Option<&Bytes> {
        self.last_full_frame.as_ref()
    }

    pub fn has_sequence_header(&self) -> bool {
        self.config.is_some()
    }

    /// Process one video unit with its RTMP timestamp in milliseconds
    pub fn process(
        &mut self,
        kind: FrameKind,
        data: H264Data,
        timestamp_ms: u32,
    ) -> Result<Vec<Packet>, TranscodeError> {
        match data {
            H264Data::SequenceHeader(config) => {
                tracing::debug!(
                    profile = config.profile,
                    level = config.level,
                    "AVC sequence header"
                );
                self.config = Some(config);
                Ok(Vec::new())
            }
            H264Data::EndOfSequence => Ok(Vec::new()),
            H264Data::Frame {
                composition_time,
                nalus,
            } => {
                let frame = self.reassemble(kind, &nalus)?;
                if frame.is_empty() {
                    return Ok(Vec::new());
                }
                if kind == FrameKind::Key {
                    self.last_full_frame = Some(frame.clone());
                }

                let timestamp = rtp_timestamp(timestamp_ms, composition_time);
                self.packetizer.packetize(&frame, timestamp)
            }
        }
    }

    fn reassemble(&self, kind: FrameKind, nalus: &[u8]) -> Result<Bytes, TranscodeError> {
        let length_size = self.config.as_ref().map_or(4, |c| c.nalu_length_size);
        let units = NaluIterator::new(nalus, length_size);

        if kind == FrameKind::Key {
            let config = self
                .config
                .as_ref()
                .ok_or(TranscodeError::MissingSequenceHeader)?;
            Ok(reassemble_keyframe(config, units))
        } else {
            Ok(join_annexb(units))
        }
    }
}

/// Presentation time in 90 kHz ticks, wrapping at 32 bits
fn rtp_timestamp(timestamp_ms: u32, composition_time: i32) -> u32 {
    let pts_ms = timestamp_ms as i64 + composition_time as i64;
    (pts_ms * TICKS_PER_MS) as u32
}

impl std::fmt::Debug for VideoRepacketizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoRepacketizer")
            .field("has_sequence_header", &self.has_sequence_header())
            .field("packetizer", &self.packetizer)
            .finish()
    }
}
