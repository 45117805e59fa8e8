//! RTP packetization
//!
//! Wraps a codec payloader with the per-track header state: SSRC, payload
//! type, and a sequence number that continues across frames.

use bytes::Bytes;
use rand::Rng;
use webrtc::rtp::codecs::h264::H264Payloader;
use webrtc::rtp::codecs::opus::OpusPayloader;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::rtp::packetizer::Payloader;

use crate::error::TranscodeError;
use crate::registry::track::{AUDIO_PAYLOAD_TYPE, VIDEO_PAYLOAD_TYPE};

/// Default MTU for outgoing packets
pub const DEFAULT_MTU: usize = 1392;

pub struct RtpPacketizer {
    payloader: Box<dyn Payloader + Send + Sync>,
    mtu: usize,
    payload_type: u8,
    ssrc: u32,
    next_sequence_number: u16,
}

impl RtpPacketizer {
    /// H.264 packetizer; input must be an Annex-B byte stream
    pub fn h264(ssrc: u32, mtu: usize) -> Self {
        Self::new(Box::new(H264Payloader::default()), VIDEO_PAYLOAD_TYPE, ssrc, mtu)
    }

    /// Opus packetizer; one packet per encoded frame
    pub fn opus(ssrc: u32, mtu: usize) -> Self {
        Self::new(Box::new(OpusPayloader), AUDIO_PAYLOAD_TYPE, ssrc, mtu)
    }

    fn new(
        payloader: Box<dyn Payloader + Send + Sync>,
        payload_type: u8,
        ssrc: u32,
        mtu: usize,
    ) -> Self {
        Self {
            payloader,
            mtu,
            payload_type,
            ssrc,
            next_sequence_number: rand::thread_rng().gen::<u16>(),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Split one frame into packets sharing `timestamp`
    ///
    /// The marker bit is set on the last packet of the frame.
    pub fn packetize(&mut self, frame: &Bytes, timestamp: u32) -> Result<Vec<Packet>, TranscodeError> {
        let payloads = self.payloader.payload(self.mtu, frame)?;
        let count = payloads.len();

        let packets = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                let header = Header {
                    version: 2,
                    marker: i == count - 1,
                    payload_type: self.payload_type,
                    sequence_number: self.next_sequence_number,
                    timestamp,
                    ssrc: self.ssrc,
                    ..Default::default()
                };
                self.next_sequence_number = self.next_sequence_number.wrapping_add(1);
                Packet { header, payload }
            })
            .collect();

        Ok(packets)
    }
}

impl std::fmt::Debug for RtpPacketizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpPacketizer")
            .field("payload_type", &self.payload_type)
            .field("ssrc", &self.ssrc)
            .field("mtu", &self.mtu)
            .finish()
    }
}
