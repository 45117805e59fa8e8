//! Media handling
//!
//! This module provides:
//! - FLV audio/video tag parsing
//! - H.264/AVC NALU parsing and Annex-B reassembly
//! - AAC parsing, decoding, and Opus re-encoding
//! - RTP packetization for the outbound tracks
//! - Keyframe capture from inbound RTP video

pub mod aac;
pub mod decoder;
pub mod encoder;
pub mod flv;
pub mod h264;
pub mod keyframe;
pub mod packetizer;
pub mod pcm;
pub mod repacketize;
pub mod transcode;

pub use aac::{AacData, AacPacketType, AudioSpecificConfig};
pub use flv::{AudioTag, FrameKind, VideoTag};
pub use h264::{AvcConfig, AvcPacketType, H264Data, NaluType};
pub use keyframe::KeyframeCollector;
pub use packetizer::{RtpPacketizer, DEFAULT_MTU};
pub use repacketize::VideoRepacketizer;
pub use transcode::AudioTranscoder;
