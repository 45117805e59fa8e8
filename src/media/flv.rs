//! FLV tag header demuxing
//!
//! Each RTMP audio/video message is an FLV tag body: one header byte describing
//! the codec, followed by codec data.
//!
//! RTMP Video Data:
//! ```text
//! +----------+----------+
//! | FrameType| CodecID  | CodecData...
//! | (4 bits) | (4 bits) |
//! +----------+----------+
//! ```
//!
//! RTMP Audio Data:
//! ```text
//! +-----------+----------+----------+----------+
//! |SoundFormat|SoundRate |SoundSize |SoundType | AudioData...
//! | (4 bits)  | (2 bits) | (1 bit)  | (1 bit)  |
//! +-----------+----------+----------+----------+
//! ```

use bytes::{Buf, Bytes};

use crate::error::MediaError;

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    /// Keyframe (for AVC, a seekable frame)
    Keyframe = 1,
    /// Inter frame (for AVC, a non-seekable frame)
    InterFrame = 2,
    /// Disposable inter frame (H.263 only)
    DisposableInterFrame = 3,
    /// Generated keyframe (reserved for server use)
    GeneratedKeyframe = 4,
    /// Video info/command frame
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }
}

/// How a video unit is counted and reassembled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Key,
    Inter,
    Unknown,
}

impl From<Option<VideoFrameType>> for FrameKind {
    fn from(frame_type: Option<VideoFrameType>) -> Self {
        match frame_type {
            Some(VideoFrameType::Keyframe) => FrameKind::Key,
            Some(VideoFrameType::InterFrame) => FrameKind::Inter,
            _ => FrameKind::Unknown,
        }
    }
}

/// Video codec ID (lower 4 bits of first byte)
pub const VIDEO_CODEC_AVC: u8 = 7;

/// Audio format (upper 4 bits of first byte)
pub const AUDIO_FORMAT_AAC: u8 = 10;

/// An H.264 video tag
#[derive(Debug, Clone)]
pub struct VideoTag {
    pub frame_type: Option<VideoFrameType>,
    /// Codec data after the header byte
    pub body: Bytes,
}

impl VideoTag {
    /// Parse a video message; only AVC is accepted
    pub fn parse(mut data: Bytes) -> Result<Self, MediaError> {
        if data.is_empty() {
            return Err(MediaError::InvalidVideoTag);
        }

        let header = data.get_u8();
        let codec = header & 0x0F;
        if codec != VIDEO_CODEC_AVC {
            return Err(MediaError::UnsupportedVideoCodec(codec));
        }

        Ok(VideoTag {
            frame_type: VideoFrameType::from_byte(header),
            body: data,
        })
    }

    pub fn frame_kind(&self) -> FrameKind {
        self.frame_type.into()
    }
}

/// An AAC audio tag
#[derive(Debug, Clone)]
pub struct AudioTag {
    /// Codec data after the header byte
    pub body: Bytes,
}

impl AudioTag {
    /// Parse an audio message; only AAC is accepted
    pub fn parse(mut data: Bytes) -> Result<Self, MediaError> {
        if data.is_empty() {
            return Err(MediaError::InvalidAudioTag);
        }

        let format = (data.get_u8() >> 4) & 0x0F;
        if format != AUDIO_FORMAT_AAC {
            return Err(MediaError::UnsupportedAudioFormat(format));
        }

        Ok(AudioTag { body: data })
    }
}
