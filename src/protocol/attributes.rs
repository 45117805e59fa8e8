//! Stream attributes announced between CONNECT and `.`

use crate::registry::ClientInfo;

/// Typed view of the `Key: Value` lines a publisher sends
///
/// Numeric values that fail to parse are stored as unset rather than failing
/// the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionMetadata {
    pub protocol_version: String,
    pub vendor_name: String,
    pub vendor_version: String,

    pub has_video: bool,
    pub video_codec: String,
    pub video_height: u32,
    pub video_width: u32,
    pub video_payload_type: Option<u8>,
    pub video_ingest_ssrc: u32,

    pub has_audio: bool,
    pub audio_codec: String,
    pub audio_payload_type: Option<u8>,
    pub audio_ingest_ssrc: u32,
}

impl ConnectionMetadata {
    /// Apply one attribute; returns false for unknown keys
    pub fn apply(&mut self, key: &str, value: &str) -> bool {
        match key {
            "ProtocolVersion" => self.protocol_version = value.to_string(),
            "VendorName" => self.vendor_name = value.to_string(),
            "VendorVersion" => self.vendor_version = value.to_string(),

            "Video" => self.has_video = value == "true",
            "VideoCodec" => self.video_codec = value.to_string(),
            "VideoHeight" => self.video_height = value.parse().unwrap_or(0),
            "VideoWidth" => self.video_width = value.parse().unwrap_or(0),
            "VideoPayloadType" => self.video_payload_type = value.parse().ok(),
            "VideoIngestSSRC" => self.video_ingest_ssrc = value.parse().unwrap_or(0),

            "Audio" => self.has_audio = value == "true",
            "AudioCodec" => self.audio_codec = value.to_string(),
            "AudioPayloadType" => self.audio_payload_type = value.parse().ok(),
            "AudioIngestSSRC" => self.audio_ingest_ssrc = value.parse().unwrap_or(0),

            _ => return false,
        }
        true
    }

    /// Payload type routing derived from the attributes
    pub fn routing(&self) -> PayloadRouting {
        PayloadRouting {
            video: self.video_payload_type,
            audio: self.audio_payload_type,
        }
    }

    /// Copy publisher identity and codec details onto a stream's client info
    pub fn apply_to(&self, info: &mut ClientInfo) {
        info.vendor_name = self.vendor_name.clone();
        info.vendor_version = self.vendor_version.clone();
        if !self.video_codec.is_empty() {
            info.video_codec = self.video_codec.clone();
        }
        if !self.audio_codec.is_empty() {
            info.audio_codec = self.audio_codec.clone();
        }
        info.video_width = self.video_width;
        info.video_height = self.video_height;
    }
}

/// Which track an RTP payload type belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadRouting {
    pub video: Option<u8>,
    pub audio: Option<u8>,
}

/// Destination of an inbound media packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Video,
    Audio,
    Drop,
}

impl PayloadRouting {
    pub fn route(&self, payload_type: u8) -> Route {
        if self.video == Some(payload_type) {
            Route::Video
        } else if self.audio == Some(payload_type) {
            Route::Audio
        } else {
            Route::Drop
        }
    }
}
