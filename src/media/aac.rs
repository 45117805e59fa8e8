//! AAC audio demuxing
//!
//! Message-dialect publishers send raw AAC (no ADTS headers) inside FLV audio
//! tags. After the tag's format byte comes:
//!
//! ```text
//! +-----------+-----------------------------+
//! | AACType   | AudioSpecificConfig | Frame |
//! | (1 byte)  |                             |
//! +-----------+-----------------------------+
//! ```
//!
//! AACPacketType:
//! - 0: AAC sequence header (AudioSpecificConfig)
//! - 1: AAC raw frame data

use bytes::{Buf, Bytes};

use crate::error::MediaError;

/// AAC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    /// Sequence header (AudioSpecificConfig)
    SequenceHeader = 0,
    /// Raw AAC frame data
    Raw = 1,
}

impl AacPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AacPacketType::SequenceHeader),
            1 => Some(AacPacketType::Raw),
            _ => None,
        }
    }
}

/// AudioSpecificConfig (from sequence header)
///
/// Only the leading fields are decoded; the raw bytes are handed to the
/// decoder untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    /// Audio object type (2 = AAC LC, 5 = SBR)
    pub audio_object_type: u8,
    /// Sampling frequency in Hz
    pub sampling_frequency: u32,
    /// Channel configuration (1=mono, 2=stereo, etc.)
    pub channel_configuration: u8,
    /// Raw config bytes
    pub raw: Bytes,
}

impl AudioSpecificConfig {
    /// Standard sampling frequencies by index
    const SAMPLING_FREQUENCIES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];

    /// Parse from AAC sequence header data
    pub fn parse(data: Bytes) -> Result<Self, MediaError> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAacPacket);
        }

        // audioObjectType: 5 bits
        // samplingFrequencyIndex: 4 bits
        // if (samplingFrequencyIndex == 0xf) samplingFrequency: 24 bits
        // channelConfiguration: 4 bits
        let b0 = data[0];
        let b1 = data[1];

        let audio_object_type = (b0 >> 3) & 0x1F;
        let index = ((b0 & 0x07) << 1) | ((b1 >> 7) & 0x01);

        let (sampling_frequency, channel_configuration) = if index == 0x0F {
            // Explicit frequency in the next 24 bits, channels after it
            if data.len() < 5 {
                return Err(MediaError::InvalidAacPacket);
            }
            let frequency = ((data[1] as u32 & 0x7F) << 17)
                | ((data[2] as u32) << 9)
                | ((data[3] as u32) << 1)
                | (data[4] as u32 >> 7);
            (frequency, (data[4] >> 3) & 0x0F)
        } else {
            let frequency = *Self::SAMPLING_FREQUENCIES
                .get(index as usize)
                .ok_or(MediaError::InvalidAacPacket)?;
            (frequency, (b1 >> 3) & 0x0F)
        };

        Ok(AudioSpecificConfig {
            audio_object_type,
            sampling_frequency,
            channel_configuration,
            raw: data,
        })
    }

    /// Channel count, or 0 when the layout is carried in the stream
    pub fn channels(&self) -> u8 {
        match self.channel_configuration {
            1..=6 => self.channel_configuration,
            7 => 8,
            _ => 0,
        }
    }
}

/// Parsed AAC data
#[derive(Debug, Clone)]
pub enum AacData {
    /// Sequence header (AudioSpecificConfig)
    SequenceHeader(AudioSpecificConfig),

    /// Raw AAC frame (without ADTS header)
    Frame(Bytes),
}

impl AacData {
    /// Parse from RTMP audio data (after format byte)
    pub fn parse(mut data: Bytes) -> Result<Self, MediaError> {
        if data.is_empty() {
            return Err(MediaError::InvalidAacPacket);
        }

        match AacPacketType::from_byte(data.get_u8()) {
            Some(AacPacketType::SequenceHeader) => {
                Ok(AacData::SequenceHeader(AudioSpecificConfig::parse(data)?))
            }
            Some(AacPacketType::Raw) => Ok(AacData::Frame(data)),
            None => Err(MediaError::InvalidAacPacket),
        }
    }

    /// Check if this is a sequence header
    pub fn is_sequence_header(&self) -> bool {
        matches!(self, AacData::SequenceHeader(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_specific_config_parse() {
        // AAC-LC, 44100 Hz, stereo
        let config = AudioSpecificConfig::parse(Bytes::from_static(&[0x12, 0x10])).unwrap();
        assert_eq!(config.audio_object_type, 2);
        assert_eq!(config.sampling_frequency, 44100);
        assert_eq!(config.channels(), 2);
        assert_eq!(config.raw.as_ref(), &[0x12, 0x10]);
    }

    #[test]
    fn test_audio_specific_config_48k_mono() {
        // AAC-LC, index 3 (48000 Hz), mono
        let config = AudioSpecificConfig::parse(Bytes::from_static(&[0x11, 0x88])).unwrap();
        assert_eq!(config.sampling_frequency, 48000);
        assert_eq!(config.channels(), 1);
    }

    #[test]
    fn test_audio_specific_config_invalid_index() {
        // Index 13 is reserved
        let data = Bytes::from_static(&[0x16, 0x90]);
        assert!(AudioSpecificConfig::parse(data).is_err());
    }

    #[test]
    fn test_audio_specific_config_too_short() {
        assert!(AudioSpecificConfig::parse(Bytes::from_static(&[0x12])).is_err());
    }

    #[test]
    fn test_aac_data_sequence_header() {
        let data = Bytes::from_static(&[
            0x00, // Sequence header
            0x12, 0x10, // AudioSpecificConfig: AAC LC, 44.1kHz, stereo
        ]);

        match AacData::parse(data).unwrap() {
            AacData::SequenceHeader(config) => {
                assert_eq!(config.sampling_frequency, 44100);
            }
            other => panic!("Expected SequenceHeader, got {:?}", other),
        }
    }

    #[test]
    fn test_aac_data_raw_frame() {
        let data = Bytes::from_static(&[0x01, 0x21, 0x00, 0x49, 0x90, 0x02]);

        match AacData::parse(data).unwrap() {
            AacData::Frame(frame) => assert_eq!(frame.len(), 5),
            other => panic!("Expected Frame, got {:?}", other),
        }
    }

    #[test]
    fn test_aac_data_invalid() {
        assert!(AacData::parse(Bytes::from_static(&[0x02, 0x00])).is_err());
        assert!(AacData::parse(Bytes::new()).is_err());
    }
}
