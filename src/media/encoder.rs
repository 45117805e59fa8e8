//! Opus encoding via libopus

use bytes::Bytes;

use crate::error::TranscodeError;

/// Output sample rate
pub const OPUS_SAMPLE_RATE: u32 = 48_000;

/// Samples per channel in one 20 ms Opus frame at 48 kHz
pub const OPUS_FRAME_SAMPLES: usize = 960;

/// Stereo Opus encoder producing one packet per 20 ms frame
pub struct OpusEncoder {
    encoder: opus::Encoder,
    output: Vec<u8>,
}

impl OpusEncoder {
    /// Largest packet libopus will produce for a single frame
    const MAX_PACKET: usize = 4000;

    pub fn new() -> Result<Self, TranscodeError> {
        let encoder = opus::Encoder::new(
            OPUS_SAMPLE_RATE,
            opus::Channels::Stereo,
            opus::Application::Audio,
        )?;

        Ok(Self {
            encoder,
            output: vec![0; Self::MAX_PACKET],
        })
    }

    /// Interleaved stereo samples per frame
    pub fn frame_len(&self) -> usize {
        OPUS_FRAME_SAMPLES * 2
    }

    /// Encode one frame of interleaved stereo PCM
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, TranscodeError> {
        let len = self.encoder.encode(pcm, &mut self.output)?;
        Ok(Bytes::copy_from_slice(&self.output[..len]))
    }
}

impl std::fmt::Debug for OpusEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpusEncoder").finish_non_exhaustive()
    }
}
