//! AAC to Opus audio pipeline
//!
//! ```text
//! AacData ─► AacDecoder ─► to_stereo ─► StereoResampler ─► FrameBuffer
//!                                                             │ 960 samples
//!                                                             ▼
//!                                  RtpPacketizer ◄─ OpusEncoder
//! ```
//!
//! A failure on one access unit drops that unit only; the decoder, buffer,
//! and packetizer state carry over to the next.

use bytes::Bytes;
use webrtc::rtp::packet::Packet;

use crate::error::TranscodeError;

use super::aac::AacData;
use super::decoder::AacDecoder;
use super::encoder::{OpusEncoder, OPUS_FRAME_SAMPLES, OPUS_SAMPLE_RATE};
use super::packetizer::RtpPacketizer;
use super::pcm::{to_stereo, FrameBuffer, StereoResampler};

pub struct AudioTranscoder {
    decoder: Option<AacDecoder>,
    resampler: Option<StereoResampler>,
    buffer: FrameBuffer,
    encoder: OpusEncoder,
    packetizer: RtpPacketizer,
    /// RTP timestamp of the next Opus frame, in 48 kHz samples
    timestamp: u32,
}

impl AudioTranscoder {
    pub fn new(ssrc: u32, mtu: usize) -> Result<Self, TranscodeError> {
        Ok(Self {
            decoder: None,
            resampler: None,
            buffer: FrameBuffer::new(),
            encoder: OpusEncoder::new()?,
            packetizer: RtpPacketizer::opus(ssrc, mtu),
            timestamp: 0,
        })
    }

    /// Whether a sequence header has configured the decoder
    pub fn is_configured(&self) -> bool {
        self.decoder.is_some()
    }

    /// Process one AAC unit, returning any RTP packets it completed
    pub fn process(&mut self, data: AacData) -> Result<Vec<Packet>, TranscodeError> {
        match data {
            AacData::SequenceHeader(config) => {
                tracing::debug!(
                    sample_rate = config.sampling_frequency,
                    channels = config.channels(),
                    "AAC sequence header"
                );
                self.decoder = Some(AacDecoder::new(&config.raw)?);
                self.resampler = None;
                Ok(Vec::new())
            }
            AacData::Frame(frame) => self.process_frame(&frame),
        }
    }

    fn process_frame(&mut self, frame: &[u8]) -> Result<Vec<Packet>, TranscodeError> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or(TranscodeError::DecoderNotConfigured)?;
        let decoded = decoder.decode(frame)?;
        if decoded.samples.is_empty() {
            return Ok(Vec::new());
        }

        let stereo = to_stereo(&decoded.samples, decoded.channels);
        self.resample_into_buffer(&stereo, decoded.sample_rate)?;

        self.drain_frames()
    }

    fn resample_into_buffer(
        &mut self,
        stereo: &[i16],
        sample_rate: u32,
    ) -> Result<(), TranscodeError> {
        if sample_rate == OPUS_SAMPLE_RATE || sample_rate == 0 {
            self.buffer.push(stereo);
            return Ok(());
        }

        if self.resampler.as_ref().map(StereoResampler::input_rate) != Some(sample_rate) {
            self.resampler = Some(StereoResampler::new(sample_rate, OPUS_SAMPLE_RATE)?);
        }

        let mut resampled = Vec::with_capacity(stereo.len() * 2);
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.process(stereo, &mut resampled)?;
        }
        self.buffer.push(&resampled);
        Ok(())
    }

    fn drain_frames(&mut self) -> Result<Vec<Packet>, TranscodeError> {
        let mut packets = Vec::new();
        let frame_len = self.encoder.frame_len();

        while let Some(pcm) = self.buffer.next_frame(frame_len) {
            let opus: Bytes = self.encoder.encode(&pcm)?;
            packets.extend(self.packetizer.packetize(&opus, self.timestamp)?);
            self.timestamp = self.timestamp.wrapping_add(OPUS_FRAME_SAMPLES as u32);
        }

        Ok(packets)
    }
}

impl std::fmt::Debug for AudioTranscoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioTranscoder")
            .field("configured", &self.is_configured())
            .field("buffered", &self.buffer.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::aac::AudioSpecificConfig;

    #[test]
    fn test_frame_before_sequence_header() {
        let mut transcoder = AudioTranscoder::new(1, 1200).unwrap();
        let err = transcoder
            .process(AacData::Frame(Bytes::from_static(&[0x21, 0x00])))
            .unwrap_err();
        assert!(matches!(err, TranscodeError::DecoderNotConfigured));
    }

    #[test]
    fn test_sequence_header_configures_decoder() {
        let mut transcoder = AudioTranscoder::new(1, 1200).unwrap();
        let config = AudioSpecificConfig::parse(Bytes::from_static(&[0x12, 0x10])).unwrap();

        let packets = transcoder.process(AacData::SequenceHeader(config)).unwrap();
        assert!(packets.is_empty());
        assert!(transcoder.is_configured());
    }

    #[test]
    fn test_buffered_pcm_becomes_opus_packets() {
        let mut transcoder = AudioTranscoder::new(9, 1200).unwrap();

        // Two and a half 20 ms frames of 48 kHz stereo
        transcoder.buffer.push(&vec![0i16; 960 * 2 * 5 / 2]);
        let packets = transcoder.drain_frames().unwrap();

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].header.timestamp, 0);
        assert_eq!(packets[1].header.timestamp, 960);
        assert_eq!(packets[0].header.ssrc, 9);
        assert_eq!(transcoder.buffer.len(), 960);
    }
}
