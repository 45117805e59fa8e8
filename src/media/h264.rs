//! H.264/AVC parsing and reassembly
//!
//! RTMP transports H.264 in AVCC format (length-prefixed NAL units), while the
//! RTP payloader expects an Annex-B byte stream (start-code delimited). This
//! module parses the former and produces the latter.
//!
//! AVC Video Packet Structure (after the FLV tag byte):
//! ```text
//! +-----------------+-----------------+------+
//! | AVCPacketType   | CompositionTime | Data |
//! | (1 byte)        | (3 bytes, SI24) |      |
//! +-----------------+-----------------+------+
//! ```
//!
//! AVCPacketType:
//! - 0: AVC sequence header (AVCDecoderConfigurationRecord)
//! - 1: AVC NALU (one or more NALUs)
//! - 2: AVC end of sequence
//!
//! AVCDecoderConfigurationRecord (sequence header):
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, lower 2 bits)
//! | numOfSPS (1, lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::MediaError;

/// Annex-B start code prefixed to every NAL unit
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// AVC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    /// Sequence header (AVCDecoderConfigurationRecord)
    SequenceHeader = 0,
    /// NAL units
    Nalu = 1,
    /// End of sequence
    EndOfSequence = 2,
}

impl AvcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AvcPacketType::SequenceHeader),
            1 => Some(AvcPacketType::Nalu),
            2 => Some(AvcPacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// NAL unit types the relay cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice,
    /// IDR slice (keyframe)
    Idr,
    /// Supplemental enhancement information
    Sei,
    /// Sequence parameter set
    Sps,
    /// Picture parameter set
    Pps,
    /// Access unit delimiter
    Aud,
    Other(u8),
}

impl NaluType {
    pub fn from_byte(b: u8) -> Self {
        match b & 0x1F {
            1 => NaluType::Slice,
            5 => NaluType::Idr,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::Aud,
            other => NaluType::Other(other),
        }
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

/// Parsed H.264 data
#[derive(Debug, Clone)]
pub enum H264Data {
    /// Sequence header with SPS/PPS
    SequenceHeader(AvcConfig),

    /// Video frame (one or more NAL units)
    Frame {
        /// Composition time offset (for B-frames)
        composition_time: i32,
        /// NAL units in AVCC format (length-prefixed)
        nalus: Bytes,
    },

    /// End of sequence marker
    EndOfSequence,
}

/// AVC decoder configuration (from sequence header)
#[derive(Debug, Clone)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, etc.)
    pub profile: u8,
    /// AVC level (e.g., 31 = 3.1)
    pub level: u8,
    /// Bytes in each NALU length prefix (usually 4)
    pub nalu_length_size: u8,
    /// Sequence Parameter Sets
    pub sps: Vec<Bytes>,
    /// Picture Parameter Sets
    pub pps: Vec<Bytes>,
}

impl AvcConfig {
    /// Parse from AVCDecoderConfigurationRecord
    pub fn parse(mut data: Bytes) -> Result<Self, MediaError> {
        if data.len() < 7 {
            return Err(MediaError::InvalidAvcPacket);
        }

        let version = data.get_u8();
        if version != 1 {
            return Err(MediaError::InvalidAvcPacket);
        }

        let profile = data.get_u8();
        let _compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let sps = Self::parse_parameter_sets(&mut data, num_sps)?;

        if data.is_empty() {
            return Err(MediaError::InvalidAvcPacket);
        }
        let num_pps = data.get_u8() as usize;
        let pps = Self::parse_parameter_sets(&mut data, num_pps)?;

        // Both parameter set types are required to decode a keyframe
        if sps.is_empty() || pps.is_empty() {
            return Err(MediaError::InvalidAvcPacket);
        }

        Ok(AvcConfig {
            profile,
            level,
            nalu_length_size,
            sps,
            pps,
        })
    }

    fn parse_parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>, MediaError> {
        let mut sets = Vec::with_capacity(count);
        for _ in 0..count {
            if data.len() < 2 {
                return Err(MediaError::InvalidAvcPacket);
            }
            let len = data.get_u16() as usize;
            if data.len() < len {
                return Err(MediaError::InvalidAvcPacket);
            }
            sets.push(data.copy_to_bytes(len));
        }
        Ok(sets)
    }

    /// SPS followed by PPS
    pub fn parameter_sets(&self) -> impl Iterator<Item = &[u8]> {
        self.sps.iter().chain(self.pps.iter()).map(|set| set.as_ref())
    }
}

impl H264Data {
    /// Parse from RTMP video data (after frame type and codec ID byte)
    pub fn parse(mut data: Bytes) -> Result<Self, MediaError> {
        if data.len() < 4 {
            return Err(MediaError::InvalidAvcPacket);
        }

        let packet_type = data.get_u8();

        // Composition time (signed 24-bit)
        let raw = ((data.get_u8() as i32) << 16) | ((data.get_u8() as i32) << 8) | data.get_u8() as i32;
        let composition_time = (raw << 8) >> 8;

        match AvcPacketType::from_byte(packet_type) {
            Some(AvcPacketType::SequenceHeader) => {
                Ok(H264Data::SequenceHeader(AvcConfig::parse(data)?))
            }
            Some(AvcPacketType::Nalu) => Ok(H264Data::Frame {
                composition_time,
                nalus: data,
            }),
            Some(AvcPacketType::EndOfSequence) => Ok(H264Data::EndOfSequence),
            None => Err(MediaError::InvalidAvcPacket),
        }
    }

    /// Check if this is a sequence header
    pub fn is_sequence_header(&self) -> bool {
        matches!(self, H264Data::SequenceHeader(_))
    }
}

/// Iterator over NAL units in AVCC format
pub struct NaluIterator<'a> {
    data: &'a [u8],
    offset: usize,
    nalu_length_size: usize,
}

impl<'a> NaluIterator<'a> {
    pub fn new(data: &'a [u8], nalu_length_size: u8) -> Self {
        Self {
            data,
            offset: 0,
            nalu_length_size: nalu_length_size as usize,
        }
    }
}

impl<'a> Iterator for NaluIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.nalu_length_size == 0 || self.offset + self.nalu_length_size > self.data.len() {
            return None;
        }

        // Read length (big-endian)
        let mut len: usize = 0;
        for i in 0..self.nalu_length_size {
            len = (len << 8) | (self.data[self.offset + i] as usize);
        }
        self.offset += self.nalu_length_size;

        if self.offset + len > self.data.len() {
            return None;
        }

        let nalu = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Some(nalu)
    }
}

/// Iterator over NAL units in an Annex-B byte stream
///
/// Accepts both 3- and 4-byte start codes.
pub struct AnnexBIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> AnnexBIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let offset = find_start_code(data, 0).map_or(data.len(), |(_, end)| end);
        Self { data, offset }
    }
}

impl<'a> Iterator for AnnexBIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset < self.data.len() {
            let start = self.offset;
            let (end, next) = match find_start_code(self.data, start) {
                Some((code_start, code_end)) => (code_start, code_end),
                None => (self.data.len(), self.data.len()),
            };
            self.offset = next;
            if end > start {
                return Some(&self.data[start..end]);
            }
        }
        None
    }
}

/// Locate the next start code at or after `from`; returns (start, end) of the code
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, i + 3));
            }
            if data[i + 2] == 0 && i + 4 <= data.len() && data[i + 3] == 1 {
                return Some((i, i + 4));
            }
        }
        i += 1;
    }
    None
}

/// Join NAL units into an Annex-B byte stream
pub fn join_annexb<'a, I>(nalus: I) -> Bytes
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut out = BytesMut::new();
    for nalu in nalus {
        if nalu.is_empty() {
            continue;
        }
        out.put_slice(&START_CODE);
        out.put_slice(nalu);
    }
    out.freeze()
}

/// Reassemble a keyframe: parameter sets first, then the frame's own NAL units
pub fn reassemble_keyframe<'a, I>(config: &'a AvcConfig, nalus: I) -> Bytes
where
    I: IntoIterator<Item = &'a [u8]>,
{
    join_annexb(config.parameter_sets().chain(nalus))
}

/// Whether an Annex-B byte stream contains an IDR slice
pub fn contains_idr(annexb: &[u8]) -> bool {
    AnnexBIterator::new(annexb).any(|nalu| NaluType::from_byte(nalu[0]) == NaluType::Idr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Bytes {
        Bytes::from_static(&[
            0x01, // version
            0x64, // profile (High)
            0x00, // compatibility
            0x1F, // level 3.1
            0xFF, // nalu length size = 4
            0xE1, // 1 SPS
            0x00, 0x04, // SPS length
            0x67, 0x64, 0x00, 0x1F, // SPS data
            0x01, // 1 PPS
            0x00, 0x03, // PPS length
            0x68, 0xEF, 0x38, // PPS data
        ])
    }

    #[test]
    fn test_nalu_type() {
        assert_eq!(NaluType::from_byte(0x65), NaluType::Idr);
        assert_eq!(NaluType::from_byte(0x67), NaluType::Sps);
        assert_eq!(NaluType::from_byte(0x68), NaluType::Pps);
        assert_eq!(NaluType::from_byte(0x41), NaluType::Slice);
        assert_eq!(NaluType::from_byte(0x7C), NaluType::Other(28));
        assert!(NaluType::Sps.is_parameter_set());
    }

    #[test]
    fn test_avc_config_parse() {
        let config = AvcConfig::parse(sample_config()).unwrap();
        assert_eq!(config.profile, 100);
        assert_eq!(config.level, 31);
        assert_eq!(config.nalu_length_size, 4);
        assert_eq!(config.sps[0].as_ref(), &[0x67, 0x64, 0x00, 0x1F]);
        assert_eq!(config.pps[0].as_ref(), &[0x68, 0xEF, 0x38]);
    }

    #[test]
    fn test_avc_config_requires_both_parameter_sets() {
        let data = Bytes::from_static(&[
            0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x02, 0x67, 0x64, 0x00, // no PPS
        ]);
        assert!(AvcConfig::parse(data).is_err());
    }

    #[test]
    fn test_avc_config_invalid_version() {
        let mut data = sample_config().to_vec();
        data[0] = 2;
        assert!(AvcConfig::parse(Bytes::from(data)).is_err());
    }

    #[test]
    fn test_h264_data_sequence_header() {
        let mut data = vec![0x00, 0x00, 0x00, 0x00];
        data.extend_from_slice(&sample_config());

        let parsed = H264Data::parse(Bytes::from(data)).unwrap();
        assert!(parsed.is_sequence_header());
    }

    #[test]
    fn test_h264_composition_time() {
        let data = Bytes::from_static(&[0x01, 0x00, 0x00, 0x21, 0x00, 0x00, 0x00, 0x01, 0x41]);
        match H264Data::parse(data).unwrap() {
            H264Data::Frame {
                composition_time, ..
            } => assert_eq!(composition_time, 33),
            other => panic!("Expected Frame, got {:?}", other),
        }

        // -1 as signed 24-bit
        let data = Bytes::from_static(&[0x01, 0xFF, 0xFF, 0xFF]);
        match H264Data::parse(data).unwrap() {
            H264Data::Frame {
                composition_time, ..
            } => assert_eq!(composition_time, -1),
            other => panic!("Expected Frame, got {:?}", other),
        }
    }

    #[test]
    fn test_h264_data_end_of_sequence_and_invalid() {
        let eos = H264Data::parse(Bytes::from_static(&[0x02, 0x00, 0x00, 0x00])).unwrap();
        assert!(matches!(eos, H264Data::EndOfSequence));

        assert!(H264Data::parse(Bytes::from_static(&[0x05, 0x00, 0x00, 0x00])).is_err());
        assert!(H264Data::parse(Bytes::from_static(&[0x01, 0x00])).is_err());
    }

    #[test]
    fn test_nalu_iterator() {
        let data: &[u8] = &[
            0x00, 0x00, 0x00, 0x03, // length = 3
            0x67, 0x64, 0x00, // SPS NALU
            0x00, 0x00, 0x00, 0x02, // length = 2
            0x68, 0xEF, // PPS NALU
        ];

        let nalus: Vec<&[u8]> = NaluIterator::new(data, 4).collect();
        assert_eq!(nalus, vec![&[0x67, 0x64, 0x00][..], &[0x68, 0xEF][..]]);
    }

    #[test]
    fn test_nalu_iterator_truncated() {
        // Length says 10 bytes but only 3 available
        let data: &[u8] = &[0x00, 0x00, 0x00, 0x0A, 0x67, 0x64, 0x00];
        assert!(NaluIterator::new(data, 4).next().is_none());
    }

    #[test]
    fn test_keyframe_reassembly_prefixes_parameter_sets() {
        let config = AvcConfig::parse(sample_config()).unwrap();
        let n1: &[u8] = &[0x65, 0x88, 0x84];
        let n2: &[u8] = &[0x65, 0x00, 0x11];

        let frame = reassemble_keyframe(&config, [n1, n2]);

        let expected = join_annexb([
            &[0x67, 0x64, 0x00, 0x1F][..],
            &[0x68, 0xEF, 0x38][..],
            n1,
            n2,
        ]);
        assert_eq!(frame, expected);
        assert_eq!(&frame[..8], &[0x00, 0x00, 0x00, 0x01, 0x67, 0x64, 0x00, 0x1F]);
    }

    #[test]
    fn test_inter_frame_joined_alone() {
        let n1: &[u8] = &[0x41, 0x9A];
        let frame = join_annexb([n1]);
        assert_eq!(frame.as_ref(), &[0x00, 0x00, 0x00, 0x01, 0x41, 0x9A]);
    }

    #[test]
    fn test_annexb_iterator() {
        let data: &[u8] = &[
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, // 4-byte start code
            0x00, 0x00, 0x01, 0x68, 0xCE, // 3-byte start code
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x80,
        ];

        let nalus: Vec<&[u8]> = AnnexBIterator::new(data).collect();
        assert_eq!(
            nalus,
            vec![&[0x67, 0x42][..], &[0x68, 0xCE][..], &[0x65, 0x88, 0x80][..]]
        );
        assert!(contains_idr(data));
        assert!(!contains_idr(&[0x00, 0x00, 0x01, 0x41, 0x9A]));
    }
}
