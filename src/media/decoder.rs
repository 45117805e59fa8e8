//! AAC decoding via fdk-aac
//!
//! The decoder is configured from the AudioSpecificConfig carried in the AAC
//! sequence header and then fed raw (non-ADTS) access units.

use fdk_aac_sys as fdk;

use crate::error::TranscodeError;

/// Interleaved 16-bit PCM produced by one decode call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: usize,
}

/// Raw-transport AAC decoder
pub struct AacDecoder {
    instance: *mut fdk::AAC_DECODER_INSTANCE,
    buffer: Vec<fdk::INT_PCM>,
}

// The fdk handle is only ever touched through `&mut self`.
unsafe impl Send for AacDecoder {}

impl AacDecoder {
    const OUTPUT_CAPACITY: usize = 8 * 2048;

    /// Open a decoder configured with an AudioSpecificConfig
    pub fn new(audio_specific_config: &[u8]) -> Result<Self, TranscodeError> {
        let instance = unsafe { fdk::aacDecoder_Open(fdk::TRANSPORT_TYPE_TT_MP4_RAW, 1) };
        if instance.is_null() {
            return Err(TranscodeError::DecoderInit(0));
        }

        // Dropping the wrapper closes the instance on every error path below
        let decoder = Self {
            instance,
            buffer: vec![0; Self::OUTPUT_CAPACITY],
        };

        let mut config = audio_specific_config.to_vec();
        let length = config.len() as u32;
        let result = unsafe {
            fdk::aacDecoder_ConfigRaw(decoder.instance, &mut config.as_mut_ptr(), &length)
        };
        if result != fdk::AAC_DECODER_ERROR_AAC_DEC_OK {
            return Err(TranscodeError::DecoderInit(result as u32));
        }

        Ok(decoder)
    }

    /// Decode one raw AAC access unit
    pub fn decode(&mut self, data: &[u8]) -> Result<DecodedAudio, TranscodeError> {
        let mut output = DecodedAudio::default();
        if data.is_empty() {
            return Ok(output);
        }

        let buffer_size = data.len() as u32;
        let mut bytes_valid = buffer_size;
        let mut input = data.to_vec();

        while bytes_valid > 0 {
            // Fill adjusts `bytes_valid` to the number of bytes not yet consumed
            let result = unsafe {
                fdk::aacDecoder_Fill(
                    self.instance,
                    &mut input.as_mut_ptr(),
                    &buffer_size,
                    &mut bytes_valid,
                )
            };
            if result != fdk::AAC_DECODER_ERROR_AAC_DEC_OK {
                return Err(TranscodeError::Decode(result as u32));
            }

            loop {
                let result = unsafe {
                    fdk::aacDecoder_DecodeFrame(
                        self.instance,
                        self.buffer.as_mut_ptr(),
                        self.buffer.len() as i32,
                        0,
                    )
                };

                if result == fdk::AAC_DECODER_ERROR_AAC_DEC_NOT_ENOUGH_BITS {
                    break;
                }
                if result != fdk::AAC_DECODER_ERROR_AAC_DEC_OK {
                    return Err(TranscodeError::Decode(result as u32));
                }

                let info = unsafe { *fdk::aacDecoder_GetStreamInfo(self.instance) };
                if info.numChannels <= 0 {
                    return Err(TranscodeError::UnsupportedChannels(info.numChannels));
                }

                let len = (info.frameSize * info.numChannels) as usize;
                let len = len.min(self.buffer.len());
                output.samples.extend_from_slice(&self.buffer[..len]);
                output.sample_rate = info.sampleRate.max(0) as u32;
                output.channels = info.numChannels as usize;
            }
        }

        Ok(output)
    }
}

impl Drop for AacDecoder {
    fn drop(&mut self) {
        unsafe {
            fdk::aacDecoder_Close(self.instance);
        }
    }
}
