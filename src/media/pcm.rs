//! PCM normalization
//!
//! Decoded AAC arrives at whatever rate and channel count the publisher chose.
//! Opus wants 48 kHz stereo in fixed 20 ms frames, so samples are upmixed,
//! resampled, and re-chunked here.

use rubato::{FftFixedOut, Resampler};

use crate::error::TranscodeError;

/// Convert interleaved PCM with `channels` channels to interleaved stereo
///
/// Mono is duplicated into both channels; layouts wider than stereo keep the
/// first two channels.
pub fn to_stereo(samples: &[i16], channels: usize) -> Vec<i16> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples.to_vec(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Output chunk per resampler pass, in frames (20 ms at 48 kHz)
const RESAMPLER_CHUNK_FRAMES: usize = 960;

/// Sub-chunks used by the FFT resampler
const SUB_CHUNKS: usize = 2;

/// FFT-based stereo resampler
///
/// Input is buffered per channel until the resampler has enough frames for
/// one output chunk, so consecutive calls resample one continuous signal.
pub struct StereoResampler {
    input_rate: u32,
    resampler: FftFixedOut<f32>,
    input: [Vec<f32>; 2],
    output: [Vec<f32>; 2],
}

impl StereoResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self, TranscodeError> {
        let resampler = FftFixedOut::<f32>::new(
            input_rate as usize,
            output_rate as usize,
            RESAMPLER_CHUNK_FRAMES,
            SUB_CHUNKS,
            2,
        )?;
        let output_len = resampler.output_frames_max();

        Ok(Self {
            input_rate,
            resampler,
            input: [Vec::new(), Vec::new()],
            output: [vec![0.0; output_len], vec![0.0; output_len]],
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Resample interleaved stereo, appending whole output chunks to `out`
    pub fn process(&mut self, input: &[i16], out: &mut Vec<i16>) -> Result<(), TranscodeError> {
        for frame in input.chunks_exact(2) {
            self.input[0].push(to_float(frame[0]));
            self.input[1].push(to_float(frame[1]));
        }

        while self.resampler.input_frames_next() <= self.input[0].len() {
            let [left_in, right_in] = &self.input;
            let [left_out, right_out] = &mut self.output;
            let (consumed, generated) = self.resampler.process_into_buffer(
                &[left_in, right_in],
                &mut [left_out, right_out],
                None,
            )?;

            self.input[0].drain(..consumed);
            self.input[1].drain(..consumed);

            out.reserve(generated * 2);
            for i in 0..generated {
                out.push(to_sample(self.output[0][i]));
                out.push(to_sample(self.output[1][i]));
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for StereoResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StereoResampler")
            .field("input_rate", &self.input_rate)
            .field("buffered", &self.input[0].len())
            .finish()
    }
}

fn to_float(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

fn to_sample(value: f32) -> i16 {
    (value * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Accumulates interleaved samples and hands them out in fixed-size frames
#[derive(Debug, Default)]
pub struct FrameBuffer {
    samples: Vec<i16>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, samples: &[i16]) {
        self.samples.extend_from_slice(samples);
    }

    /// Take the next `len` samples if that many are buffered
    pub fn next_frame(&mut self, len: usize) -> Option<Vec<i16>> {
        if len == 0 || self.samples.len() < len {
            return None;
        }
        let rest = self.samples.split_off(len);
        Some(std::mem::replace(&mut self.samples, rest))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_upmix() {
        assert_eq!(to_stereo(&[1, 2, 3], 1), vec![1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn test_stereo_passthrough() {
        assert_eq!(to_stereo(&[1, 2, 3, 4], 2), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_surround_keeps_front_pair() {
        let samples = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        assert_eq!(to_stereo(&samples, 6), vec![1, 2, 7, 8]);
    }

    #[test]
    fn test_sample_conversion_round_trips() {
        for sample in [i16::MIN, -1, 0, 1, 1234, i16::MAX] {
            assert_eq!(to_sample(to_float(sample)), sample);
        }
    }

    #[test]
    fn test_resampler_emits_whole_chunks() {
        let mut resampler = StereoResampler::new(44_100, 48_000).unwrap();
        let mut out = Vec::new();

        // 100 ms is not enough to fill the pipeline many times over
        resampler.process(&vec![0i16; 4410 * 2], &mut out).unwrap();
        assert_eq!(out.len() % (RESAMPLER_CHUNK_FRAMES * 2), 0);
        assert!(out.len() / 2 <= 4800);
    }

    #[test]
    fn test_resampler_output_rate() {
        let input: Vec<i16> = (0..44_100)
            .flat_map(|i| {
                let s = ((i as f32 * 440.0 * std::f32::consts::TAU / 44_100.0).sin() * 8000.0) as i16;
                [s, s]
            })
            .collect();

        // Feed one second in uneven pieces
        let mut resampler = StereoResampler::new(44_100, 48_000).unwrap();
        let mut out = Vec::new();
        for piece in input.chunks(1024 * 2 + 6) {
            resampler.process(piece, &mut out).unwrap();
        }

        let frames = out.len() / 2;
        assert_eq!(frames % RESAMPLER_CHUNK_FRAMES, 0);
        assert!(
            (45 * RESAMPLER_CHUNK_FRAMES..=48_000).contains(&frames),
            "got {} frames",
            frames
        );
        // Both channels carry the same signal and it is not silenced
        assert!(out.chunks_exact(2).all(|f| f[0] == f[1]));
        assert!(out.iter().any(|&s| s.abs() > 4000));
    }

    #[test]
    fn test_frame_buffer() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&[1, 2, 3]);
        assert_eq!(buffer.next_frame(4), None);

        buffer.push(&[4, 5]);
        assert_eq!(buffer.next_frame(4), Some(vec![1, 2, 3, 4]));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.next_frame(4), None);
    }
}
